//! Signet archive decoding
//!
//! Turns a foreign keyed archive holding one signature annotation into a
//! [`SignatureRecord`]:
//!
//! ```text
//! AKSignatureAnnotation
//! ├── UUID        : NSString   ──► SignatureRecord.identifier (uppercase)
//! └── signature   : AKSignature
//!     ├── creationDate : NSDate ──► DecodedSignature.created_at
//!     └── path         : NSData ──► signet_path::decode ──► SignatureRecord.path
//! ```
//!
//! Only the two record classes and the Foundation value classes their fields
//! need are ever instantiated. Any other class name reached while decoding
//! fails with [`ArchiveError::UntrustedClass`] before its contents are read.

pub mod keyed;
pub mod plist;

pub use keyed::{ArchivedClass, ArchivedObject, KeyedArchive, KeyedArchiveWriter};
pub use plist::PlistError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signet_path::{DecodeError, Path};
use uuid::Uuid;

/// Unix timestamp of 2001-01-01T00:00:00Z, the archive date epoch.
pub const REFERENCE_DATE_UNIX: i64 = 978_307_200;

const ANNOTATION_CLASS: &str = "AKSignatureAnnotation";
const SIGNATURE_CLASS: &str = "AKSignature";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive names class `{0}`, which is not allowed here")]
    UntrustedClass(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(#[from] Corruption),
}

/// What was wrong with an archive that failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum Corruption {
    #[error("invalid binary plist: {0}")]
    Plist(#[from] PlistError),

    #[error("not a keyed archive: {0}")]
    NotKeyedArchive(&'static str),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a {expected}")]
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("expected an instance of {expected}, found {found}")]
    UnexpectedClass {
        expected: &'static str,
        found: String,
    },

    #[error("object reference {0} does not exist")]
    DanglingReference(u64),

    #[error("signature identifier is empty")]
    EmptyIdentifier,

    #[error("signature identifier `{value}` is not a hyphenated UUID")]
    InvalidIdentifier {
        value: String,
        source: Option<uuid::Error>,
    },

    #[error("invalid path payload: {0}")]
    Path(#[from] DecodeError),

    #[error("creation date {0} is out of range")]
    InvalidDate(f64),
}

impl From<PlistError> for ArchiveError {
    fn from(e: PlistError) -> Self {
        ArchiveError::CorruptArchive(e.into())
    }
}

impl From<DecodeError> for ArchiveError {
    fn from(e: DecodeError) -> Self {
        ArchiveError::CorruptArchive(e.into())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A stored signature: its identifier and its stroke geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub identifier: String,
    pub path: Path,
}

impl SignatureRecord {
    pub fn new(identifier: impl Into<String>, path: Path) -> Self {
        Self {
            identifier: identifier.into(),
            path,
        }
    }
}

/// A record together with metadata carried only by the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSignature {
    pub record: SignatureRecord,
    pub created_at: DateTime<Utc>,
}

const HYPHENATED_LEN: usize = 36;

/// Parse an archive identifier, accepting only the 36-character hyphenated
/// form, and return it uppercased.
fn canonical_identifier(raw: &str) -> Result<String, Corruption> {
    let invalid = |source| Corruption::InvalidIdentifier {
        value: raw.to_owned(),
        source,
    };
    if raw.len() != HYPHENATED_LEN {
        return Err(invalid(None));
    }
    let uuid = Uuid::try_parse(raw).map_err(|e| invalid(Some(e)))?;
    Ok(uuid
        .hyphenated()
        .encode_upper(&mut Uuid::encode_buffer())
        .to_owned())
}

/// Convert archive date seconds into a UTC timestamp.
pub fn date_from_reference_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let unix = seconds + REFERENCE_DATE_UNIX as f64;
    let whole = unix.floor();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return None;
    }
    let mut secs = whole as i64;
    let mut nanos = ((unix - whole) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs = secs.checked_add(1)?;
        nanos = 0;
    }
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC timestamp into archive date seconds.
pub fn reference_seconds(date: &DateTime<Utc>) -> f64 {
    (date.timestamp() - REFERENCE_DATE_UNIX) as f64
        + date.timestamp_subsec_nanos() as f64 / 1e9
}

// ============================================================================
// Decoding and encoding
// ============================================================================

/// Decode one signature annotation archive.
pub fn decode_signature(bytes: &[u8]) -> Result<DecodedSignature, ArchiveError> {
    let archive = KeyedArchive::parse(bytes)?;
    let annotation = archive.root(ArchivedClass::SignatureAnnotation)?;

    let raw_identifier = annotation.decode_string("UUID")?;
    if raw_identifier.is_empty() {
        return Err(Corruption::EmptyIdentifier.into());
    }
    let identifier = canonical_identifier(&raw_identifier)?;

    let signature = annotation.decode_object("signature", ArchivedClass::Signature)?;
    let seconds = signature.decode_date("creationDate")?;
    let created_at = date_from_reference_seconds(seconds).ok_or(Corruption::InvalidDate(seconds))?;
    let payload = signature.decode_data("path")?;
    let path = signet_path::decode(&payload)?;

    tracing::debug!(
        identifier = %identifier,
        commands = path.len(),
        created_at = %created_at,
        "decoded signature archive"
    );

    Ok(DecodedSignature {
        record: SignatureRecord { identifier, path },
        created_at,
    })
}

/// Encode `record` as a signature annotation archive that
/// [`decode_signature`] accepts.
pub fn encode_signature(record: &SignatureRecord, created_at: DateTime<Utc>) -> Vec<u8> {
    let mut writer = KeyedArchiveWriter::new();
    let path = writer.data(signet_path::encode(&record.path));
    let date = writer.date(reference_seconds(&created_at));
    let signature = writer.object(SIGNATURE_CLASS, &[("creationDate", date), ("path", path)]);
    let identifier = writer.string(record.identifier.as_str());
    let annotation = writer.object(
        ANNOTATION_CLASS,
        &[("UUID", identifier), ("signature", signature)],
    );
    writer.finish(annotation)
}
