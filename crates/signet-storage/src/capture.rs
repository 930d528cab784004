//! Archive → store → path pipeline.

use crate::{SignatureStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use signet_archive::{ArchiveError, DecodedSignature};
use signet_path::{DecodeError, Path};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("stored path for `{identifier}` does not decode: {source}")]
    Decode {
        identifier: String,
        source: DecodeError,
    },
}

/// A signature that has just been decoded and stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedSignature {
    pub identifier: String,
    pub created_at: DateTime<Utc>,
    pub path: Path,
}

impl SignatureStore {
    /// Decode a keyed archive and store its path. Nothing is stored when
    /// decoding fails.
    pub fn capture(&self, archive: &[u8]) -> Result<CapturedSignature, CaptureError> {
        let DecodedSignature { record, created_at } = signet_archive::decode_signature(archive)?;
        self.put(&record.identifier, &signet_path::encode(&record.path))?;

        tracing::info!(
            identifier = %record.identifier,
            commands = record.path.len(),
            "captured signature"
        );
        Ok(CapturedSignature {
            identifier: record.identifier,
            created_at,
            path: record.path,
        })
    }

    /// Fetch and decode the path stored under `identifier`.
    pub fn load_path(&self, identifier: &str) -> Result<Option<Path>, LoadError> {
        let Some(bytes) = self.get(identifier) else {
            return Ok(None);
        };
        signet_path::decode(&bytes)
            .map(Some)
            .map_err(|source| LoadError::Decode {
                identifier: identifier.to_owned(),
                source,
            })
    }
}
