//! Persisted references to a chosen signature.
//!
//! A reference is `{ "kind": "vector", "id": "…" }` or, in text, `vector:ID`.
//! References written before kinds existed carry only the identifier; those
//! are resolved by trying every kind in turn.

use crate::{LoadError, SignatureStore};
use serde::{Deserialize, Serialize};
use signet_path::Path;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Stroke geometry kept in the signature store.
    #[serde(alias = "preview")]
    Vector,
}

impl SignatureKind {
    /// Resolution order for references without a kind.
    pub const ALL: [SignatureKind; 1] = [SignatureKind::Vector];

    pub fn as_str(self) -> &'static str {
        match self {
            SignatureKind::Vector => "vector",
        }
    }
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureKind {
    type Err = ParseReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" | "preview" => Ok(SignatureKind::Vector),
            other => Err(ParseReferenceError::UnknownKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseReferenceError {
    #[error("signature reference is empty")]
    Empty,

    #[error("unknown signature kind `{0}`")]
    UnknownKind(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SignatureKind>,
    pub id: String,
}

impl SignatureRef {
    pub fn new(kind: SignatureKind, id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            id: id.into(),
        }
    }

    /// A reference that does not say which kind it points at.
    pub fn untyped(id: impl Into<String>) -> Self {
        Self {
            kind: None,
            id: id.into(),
        }
    }
}

impl fmt::Display for SignatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{kind}:{}", self.id),
            None => f.write_str(&self.id),
        }
    }
}

impl FromStr for SignatureRef {
    type Err = ParseReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let reference = match s.split_once(':') {
            Some((kind, id)) => SignatureRef::new(kind.parse()?, id),
            None => SignatureRef::untyped(s),
        };
        if reference.id.is_empty() {
            return Err(ParseReferenceError::Empty);
        }
        Ok(reference)
    }
}

/// A resolved reference. `reference.kind` is always set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSignature {
    pub reference: SignatureRef,
    pub path: Path,
}

/// Look up `reference` in `store`.
///
/// With a kind only that kind is consulted; without one each kind in
/// [`SignatureKind::ALL`] is tried and the first hit wins.
pub fn resolve(
    store: &SignatureStore,
    reference: &SignatureRef,
) -> Result<Option<ResolvedSignature>, LoadError> {
    if reference.id.is_empty() {
        return Ok(None);
    }

    let single;
    let kinds: &[SignatureKind] = match reference.kind {
        Some(kind) => {
            single = [kind];
            &single
        }
        None => &SignatureKind::ALL,
    };

    for &kind in kinds {
        let found = match kind {
            SignatureKind::Vector => store.load_path(&reference.id)?,
        };
        if let Some(path) = found {
            if reference.kind.is_none() {
                tracing::debug!(id = %reference.id, %kind, "resolved untyped signature reference");
            }
            return Ok(Some(ResolvedSignature {
                reference: SignatureRef::new(kind, reference.id.clone()),
                path,
            }));
        }
    }
    Ok(None)
}
