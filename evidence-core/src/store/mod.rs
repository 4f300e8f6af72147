//! Durable blob storage for evidence artifacts.
//!
//! Every evidence image is stored as up to three opaque blobs:
//! - `{id}_base`: the current authoritative pixels (replaced on edit)
//! - `{id}_stamped`: base plus the capture timestamp overlay
//! - `{id}_original`: the pre-edit base, written once on the first edit
//!
//! Two backends are provided: [`FileBlobStore`] keeps one file per blob in a
//! directory and survives restarts; [`MemoryBlobStore`] lives only as long as
//! the process.

pub mod error;
mod file;
mod memory;

pub use error::StoreError;
pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result alias for blob store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-value storage of binary payloads.
///
/// Implementations must be thread-safe (`Send + Sync`) and must accept
/// multi-megabyte payloads without size-based rejection.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()>;

    /// Read the value under `key`. Absence is `Ok(None)`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remove every key.
    async fn clear(&self) -> StoreResult<()>;

    /// Whether a value exists under `key`.
    async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// The stored renditions of one evidence image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Current authoritative source pixels
    Base,
    /// Base with the timestamp burned in
    Stamped,
    /// Base as it was before the first edit
    Original,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Base, Self::Stamped, Self::Original];

    /// Key suffix used in the store.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Stamped => "stamped",
            Self::Original => "original",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "base" => Ok(Self::Base),
            "stamped" => Ok(Self::Stamped),
            "original" => Ok(Self::Original),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Compose the store key for an evidence artifact.
pub fn artifact_key(evidence_id: &str, kind: ArtifactKind) -> String {
    format!("{}_{}", evidence_id, kind.suffix())
}
