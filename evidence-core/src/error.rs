use thiserror::Error;

/// Errors raised by the image layer (cache, stamping, library).
///
/// The type is `Clone` so that a single load outcome can be handed to every
/// caller that coalesced onto the same in-flight operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Blob store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Artifacts missing for evidence {id}")]
    ArtifactMissing { id: String },

    #[error("Stamping failed: {0}")]
    StampingFailed(String),

    /// A display URL no longer resolves. Requesting the display again
    /// reloads the image.
    #[error("Handle has been revoked: {0}")]
    InvalidHandle(String),

    #[error("Operation timed out after {millis}ms: {operation}")]
    TimedOut { operation: String, millis: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Evidence still loading: {}", ids.join(", "))]
    Busy { ids: Vec<String> },

    #[error("Evidence not found: {0}")]
    EvidenceNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Test case not found: {0}")]
    TestCaseNotFound(String),

    #[error("No project selected")]
    NoCurrentProject,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl ImageError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::TimedOut { .. } | Self::Storage(_) | Self::Busy { .. }
        )
    }
}

impl From<crate::store::StoreError> for ImageError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            crate::store::StoreError::Io(msg) => Self::Storage(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
