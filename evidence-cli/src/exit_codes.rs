//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts and CI systems to handle errors appropriately.

use evidence_core::ImageError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (unknown ids, missing confirmation).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (unsupported image, stamping failed, missing artifacts).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Storage unavailable, busy or timed out.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error (cannot write blobs, registry or exports).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
#[derive(Debug)]
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    #[cfg(test)]
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Typed library errors first, then context messages added by commands
        let code = match err.chain().find_map(|e| e.downcast_ref::<ImageError>()) {
            Some(image_err) => Self::classify(image_err),
            None if message.contains("Failed to read file") => INPUT_ERROR,
            None if message.contains("Failed to write") || message.contains("Failed to create") => {
                IO_ERROR
            }
            None if message.contains("Refusing") || message.contains("Invalid date") => USAGE_ERROR,
            None => GENERAL_ERROR,
        };

        Self {
            code,
            message: Some(message),
        }
    }

    fn classify(err: &ImageError) -> i32 {
        match err {
            ImageError::EvidenceNotFound(_)
            | ImageError::ProjectNotFound(_)
            | ImageError::TestCaseNotFound(_)
            | ImageError::NoCurrentProject => USAGE_ERROR,
            ImageError::InvalidInput(_)
            | ImageError::StampingFailed(_)
            | ImageError::ArtifactMissing { .. }
            | ImageError::InvalidHandle(_) => DATA_ERROR,
            ImageError::StoreUnavailable(_) | ImageError::Busy { .. } | ImageError::TimedOut { .. } => {
                UNAVAILABLE
            }
            ImageError::Storage(_) | ImageError::Registry(_) => IO_ERROR,
        }
    }
}
