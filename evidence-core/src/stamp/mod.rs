//! Timestamp stamping service.
//!
//! Burns a capture timestamp into the bottom-left corner of an image and
//! re-encodes it in the same format it came in (JPEG at quality 92, lossless
//! for PNG).
//!
//! # Dispatch
//!
//! When a worker is available the CPU-bound work runs on a dedicated thread
//! and is matched back to its caller by request token. Without a worker (no
//! async runtime, worker disabled, or the worker thread has gone away) the
//! same rendering runs in the caller's context. Both paths produce identical
//! output. There is no cancellation: a failed render surfaces as
//! [`ImageError::StampingFailed`] and the caller decides what to fall back to.
//!
//! ```no_run
//! use evidence_core::stamp::Stamper;
//!
//! # async fn example(png: Vec<u8>) -> evidence_core::Result<()> {
//! let stamper = Stamper::new(true, None);
//! let stamped = stamper.stamp(png, "2024/01/15 21:30:45", "image/png").await?;
//! assert_eq!(stamped.mime_type, "image/png");
//! # Ok(())
//! # }
//! ```

pub mod render;
mod worker;

pub use render::{format_for_mime, render_stamp, text_width};
pub use worker::{StampRequest, StampResponse, StampWorker};

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{ImageError, Result};

/// Output of a stamp operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// Mime type of `bytes` (same as the input)
    pub mime_type: String,
}

/// Sniff the mime type of encoded image bytes.
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|format| format.to_mime_type())
}

/// Stamping service with off-thread dispatch and in-context fallback.
#[derive(Debug)]
pub struct Stamper {
    worker: Option<StampWorker>,
    timeout: Option<Duration>,
}

impl Stamper {
    /// Create a stamper, starting a worker thread when `use_worker` is set and
    /// an async runtime is available.
    pub fn new(use_worker: bool, timeout: Option<Duration>) -> Self {
        let worker = if use_worker { StampWorker::spawn() } else { None };
        if use_worker && worker.is_none() {
            warn!("Stamp worker unavailable, stamping in-context");
        }
        Self { worker, timeout }
    }

    /// Create a stamper that always renders in the caller's context.
    pub fn in_context() -> Self {
        Self {
            worker: None,
            timeout: None,
        }
    }

    /// Whether requests are dispatched to the worker thread
    pub fn is_offthread(&self) -> bool {
        self.worker.is_some()
    }

    /// Stamp `text` onto `bytes`, keeping the encoding given by `mime_type`.
    #[instrument(level = "debug", skip(self, bytes, text), fields(size = bytes.len()))]
    pub async fn stamp(&self, bytes: Vec<u8>, text: &str, mime_type: &str) -> Result<StampedImage> {
        let bytes = match &self.worker {
            Some(worker) => match worker.submit(bytes, text, mime_type) {
                Ok((token, rx)) => return self.await_response(worker, token, rx).await,
                Err(returned) => {
                    warn!("Stamp worker rejected request, falling back to in-context stamping");
                    returned
                }
            },
            None => bytes,
        };

        debug!("Stamping in-context");
        render_stamp(&bytes, text, mime_type).map_err(ImageError::StampingFailed)
    }

    async fn await_response(
        &self,
        worker: &StampWorker,
        token: u64,
        rx: tokio::sync::oneshot::Receiver<std::result::Result<StampedImage, String>>,
    ) -> Result<StampedImage> {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    worker.abandon(token);
                    warn!(token, "Stamp request timed out");
                    return Err(ImageError::TimedOut {
                        operation: "stamp".into(),
                        millis: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(stamped)) => {
                debug!(token, size = stamped.bytes.len(), "Stamp request completed");
                Ok(stamped)
            }
            Ok(Err(message)) => Err(ImageError::StampingFailed(message)),
            Err(_) => Err(ImageError::StampingFailed(
                "stamp worker dropped the request".into(),
            )),
        }
    }
}
