//! Off-thread stamping worker.
//!
//! Requests are plain messages carrying owned byte buffers and a unique
//! token. The worker thread renders each request and posts a response with the
//! same token; a router task on the async runtime matches responses to the
//! waiting callers through a map of pending tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::{mpsc as async_mpsc, oneshot};
use tracing::{debug, info, warn};

use super::render::render_stamp;
use super::StampedImage;

type StampOutcome = Result<StampedImage, String>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<StampOutcome>>>>;

/// Message sent to the worker thread.
#[derive(Debug)]
pub struct StampRequest {
    pub token: u64,
    pub bytes: Vec<u8>,
    pub text: String,
    pub mime_type: String,
}

/// Message posted back by the worker thread.
#[derive(Debug)]
pub struct StampResponse {
    pub token: u64,
    pub result: StampOutcome,
}

/// Handle to a running worker thread and its response router.
pub struct StampWorker {
    requests: mpsc::Sender<StampRequest>,
    pending: PendingMap,
    next_token: AtomicU64,
}

impl StampWorker {
    /// Start the worker thread and the router task.
    ///
    /// Returns `None` when there is no async runtime to host the router or the
    /// thread cannot be spawned; callers then stamp in-context.
    pub fn spawn() -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;

        let (request_tx, request_rx) = mpsc::channel::<StampRequest>();
        let (response_tx, response_rx) = async_mpsc::unbounded_channel::<StampResponse>();

        let spawned = thread::Builder::new()
            .name("stamp-worker".into())
            .spawn(move || run_worker(request_rx, response_tx));
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn stamp worker thread");
            return None;
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        runtime.spawn(route_responses(response_rx, Arc::clone(&pending)));

        info!("Stamp worker started");
        Some(Self {
            requests: request_tx,
            pending,
            next_token: AtomicU64::new(1),
        })
    }

    /// Submit a request and return the receiver for its outcome.
    ///
    /// Fails (returning the request payload back) when the worker is gone.
    pub fn submit(
        &self,
        bytes: Vec<u8>,
        text: &str,
        mime_type: &str,
    ) -> Result<(u64, oneshot::Receiver<StampOutcome>), Vec<u8>> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(token, tx);

        let request = StampRequest {
            token,
            bytes,
            text: text.to_string(),
            mime_type: mime_type.to_string(),
        };

        match self.requests.send(request) {
            Ok(()) => {
                debug!(token, "Stamp request dispatched");
                Ok((token, rx))
            }
            Err(mpsc::SendError(request)) => {
                self.pending_map().remove(&token);
                warn!(token, "Stamp worker is gone");
                Err(request.bytes)
            }
        }
    }

    /// Forget a pending token whose caller stopped waiting.
    pub fn abandon(&self, token: u64) {
        self.pending_map().remove(&token);
    }

    /// Number of requests waiting for a response
    pub fn pending(&self) -> usize {
        self.pending_map().len()
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<StampOutcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StampWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampWorker")
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_worker(
    requests: mpsc::Receiver<StampRequest>,
    responses: async_mpsc::UnboundedSender<StampResponse>,
) {
    while let Ok(request) = requests.recv() {
        let result = render_stamp(&request.bytes, &request.text, &request.mime_type);
        let response = StampResponse {
            token: request.token,
            result,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("Stamp worker thread exiting");
}

async fn route_responses(
    mut responses: async_mpsc::UnboundedReceiver<StampResponse>,
    pending: PendingMap,
) {
    while let Some(response) = responses.recv().await {
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&response.token);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.result);
            }
            None => debug!(token = response.token, "Dropping response for abandoned stamp request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_are_unique_and_matched() {
        let worker = StampWorker::spawn().expect("runtime present");

        let (t1, rx1) = worker.submit(b"garbage-1".to_vec(), "a", "image/png").unwrap();
        let (t2, rx2) = worker.submit(b"garbage-2".to_vec(), "b", "image/png").unwrap();
        assert_ne!(t1, t2);

        // Both fail to decode, but each caller gets its own response
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn test_spawn_without_runtime_is_none() {
        assert!(StampWorker::spawn().is_none());
    }
}
