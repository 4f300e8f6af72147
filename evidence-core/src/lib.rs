//! Evidence Core - image cache and blob store for local test evidence
//!
//! This crate keeps screenshots and photos collected as test evidence: it
//! stores them durably, burns the capture timestamp into a display rendition,
//! and hands out revocable handles from a bounded in-memory cache.
//!
//! # Features
//!
//! - Durable per-blob storage (`{id}_base`, `{id}_stamped`, `{id}_original`)
//! - Timestamp stamping on a dedicated worker thread with in-context fallback
//! - Bounded LRU cache of revocable handles with coalesced concurrent loads
//! - Write-then-swap edits that keep the pre-edit original exactly once
//! - Projects and numbered test cases persisted as JSON
//!
//! # Example
//!
//! ```no_run
//! use evidence_core::{Config, EvidenceLibrary, NewEvidence};
//!
//! # async fn example(png: Vec<u8>) -> evidence_core::Result<()> {
//! let library = EvidenceLibrary::open(Config::ephemeral()).await?;
//!
//! // Ingest: stores base + stamped and registers display handles
//! let record = library
//!     .add_evidence(NewEvidence::new(png, "login.png", chrono::Utc::now()))
//!     .await?;
//!
//! // Later: materialize handles again (cache hit or store read)
//! if let Some(urls) = library.request_display(&record.id).await? {
//!     let handle = library.resolve_url(&urls.stamped_url).expect("live handle");
//!     assert!(handle.is_valid());
//! }
//!
//! library.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod library;
pub mod registry;
pub mod stamp;
pub mod store;
pub mod timefmt;

// Re-export main types for convenience
pub use cache::{CacheStats, HandleObserver, ImageCache, Rewrite, DEFAULT_CAPACITY};
pub use config::Config;
pub use error::{ImageError, Result};
pub use handle::{DisplayUrls, HandlePair, ImageHandle, HANDLE_URL_PREFIX};
pub use library::{EvidenceLibrary, NewEvidence};
pub use registry::{EvidenceRecord, Project, Registry, SharedRegistry, TestCase};
pub use stamp::{StampedImage, Stamper};
pub use store::{artifact_key, ArtifactKind, BlobStore, FileBlobStore, MemoryBlobStore, StoreError};
pub use timefmt::{format_display_time, parse_local_datetime};
