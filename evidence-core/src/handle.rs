//! Revocable image handles.
//!
//! A handle is the process-local stand-in for a browser object URL: an opaque
//! `blob:evidence/<uuid>` URL that resolves to image bytes until it is
//! revoked. Handles can only be created and revoked by the image cache
//! (both operations are crate-private); presentation code can only read them
//! and check whether they are still valid.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// URL scheme prefix of every handle.
pub const HANDLE_URL_PREFIX: &str = "blob:evidence/";

struct HandleInner {
    url: String,
    mime_type: String,
    bytes: Mutex<Option<Arc<[u8]>>>,
}

/// A revocable reference to decoded image bytes.
///
/// Clones share the same underlying resource; equality is identity.
#[derive(Clone)]
pub struct ImageHandle {
    inner: Arc<HandleInner>,
}

impl ImageHandle {
    pub(crate) fn new(bytes: Vec<u8>, mime_type: &str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                url: format!("{}{}", HANDLE_URL_PREFIX, Uuid::new_v4()),
                mime_type: mime_type.to_string(),
                bytes: Mutex::new(Some(Arc::from(bytes))),
            }),
        }
    }

    /// Release the bytes. Returns `false` if the handle was already revoked.
    pub(crate) fn revoke(&self) -> bool {
        self.slot().take().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<[u8]>>> {
        self.inner.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The handle URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Mime type of the referenced image
    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    /// Whether the handle still resolves to bytes
    pub fn is_valid(&self) -> bool {
        self.slot().is_some()
    }

    /// The referenced bytes, or `None` once revoked
    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        self.slot().clone()
    }

    /// Size in bytes, zero once revoked
    pub fn len(&self) -> usize {
        self.slot().as_ref().map_or(0, |bytes| bytes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ImageHandle {}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("url", &self.inner.url)
            .field("mime_type", &self.inner.mime_type)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// The two handles materialized for one evidence image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlePair {
    /// Base image with the timestamp overlay
    pub stamped: ImageHandle,
    /// Current authoritative base image
    pub base: ImageHandle,
}

impl HandlePair {
    /// Both handles still resolve
    pub fn is_valid(&self) -> bool {
        self.stamped.is_valid() && self.base.is_valid()
    }

    /// URLs handed to presentation code
    pub fn urls(&self) -> DisplayUrls {
        DisplayUrls {
            stamped_url: self.stamped.url().to_string(),
            base_url: self.base.url().to_string(),
        }
    }
}

/// URLs of a materialized evidence image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayUrls {
    pub stamped_url: String,
    pub base_url: String,
}

/// URL -> handle lookup for every live handle.
///
/// Mirrors the object URL table of a browser: creating a handle registers its
/// URL, revoking it unregisters the URL.
#[derive(Default)]
pub(crate) struct HandleTable {
    live: DashMap<String, ImageHandle>,
}

impl HandleTable {
    pub(crate) fn create(&self, bytes: Vec<u8>, mime_type: &str) -> ImageHandle {
        let handle = ImageHandle::new(bytes, mime_type);
        self.live.insert(handle.url().to_string(), handle.clone());
        handle
    }

    pub(crate) fn create_pair(
        &self,
        base: Vec<u8>,
        stamped: Vec<u8>,
        mime_type: &str,
    ) -> HandlePair {
        HandlePair {
            stamped: self.create(stamped, mime_type),
            base: self.create(base, mime_type),
        }
    }

    pub(crate) fn revoke(&self, handle: &ImageHandle) {
        self.live.remove(handle.url());
        handle.revoke();
    }

    pub(crate) fn revoke_pair(&self, pair: &HandlePair) {
        self.revoke(&pair.stamped);
        self.revoke(&pair.base);
    }

    pub(crate) fn resolve(&self, url: &str) -> Option<ImageHandle> {
        self.live
            .get(url)
            .map(|entry| entry.value().clone())
            .filter(ImageHandle::is_valid)
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}
