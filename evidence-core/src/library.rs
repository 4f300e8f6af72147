//! Presentation-facing evidence library.
//!
//! [`EvidenceLibrary`] owns the blob store, the stamping service, the image
//! cache and the registry, and exposes every operation the presentation layer
//! needs. It is an ordinary value with an explicit [`open`](EvidenceLibrary::open)
//! / [`close`](EvidenceLibrary::close) lifecycle; nothing is global.
//!
//! Registry guards are never held while calling into the cache, because the
//! cache updates records through its [`HandleObserver`](crate::cache::HandleObserver).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::cache::{CacheStats, ImageCache};
use crate::config::Config;
use crate::error::{ImageError, Result};
use crate::handle::{DisplayUrls, ImageHandle};
use crate::registry::{EvidenceRecord, Project, Registry, RegistryFile, SharedRegistry, TestCase};
use crate::stamp::{detect_mime, Stamper};
use crate::store::{artifact_key, ArtifactKind, BlobStore, FileBlobStore, MemoryBlobStore};
use crate::timefmt::format_display_time;

/// An image to ingest.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    pub captured_at: DateTime<Utc>,
    pub test_case_id: Option<String>,
    pub comment: String,
}

impl NewEvidence {
    pub fn new(bytes: Vec<u8>, original_filename: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            bytes,
            original_filename: original_filename.into(),
            captured_at,
            test_case_id: None,
            comment: String::new(),
        }
    }

    pub fn in_test_case(mut self, test_case_id: impl Into<String>) -> Self {
        self.test_case_id = Some(test_case_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// The evidence library.
pub struct EvidenceLibrary {
    config: Config,
    store: Arc<dyn BlobStore>,
    registry: SharedRegistry,
    registry_file: Option<RegistryFile>,
    cache: ImageCache,
    stamper: Stamper,
}

impl EvidenceLibrary {
    /// Open the library described by `config`.
    ///
    /// A persistent library keeps its blobs and `projects.json` in
    /// `config.data_dir`; an ephemeral one keeps everything in memory.
    #[instrument(level = "debug", skip_all, fields(data_dir = %config.data_dir.display(), ephemeral = config.ephemeral))]
    pub async fn open(config: Config) -> Result<Self> {
        if config.ephemeral {
            return Self::with_store(config, Arc::new(MemoryBlobStore::new()), None).await;
        }
        let store = FileBlobStore::open(&config.data_dir).await?;
        let registry_file = RegistryFile::in_dir(&config.data_dir);
        Self::with_store(config, Arc::new(store), Some(registry_file)).await
    }

    /// Open over an explicit store and optional registry file.
    pub async fn with_store(
        config: Config,
        store: Arc<dyn BlobStore>,
        registry_file: Option<RegistryFile>,
    ) -> Result<Self> {
        let mut registry = match &registry_file {
            Some(file) => file.load().await?,
            None => Registry::new(),
        };
        let created_default = registry.projects().is_empty();
        registry.ensure_current_project();

        let registry = SharedRegistry::new(registry);
        let cache = ImageCache::new(
            Arc::clone(&store),
            Arc::new(registry.clone()),
            config.cache_capacity,
            config.load_timeout,
        );
        let stamper = Stamper::new(config.stamp_worker, config.load_timeout);

        let library = Self {
            config,
            store,
            registry,
            registry_file,
            cache,
            stamper,
        };
        if created_default {
            library.persist().await?;
        }

        info!(
            capacity = library.cache.capacity(),
            offthread_stamping = library.stamper.is_offthread(),
            "Evidence library opened"
        );
        Ok(library)
    }

    /// Wait for in-flight work, release every handle and persist the registry.
    pub async fn close(self) -> Result<()> {
        let released = self.cache.drain_and_evict_all().await;
        self.persist().await?;
        info!(released, "Evidence library closed");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Look up a live handle by URL.
    pub fn resolve_url(&self, url: &str) -> Option<ImageHandle> {
        self.cache.resolve_url(url)
    }

    /// Bytes behind a display URL.
    ///
    /// Fails with [`ImageError::InvalidHandle`] once the handle has been
    /// revoked; callers recover by requesting the display again.
    pub fn read_url(&self, url: &str) -> Result<Arc<[u8]>> {
        self.cache
            .resolve_url(url)
            .and_then(|handle| handle.bytes())
            .ok_or_else(|| ImageError::InvalidHandle(url.to_string()))
    }

    /// Capture time rendered the way it is burned into images.
    pub fn display_time(&self, instant: DateTime<Utc>) -> String {
        format_display_time(instant, self.config.display_offset)
    }

    // -- Images --------------------------------------------------------------

    /// Materialize display URLs for `id`. `None` means the artifacts are gone
    /// and a placeholder should be shown.
    #[instrument(level = "debug", skip(self))]
    pub async fn request_display(&self, id: &str) -> Result<Option<DisplayUrls>> {
        self.record(id)?;
        match self.cache.load(id).await {
            Ok(pair) => Ok(Some(pair.urls())),
            Err(ImageError::ArtifactMissing { .. }) => {
                warn!(id, "Evidence artifacts missing, showing placeholder");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Ingest a new image into the current project.
    ///
    /// If stamping fails the unstamped bytes are stored as the stamped
    /// rendition so the image is still usable.
    #[instrument(level = "debug", skip_all, fields(filename = %new.original_filename, size = new.bytes.len()))]
    pub async fn add_evidence(&self, new: NewEvidence) -> Result<EvidenceRecord> {
        let mime = detect_mime(&new.bytes)
            .ok_or_else(|| {
                ImageError::InvalidInput(format!("{} is not a supported image", new.original_filename))
            })?
            .to_string();

        let mut record = EvidenceRecord::new(
            new.original_filename,
            mime.clone(),
            new.captured_at,
            new.test_case_id,
        );
        record.comment = new.comment;
        let id = record.id.clone();
        self.registry.write().add_record(record)?;

        let text = self.display_time(new.captured_at);
        let stamped = match self.stamper.stamp(new.bytes.clone(), &text, &mime).await {
            Ok(stamped) => stamped.bytes,
            Err(e) => {
                warn!(id = %id, error = %e, "Stamping failed, storing unstamped image");
                new.bytes.clone()
            }
        };

        if let Err(e) = self.write_artifacts(&id, &new.bytes, &stamped).await {
            self.registry.write().remove_record(&id);
            return Err(e);
        }
        self.cache.insert(&id, new.bytes, stamped, &mime).await;
        self.persist().await?;

        info!(id = %id, "Evidence added");
        self.record(&id)
    }

    async fn write_artifacts(&self, id: &str, base: &[u8], stamped: &[u8]) -> Result<()> {
        self.store
            .put(&artifact_key(id, ArtifactKind::Base), base.to_vec())
            .await?;
        if let Err(e) = self
            .store
            .put(&artifact_key(id, ArtifactKind::Stamped), stamped.to_vec())
            .await
        {
            if let Err(rollback) = self.store.delete(&artifact_key(id, ArtifactKind::Base)).await {
                warn!(id, error = %rollback, "Failed to roll back base after stamped write failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Replace the base image of `id` with an edited version and return the
    /// new stamped URL.
    ///
    /// The pre-edit base is kept as the `original` artifact on the first edit
    /// only. Nothing is written when stamping the new base fails.
    #[instrument(level = "debug", skip(self, new_base, display_text), fields(size = new_base.len()))]
    pub async fn commit_edit(
        &self,
        id: &str,
        new_base: Vec<u8>,
        mime_type: &str,
        display_text: &str,
    ) -> Result<String> {
        self.record(id)?;
        let stamped = self
            .stamper
            .stamp(new_base.clone(), display_text, mime_type)
            .await?;

        let pair = self
            .cache
            .invalidate_and_rewrite(id, new_base, stamped.bytes, &stamped.mime_type, true)
            .await?;

        {
            let mut registry = self.registry.write();
            let record = registry.record_mut(id)?;
            record.is_edited = true;
            record.mime_type = stamped.mime_type;
        }
        self.persist().await?;

        info!(id, "Edit committed");
        Ok(pair.stamped.url().to_string())
    }

    /// Change the capture time of `id` and re-stamp its current base.
    ///
    /// The base is read while `id` is claimed, so an edit committed
    /// concurrently is never overwritten with the pre-edit pixels.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_capture_time(&self, id: &str, captured_at: DateTime<Utc>) -> Result<DisplayUrls> {
        let record = self.record(id)?;
        let text = self.display_time(captured_at);

        let rewrite = self.cache.begin_rewrite(id).await;
        let base = rewrite
            .read(ArtifactKind::Base)
            .await?
            .ok_or_else(|| ImageError::ArtifactMissing { id: id.to_string() })?;
        let mime = detect_mime(&base)
            .map(str::to_string)
            .unwrap_or(record.mime_type);
        let stamped = self.stamper.stamp(base.clone(), &text, &mime).await?;
        let pair = rewrite
            .commit(base, stamped.bytes, &stamped.mime_type, false)
            .await?;

        self.registry.write().record_mut(id)?.captured_at = captured_at;
        self.persist().await?;
        Ok(pair.urls())
    }

    /// Make the preserved original the base again. The `original` artifact is
    /// kept.
    #[instrument(level = "debug", skip(self))]
    pub async fn restore_original(&self, id: &str) -> Result<DisplayUrls> {
        let record = self.record(id)?;
        let text = self.display_time(record.captured_at);

        let rewrite = self.cache.begin_rewrite(id).await;
        let original = rewrite
            .read(ArtifactKind::Original)
            .await?
            .ok_or_else(|| ImageError::InvalidInput(format!("{id} has never been edited")))?;
        let mime = detect_mime(&original)
            .map(str::to_string)
            .unwrap_or(record.mime_type);
        let stamped = self.stamper.stamp(original.clone(), &text, &mime).await?;
        let pair = rewrite
            .commit(original, stamped.bytes, &stamped.mime_type, false)
            .await?;

        {
            let mut registry = self.registry.write();
            let record = registry.record_mut(id)?;
            record.is_edited = false;
            record.mime_type = stamped.mime_type;
        }
        self.persist().await?;
        info!(id, "Original restored");
        Ok(pair.urls())
    }

    /// Raw bytes of a stored artifact.
    pub async fn artifact(&self, id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(&artifact_key(id, kind)).await?)
    }

    /// Delete `id` with all of its artifacts. Removing an unknown id succeeds.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.cache.remove(id).await?;
        let removed = self.registry.write().remove_record(id).is_some();
        if removed {
            self.persist().await?;
            info!(id, "Evidence removed");
        }
        Ok(())
    }

    /// Release every handle now. Fails with [`ImageError::Busy`] while loads
    /// are in flight.
    pub fn evict_all(&self) -> Result<usize> {
        self.cache.evict_all()
    }

    /// Wipe every project, record and artifact.
    #[instrument(level = "debug", skip(self))]
    pub async fn clear_all(&self) -> Result<()> {
        self.cache.drain_and_evict_all().await;
        self.store.clear().await?;
        {
            let mut registry = self.registry.write();
            registry.clear();
            registry.ensure_current_project();
        }
        self.persist().await?;
        info!("All evidence cleared");
        Ok(())
    }

    // -- Registry ------------------------------------------------------------

    pub fn projects(&self) -> Vec<Project> {
        self.registry.read().projects().to_vec()
    }

    pub fn current_project(&self) -> Option<Project> {
        self.registry.read().current_project().cloned()
    }

    /// Record of `id` with its current handle fields.
    pub fn record(&self, id: &str) -> Result<EvidenceRecord> {
        self.registry
            .read()
            .get_record(id)
            .cloned()
            .ok_or_else(|| ImageError::EvidenceNotFound(id.to_string()))
    }

    /// Records of the current project.
    pub fn records(&self) -> Vec<EvidenceRecord> {
        self.registry.read().records_in_current_project().to_vec()
    }

    pub async fn add_project(&self, name: &str) -> Result<Project> {
        let project = self.registry.write().add_project(name);
        self.persist().await?;
        Ok(project)
    }

    pub async fn switch_project(&self, id: &str) -> Result<bool> {
        let switched = self.registry.write().switch_project(id)?;
        if switched {
            self.persist().await?;
        }
        Ok(switched)
    }

    pub async fn rename_project(&self, id: &str, name: &str) -> Result<()> {
        self.registry.write().rename_project(id, name)?;
        self.persist().await
    }

    /// Delete a project with all of its evidence and artifacts.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_project(&self, id: &str) -> Result<()> {
        let ids: Vec<String> = {
            let registry = self.registry.read();
            let project = registry
                .project(id)
                .ok_or_else(|| ImageError::ProjectNotFound(id.to_string()))?;
            project.evidence.iter().map(|ev| ev.id.clone()).collect()
        };
        for evidence_id in &ids {
            self.cache.remove(evidence_id).await?;
        }
        self.registry.write().delete_project(id)?;
        self.persist().await?;
        info!(id, evidence = ids.len(), "Project deleted");
        Ok(())
    }

    pub async fn add_test_case(&self, name: &str, index: Option<usize>) -> Result<TestCase> {
        let test_case = self.registry.write().add_test_case(name, index)?;
        self.persist().await?;
        Ok(test_case)
    }

    /// Remove a test case of the current project with all of its evidence.
    /// Returns the number of removed records.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_test_case(&self, id: &str) -> Result<usize> {
        let ids: Vec<String> = {
            let registry = self.registry.read();
            let project = registry.current_project().ok_or(ImageError::NoCurrentProject)?;
            if project.test_case(id).is_none() {
                return Err(ImageError::TestCaseNotFound(id.to_string()));
            }
            project.evidence_in(Some(id)).map(|ev| ev.id.clone()).collect()
        };
        for evidence_id in &ids {
            self.cache.remove(evidence_id).await?;
        }
        let removed = self.registry.write().remove_test_case(id)?;
        self.persist().await?;
        Ok(removed.len())
    }

    /// Move evidence to another test case (`None` = unclassified).
    pub async fn move_evidence(&self, id: &str, test_case_id: Option<&str>) -> Result<()> {
        self.registry.write().move_record(id, test_case_id)?;
        self.persist().await
    }

    pub async fn set_comment(&self, id: &str, comment: &str) -> Result<()> {
        self.registry.write().set_comment(id, comment)?;
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let Some(file) = &self.registry_file else {
            return Ok(());
        };
        let json = self.registry.read().to_json()?;
        file.save(json).await
    }
}

impl std::fmt::Debug for EvidenceLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceLibrary")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("stamper", &self.stamper)
            .finish()
    }
}
