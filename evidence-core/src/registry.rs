//! Project, test case and evidence metadata.
//!
//! The registry is a plain in-memory index (projects -> test cases ->
//! evidence records) persisted as one JSON document. Image bytes never live
//! here; each record only mirrors the handles the image cache currently holds
//! for it, and those are never written to disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cache::HandleObserver;
use crate::error::{ImageError, Result};
use crate::handle::{DisplayUrls, HandlePair};

/// File name of the persisted registry inside the data directory.
pub const REGISTRY_FILE_NAME: &str = "projects.json";

/// Name given to the project created when the last one is deleted.
pub const DEFAULT_PROJECT_NAME: &str = "New Project";

/// Metadata of one evidence image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub original_filename: String,
    #[serde(default)]
    pub comment: String,
    /// `None` means unclassified
    #[serde(default)]
    pub test_case_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub mime_type: String,
    #[serde(default)]
    pub is_edited: bool,
    /// Handles currently held by the image cache
    #[serde(skip)]
    pub handles: Option<HandlePair>,
}

impl EvidenceRecord {
    pub fn new(
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        captured_at: DateTime<Utc>,
        test_case_id: Option<String>,
    ) -> Self {
        Self {
            id: format!("evidence-{}", Uuid::new_v4()),
            original_filename: original_filename.into(),
            comment: String::new(),
            test_case_id,
            captured_at,
            mime_type: mime_type.into(),
            is_edited: false,
            handles: None,
        }
    }

    /// URLs of the resident handles, if both are still valid.
    pub fn display_urls(&self) -> Option<DisplayUrls> {
        self.handles
            .as_ref()
            .filter(|pair| pair.is_valid())
            .map(HandlePair::urls)
    }
}

/// A numbered group of evidence inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub number: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A named collection of test cases and evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("project-{}", Uuid::new_v4()),
            name: name.into(),
            test_cases: Vec::new(),
            evidence: Vec::new(),
        }
    }

    /// The number following the highest `No.N` test case name (1 when none).
    pub fn next_test_case_number(&self) -> u32 {
        self.test_cases
            .iter()
            .filter_map(|tc| parse_case_number(&tc.name))
            .max()
            .map_or(1, |n| n + 1)
    }

    pub fn test_case(&self, id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.id == id)
    }

    /// Evidence of one test case, or unclassified evidence for `None`.
    pub fn evidence_in<'a>(
        &'a self,
        test_case_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a EvidenceRecord> + 'a {
        self.evidence
            .iter()
            .filter(move |ev| ev.test_case_id.as_deref() == test_case_id)
    }
}

fn parse_case_number(name: &str) -> Option<u32> {
    let digits: String = name
        .strip_prefix("No.")?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|n| *n > 0)
}

fn require_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ImageError::InvalidInput("name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// Persisted registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    current_project_id: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ImageError::Registry(format!("invalid registry document: {e}")))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| ImageError::Registry(format!("failed to serialize registry: {e}")))
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn current_project_id(&self) -> Option<&str> {
        self.current_project_id.as_deref()
    }

    pub fn current_project(&self) -> Option<&Project> {
        let id = self.current_project_id.as_deref()?;
        self.projects.iter().find(|p| p.id == id)
    }

    fn current_project_mut(&mut self) -> Result<&mut Project> {
        let id = self
            .current_project_id
            .as_deref()
            .ok_or(ImageError::NoCurrentProject)?;
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(ImageError::NoCurrentProject)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    fn project_mut(&mut self, id: &str) -> Result<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ImageError::ProjectNotFound(id.to_string()))
    }

    /// Make sure a current project exists, creating a default one if needed.
    pub fn ensure_current_project(&mut self) -> &Project {
        let valid = self
            .current_project_id
            .as_deref()
            .is_some_and(|id| self.projects.iter().any(|p| p.id == id));
        if !valid {
            match self.projects.first() {
                Some(first) => self.current_project_id = Some(first.id.clone()),
                None => {
                    self.add_project(DEFAULT_PROJECT_NAME);
                }
            }
        }
        let id = self.current_project_id.clone().unwrap_or_default();
        let index = self.projects.iter().position(|p| p.id == id).unwrap_or(0);
        &self.projects[index]
    }

    /// Add a project and switch to it.
    pub fn add_project(&mut self, name: &str) -> Project {
        let name = match name.trim() {
            "" => DEFAULT_PROJECT_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };
        let project = Project::new(name);
        self.current_project_id = Some(project.id.clone());
        self.projects.push(project.clone());
        project
    }

    /// Switch the current project. Returns `false` if it already was current.
    pub fn switch_project(&mut self, id: &str) -> Result<bool> {
        if self.project(id).is_none() {
            return Err(ImageError::ProjectNotFound(id.to_string()));
        }
        if self.current_project_id.as_deref() == Some(id) {
            return Ok(false);
        }
        self.current_project_id = Some(id.to_string());
        Ok(true)
    }

    pub fn rename_project(&mut self, id: &str, name: &str) -> Result<()> {
        let name = require_name(name)?;
        self.project_mut(id)?.name = name;
        Ok(())
    }

    /// Remove a project and return it. The current project moves to the first
    /// remaining project, or a fresh default project when none remain.
    pub fn delete_project(&mut self, id: &str) -> Result<Project> {
        let index = self
            .projects
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ImageError::ProjectNotFound(id.to_string()))?;
        let removed = self.projects.remove(index);
        if self.current_project_id.as_deref() == Some(id) {
            self.current_project_id = self.projects.first().map(|p| p.id.clone());
        }
        self.ensure_current_project();
        Ok(removed)
    }

    /// Add a test case to the current project. An empty name becomes `No.N`.
    /// `index` inserts at a position instead of appending.
    pub fn add_test_case(&mut self, name: &str, index: Option<usize>) -> Result<TestCase> {
        let project = self.current_project_mut()?;
        let number = project.next_test_case_number();
        let name = match name.trim() {
            "" => format!("No.{number}"),
            trimmed => trimmed.to_string(),
        };
        let test_case = TestCase {
            id: format!("tc-{}", Uuid::new_v4()),
            number,
            name,
            created_at: Utc::now(),
        };
        match index {
            Some(i) if i < project.test_cases.len() => project.test_cases.insert(i, test_case.clone()),
            _ => project.test_cases.push(test_case.clone()),
        }
        Ok(test_case)
    }

    /// Remove a test case from the current project along with its evidence.
    /// Returns the removed evidence records.
    pub fn remove_test_case(&mut self, id: &str) -> Result<Vec<EvidenceRecord>> {
        let project = self.current_project_mut()?;
        let index = project
            .test_cases
            .iter()
            .position(|tc| tc.id == id)
            .ok_or_else(|| ImageError::TestCaseNotFound(id.to_string()))?;
        project.test_cases.remove(index);

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut project.evidence)
            .into_iter()
            .partition(|ev| ev.test_case_id.as_deref() == Some(id));
        project.evidence = kept;
        Ok(removed)
    }

    /// Add a record to the current project.
    pub fn add_record(&mut self, record: EvidenceRecord) -> Result<()> {
        let project = self.current_project_mut()?;
        if let Some(tc) = record.test_case_id.as_deref() {
            if project.test_case(tc).is_none() {
                return Err(ImageError::TestCaseNotFound(tc.to_string()));
            }
        }
        project.evidence.push(record);
        Ok(())
    }

    /// Remove a record from whichever project owns it.
    pub fn remove_record(&mut self, id: &str) -> Option<EvidenceRecord> {
        self.projects.iter_mut().find_map(|project| {
            let index = project.evidence.iter().position(|ev| ev.id == id)?;
            Some(project.evidence.remove(index))
        })
    }

    pub fn get_record(&self, id: &str) -> Option<&EvidenceRecord> {
        self.projects
            .iter()
            .flat_map(|p| p.evidence.iter())
            .find(|ev| ev.id == id)
    }

    pub fn record_mut(&mut self, id: &str) -> Result<&mut EvidenceRecord> {
        self.projects
            .iter_mut()
            .flat_map(|p| p.evidence.iter_mut())
            .find(|ev| ev.id == id)
            .ok_or_else(|| ImageError::EvidenceNotFound(id.to_string()))
    }

    pub fn records_in_current_project(&self) -> &[EvidenceRecord] {
        self.current_project()
            .map(|p| p.evidence.as_slice())
            .unwrap_or_default()
    }

    /// Move a record to another test case of its project (`None` =
    /// unclassified).
    pub fn move_record(&mut self, id: &str, test_case_id: Option<&str>) -> Result<()> {
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.evidence.iter().any(|ev| ev.id == id))
            .ok_or_else(|| ImageError::EvidenceNotFound(id.to_string()))?;
        if let Some(tc) = test_case_id {
            if project.test_case(tc).is_none() {
                return Err(ImageError::TestCaseNotFound(tc.to_string()));
            }
        }
        if let Some(record) = project.evidence.iter_mut().find(|ev| ev.id == id) {
            record.test_case_id = test_case_id.map(str::to_string);
        }
        Ok(())
    }

    pub fn set_comment(&mut self, id: &str, comment: &str) -> Result<()> {
        self.record_mut(id)?.comment = comment.to_string();
        Ok(())
    }

    /// Every evidence id across all projects.
    pub fn all_record_ids(&self) -> Vec<String> {
        self.projects
            .iter()
            .flat_map(|p| p.evidence.iter().map(|ev| ev.id.clone()))
            .collect()
    }

    /// Drop all projects and evidence.
    pub fn clear(&mut self) {
        self.projects.clear();
        self.current_project_id = None;
    }
}

/// Registry shared between the library and the image cache.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<RwLock<Registry>>);

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandleObserver for SharedRegistry {
    fn handles_loaded(&self, id: &str, handles: &HandlePair) {
        if let Ok(record) = self.write().record_mut(id) {
            record.handles = Some(handles.clone());
        }
    }

    fn handles_released(&self, id: &str) {
        if let Ok(record) = self.write().record_mut(id) {
            record.handles = None;
        }
    }
}

/// JSON file holding the registry.
#[derive(Debug, Clone)]
pub struct RegistryFile {
    path: PathBuf,
}

impl RegistryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry file inside a data directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(REGISTRY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry. A missing file yields an empty registry.
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Registry> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let registry = Registry::from_json(&bytes)?;
                info!(projects = registry.projects.len(), "Registry loaded");
                Ok(registry)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry file yet");
                Ok(Registry::new())
            }
            Err(e) => Err(ImageError::Registry(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Write a serialized registry through a temporary file.
    pub async fn save(&self, json: Vec<u8>) -> Result<()> {
        let tmp = self.path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let write_err = |e: std::io::Error| {
            ImageError::Registry(format!("failed to write {}: {e}", self.path.display()))
        };
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        debug!(path = %self.path.display(), "Registry saved");
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageError::Registry(format!(
                "failed to delete {}: {e}",
                self.path.display()
            ))),
        }
    }
}
