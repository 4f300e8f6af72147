//! Library configuration module
//!
//! Loads configuration from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::cache::DEFAULT_CAPACITY;
use crate::timefmt::{default_display_offset, parse_offset};

/// Library configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding blobs and the registry file (default: ./evidence-data)
    pub data_dir: PathBuf,
    /// Maximum number of resident image entries (default: 50)
    pub cache_capacity: usize,
    /// Stamp on a dedicated worker thread (default: true)
    pub stamp_worker: bool,
    /// Bound on store reads and stamping; `None` disables (default: 30s)
    pub load_timeout: Option<Duration>,
    /// Offset used to render capture timestamps (default: +09:00)
    pub display_offset: FixedOffset,
    /// Keep everything in memory and never touch the data directory (default: false)
    pub ephemeral: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./evidence-data"),
            cache_capacity: DEFAULT_CAPACITY,
            stamp_worker: true,
            load_timeout: Some(Duration::from_secs(30)),
            display_offset: default_display_offset(),
            ephemeral: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("EVIDENCE_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let cache_capacity = lookup("EVIDENCE_CACHE_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|c| *c > 0)
            .unwrap_or(defaults.cache_capacity);

        // Enabled unless explicitly switched off
        let stamp_worker = lookup("EVIDENCE_STAMP_WORKER")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "off"))
            .unwrap_or(defaults.stamp_worker);

        let load_timeout = match lookup("EVIDENCE_LOAD_TIMEOUT_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.load_timeout,
        };

        let display_offset = lookup("EVIDENCE_DISPLAY_OFFSET")
            .and_then(|v| parse_offset(&v))
            .unwrap_or(defaults.display_offset);

        let ephemeral = lookup("EVIDENCE_EPHEMERAL")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "on"))
            .unwrap_or(defaults.ephemeral);

        Self {
            data_dir,
            cache_capacity,
            stamp_worker,
            load_timeout,
            display_offset,
            ephemeral,
        }
    }

    /// In-memory configuration without a worker thread, for tests and
    /// throwaway sessions.
    pub fn ephemeral() -> Self {
        Self {
            ephemeral: true,
            stamp_worker: false,
            ..Self::default()
        }
    }
}
