//! Common utility functions shared across CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use evidence_core::{parse_local_datetime, Config, EvidenceLibrary, EvidenceRecord};
use tracing::debug;

use crate::GlobalArgs;

/// Open the library using environment configuration overridden by flags.
pub async fn open_library(global: &GlobalArgs) -> Result<EvidenceLibrary> {
    let mut config = Config::from_env();
    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
        config.ephemeral = false;
    }
    if let Some(capacity) = global.capacity {
        config.cache_capacity = capacity.max(1);
    }
    if global.no_worker {
        config.stamp_worker = false;
    }
    debug!(?config, "Opening evidence library");

    EvidenceLibrary::open(config)
        .await
        .context("Failed to open evidence library")
}

/// Read an input file.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Read file");
    Ok(bytes)
}

/// Parse a user supplied capture time.
pub fn parse_date(text: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    parse_local_datetime(text, offset).with_context(|| format!("Invalid date: {text}"))
}

/// Modification time of a file, falling back to now.
pub fn file_time(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// File name component of a path as UTF-8.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// Replace characters that are not allowed in file names and cap the length.
///
/// Empty names and names made only of dots (`.`, `..`) become `untitled`.
pub fn sanitize_file_name(name: &str) -> String {
    if name.chars().all(|c| c == '.') {
        return "untitled".to_string();
    }
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(100)
        .collect()
}

/// File extension for an image mime type.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        _ => "jpg",
    }
}

/// One-line summary of a record for text output.
pub fn describe(record: &EvidenceRecord, display_time: &str) -> String {
    let mut line = format!("{}  {}  {}", record.id, display_time, record.original_filename);
    if record.is_edited {
        line.push_str("  [edited]");
    }
    if !record.comment.is_empty() {
        line.push_str(&format!("  \"{}\"", record.comment));
    }
    line
}

/// Print a JSON value on stdout.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}
