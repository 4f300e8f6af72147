//! Export command implementation.
//!
//! Writes the current project as three folder trees under the output
//! directory:
//!
//! - `Before/` the image as captured (the pre-edit original for edited images)
//! - `After/` the edited image, for edited evidence only
//! - `Export/` the stamped image, or the current image with `--no-timestamp`
//!
//! Each tree has one folder per test case plus `Unclassified`, and files are
//! numbered by capture time.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use evidence_core::{ArtifactKind, EvidenceLibrary, EvidenceRecord, Project};
use serde::Serialize;
use tracing::{debug, warn};

use crate::utils::{extension_for, open_library, print_json, sanitize_file_name};
use crate::{GlobalArgs, OutputFormat};

const UNCLASSIFIED_FOLDER: &str = "Unclassified";

#[derive(Debug, Default, Serialize)]
struct ExportSummary {
    output: PathBuf,
    files_written: usize,
    skipped: Vec<String>,
}

/// Export the current project.
pub async fn execute(global: &GlobalArgs, out: &Path, no_timestamp: bool) -> Result<()> {
    let library = open_library(global).await?;
    let project = library.current_project().context("No project selected")?;

    let mut summary = ExportSummary {
        output: out.to_path_buf(),
        ..ExportSummary::default()
    };

    for (folder, mut records) in group_by_folder(&project) {
        records.sort_by_key(|ev| ev.captured_at);
        for (index, record) in records.iter().enumerate() {
            let stem = entry_stem(index, record);
            let written =
                export_record(&library, record, out, &folder, &stem, no_timestamp).await?;
            if written == 0 {
                warn!(id = %record.id, "No stored artifacts, skipping");
                summary.skipped.push(record.id.clone());
            }
            summary.files_written += written;
        }
    }

    match global.format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text if !global.quiet => {
            println!(
                "{} {} files to {}",
                "Exported".green(),
                summary.files_written,
                out.display()
            );
            for id in &summary.skipped {
                println!("  {} {} (image data missing)", "skipped".yellow(), id);
            }
        }
        OutputFormat::Text => {}
    }
    library.close().await?;
    Ok(())
}

/// Records grouped by export folder, test cases first in their list order.
fn group_by_folder(project: &Project) -> Vec<(String, Vec<&EvidenceRecord>)> {
    let mut groups: Vec<(String, Vec<&EvidenceRecord>)> = project
        .test_cases
        .iter()
        .map(|tc| {
            (
                sanitize_file_name(&tc.name),
                project.evidence_in(Some(tc.id.as_str())).collect(),
            )
        })
        .collect();

    let unclassified: Vec<_> = project.evidence_in(None).collect();
    if !unclassified.is_empty() {
        groups.push((UNCLASSIFIED_FOLDER.to_string(), unclassified));
    }
    groups.retain(|(_, records)| !records.is_empty());
    groups
}

/// File stem for the `index`-th record of a folder: `001_<comment>`.
fn entry_stem(index: usize, record: &EvidenceRecord) -> String {
    let label = if record.comment.trim().is_empty() {
        format!("evidence-{}", index + 1)
    } else {
        sanitize_file_name(record.comment.trim())
    };
    format!("{:03}_{}", index + 1, label)
}

async fn export_record(
    library: &EvidenceLibrary,
    record: &EvidenceRecord,
    out: &Path,
    folder: &str,
    stem: &str,
    no_timestamp: bool,
) -> Result<usize> {
    let id = record.id.as_str();
    let base = library.artifact(id, ArtifactKind::Base).await?;
    let Some(base) = base else {
        return Ok(0);
    };

    let before = if record.is_edited {
        library.artifact(id, ArtifactKind::Original).await?
    } else {
        None
    };
    let export = if no_timestamp {
        None
    } else {
        library.artifact(id, ArtifactKind::Stamped).await?
    };

    let mut written = 0;
    match &before {
        Some(original) => {
            write_entry(out, "Before", folder, stem, original, &record.mime_type)?;
            write_entry(out, "After", folder, stem, &base, &record.mime_type)?;
            written += 2;
        }
        None => {
            write_entry(out, "Before", folder, stem, &base, &record.mime_type)?;
            written += 1;
        }
    }
    write_entry(
        out,
        "Export",
        folder,
        stem,
        export.as_deref().unwrap_or(&base),
        &record.mime_type,
    )?;
    Ok(written + 1)
}

fn write_entry(
    out: &Path,
    tree: &str,
    folder: &str,
    stem: &str,
    bytes: &[u8],
    mime_type: &str,
) -> Result<()> {
    let dir = out.join(tree).join(folder);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let path = dir.join(format!("{stem}.{}", extension_for(mime_type)));
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Exported");
    Ok(())
}
