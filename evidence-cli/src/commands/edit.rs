//! Commands that replace or re-stamp the stored image of an evidence record.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use evidence_core::stamp::detect_mime;
use tracing::info;

use crate::utils::{open_library, parse_date, print_json, read_input};
use crate::{GlobalArgs, OutputFormat};

/// Commit an edited image for `id`.
pub async fn edit(global: &GlobalArgs, id: &str, file: &Path) -> Result<()> {
    let library = open_library(global).await?;
    let record = library.record(id)?;

    let bytes = read_input(file)?;
    let mime = detect_mime(&bytes)
        .with_context(|| format!("{} is not a supported image", file.display()))?;
    let text = library.display_time(record.captured_at);

    let url = library
        .commit_edit(id, bytes, mime, &text)
        .await
        .with_context(|| format!("Failed to save edit for {id}"))?;
    info!(id, url = %url, "Edit saved");

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "id": id, "stamped_url": url }))?,
        OutputFormat::Text if !global.quiet => {
            println!("{} {}", "Saved edit for".green(), id);
            println!("{} {}", "Stamped:".dimmed(), url);
        }
        OutputFormat::Text => {}
    }
    library.close().await?;
    Ok(())
}

/// Change the capture time of `id`.
pub async fn redate(global: &GlobalArgs, id: &str, date: &str) -> Result<()> {
    let library = open_library(global).await?;
    let captured_at = parse_date(date, library.config().display_offset)?;

    let urls = library
        .update_capture_time(id, captured_at)
        .await
        .with_context(|| format!("Failed to update capture time of {id}"))?;

    match global.format {
        OutputFormat::Json => print_json(&urls)?,
        OutputFormat::Text if !global.quiet => {
            println!(
                "{} {} {}",
                "Re-stamped".green(),
                id,
                library.display_time(captured_at).bold()
            );
        }
        OutputFormat::Text => {}
    }
    library.close().await?;
    Ok(())
}

/// Make the pre-edit original of `id` current again.
pub async fn restore(global: &GlobalArgs, id: &str) -> Result<()> {
    let library = open_library(global).await?;
    let urls = library
        .restore_original(id)
        .await
        .with_context(|| format!("Failed to restore original of {id}"))?;

    match global.format {
        OutputFormat::Json => print_json(&urls)?,
        OutputFormat::Text if !global.quiet => println!("{} {}", "Restored original of".green(), id),
        OutputFormat::Text => {}
    }
    library.close().await?;
    Ok(())
}
