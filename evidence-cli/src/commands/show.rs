//! Show command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::debug;

use crate::utils::{open_library, print_json};
use crate::{GlobalArgs, OutputFormat};

/// Materialize handles for one evidence image and print them.
pub async fn execute(global: &GlobalArgs, id: &str) -> Result<()> {
    let library = open_library(global).await?;
    let record = library.record(id)?;
    let urls = library
        .request_display(id)
        .await
        .with_context(|| format!("Failed to load evidence {id}"))?;
    debug!(stats = ?library.cache_stats(), "Cache state after load");

    let sizes = match &urls {
        Some(urls) => Some((
            library.read_url(&urls.stamped_url)?.len(),
            library.read_url(&urls.base_url)?.len(),
        )),
        None => None,
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "record": record,
            "display": urls,
            "stamped_bytes": sizes.map(|s| s.0),
            "base_bytes": sizes.map(|s| s.1),
        }))?,
        OutputFormat::Text => {
            println!("{} {}", "Evidence:".dimmed(), record.id);
            println!("{} {}", "File:".dimmed(), record.original_filename);
            println!(
                "{} {}",
                "Captured:".dimmed(),
                library.display_time(record.captured_at)
            );
            println!("{} {}", "Type:".dimmed(), record.mime_type);
            println!("{} {}", "Edited:".dimmed(), if record.is_edited { "yes" } else { "no" });
            if !record.comment.is_empty() {
                println!("{} {}", "Comment:".dimmed(), record.comment);
            }
            match (&urls, sizes) {
                (Some(urls), Some((stamped, base))) => {
                    println!("{} {} ({} bytes)", "Stamped:".dimmed(), urls.stamped_url, stamped);
                    println!("{} {} ({} bytes)", "Base:".dimmed(), urls.base_url, base);
                }
                _ => println!("{}", "Image data missing (placeholder)".yellow()),
            }
        }
    }

    library.close().await?;
    Ok(())
}
