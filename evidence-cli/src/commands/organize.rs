//! Commands that reorganize or delete evidence.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::utils::open_library;
use crate::{GlobalArgs, OutputFormat};

/// Move evidence to a test case, or to unclassified.
pub async fn move_to(global: &GlobalArgs, id: &str, case: Option<&str>) -> Result<()> {
    let library = open_library(global).await?;
    library
        .move_evidence(id, case)
        .await
        .with_context(|| format!("Failed to move {id}"))?;

    if !global.quiet && global.format == OutputFormat::Text {
        println!("{} {} -> {}", "Moved".green(), id, case.unwrap_or("unclassified"));
    }
    library.close().await?;
    Ok(())
}

/// Set the comment of an evidence record.
pub async fn comment(global: &GlobalArgs, id: &str, text: &str) -> Result<()> {
    let library = open_library(global).await?;
    library
        .set_comment(id, text)
        .await
        .with_context(|| format!("Failed to set comment of {id}"))?;

    if !global.quiet && global.format == OutputFormat::Text {
        println!("{} {}", "Updated comment of".green(), id);
    }
    library.close().await?;
    Ok(())
}

/// Remove evidence records and all their artifacts.
pub async fn remove(global: &GlobalArgs, ids: &[String]) -> Result<()> {
    let library = open_library(global).await?;
    for id in ids {
        library
            .remove(id)
            .await
            .with_context(|| format!("Failed to remove {id}"))?;
        if !global.quiet && global.format == OutputFormat::Text {
            println!("{} {}", "Removed".green(), id);
        }
    }
    library.close().await?;
    Ok(())
}
