//! Clear command implementation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::warn;

use crate::utils::open_library;
use crate::{GlobalArgs, OutputFormat};

/// Wipe every project, record and artifact.
pub async fn execute(global: &GlobalArgs, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Refusing to clear all evidence without --yes");
    }

    let library = open_library(global).await?;
    let count: usize = library.projects().iter().map(|p| p.evidence.len()).sum();
    warn!(count, "Clearing all evidence");
    library.clear_all().await.context("Failed to clear evidence")?;

    if !global.quiet && global.format == OutputFormat::Text {
        println!("{} ({} images deleted)", "Cleared all evidence".green(), count);
    }
    library.close().await?;
    Ok(())
}
