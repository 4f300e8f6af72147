//! Test case commands.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::utils::{open_library, print_json};
use crate::{GlobalArgs, OutputFormat};

/// Add a test case to the current project.
pub async fn add(global: &GlobalArgs, name: &str, at: Option<usize>) -> Result<()> {
    let library = open_library(global).await?;
    let test_case = library
        .add_test_case(name, at)
        .await
        .context("Failed to add test case")?;

    match global.format {
        OutputFormat::Json => print_json(&test_case)?,
        OutputFormat::Text if !global.quiet => {
            println!("{} {} ({})", "Added test case".green(), test_case.name.bold(), test_case.id);
        }
        OutputFormat::Text => println!("{}", test_case.id),
    }
    library.close().await?;
    Ok(())
}

/// List test cases of the current project.
pub async fn list(global: &GlobalArgs) -> Result<()> {
    let library = open_library(global).await?;
    let project = library
        .current_project()
        .context("No project selected")?;

    match global.format {
        OutputFormat::Json => print_json(&project.test_cases)?,
        OutputFormat::Text => {
            for tc in &project.test_cases {
                let count = project.evidence_in(Some(tc.id.as_str())).count();
                println!(
                    "{}  {}  {}",
                    tc.id,
                    tc.name.bold(),
                    format!("({count} images)").dimmed()
                );
            }
        }
    }
    library.close().await?;
    Ok(())
}

/// Remove a test case and its evidence.
pub async fn remove(global: &GlobalArgs, id: &str) -> Result<()> {
    let library = open_library(global).await?;
    let removed = library
        .remove_test_case(id)
        .await
        .with_context(|| format!("Failed to remove test case {id}"))?;

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "id": id, "removed_evidence": removed }))?,
        OutputFormat::Text if !global.quiet => {
            println!("{} {} ({} images removed)", "Removed test case".green(), id, removed);
        }
        OutputFormat::Text => {}
    }
    library.close().await?;
    Ok(())
}
