//! Project commands.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use crate::utils::{open_library, print_json};
use crate::{GlobalArgs, OutputFormat};

/// Create a project and make it current.
pub async fn create(global: &GlobalArgs, name: &str) -> Result<()> {
    let library = open_library(global).await?;
    let project = library
        .add_project(name)
        .await
        .context("Failed to create project")?;
    info!(id = %project.id, "Project created");

    match global.format {
        OutputFormat::Json => print_json(&project)?,
        OutputFormat::Text if !global.quiet => {
            println!("{} {} ({})", "Created project".green(), project.name.bold(), project.id);
        }
        OutputFormat::Text => println!("{}", project.id),
    }
    library.close().await?;
    Ok(())
}

/// List projects, marking the current one.
pub async fn list(global: &GlobalArgs) -> Result<()> {
    let library = open_library(global).await?;
    let projects = library.projects();
    let current = library.current_project().map(|p| p.id);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "current_project_id": current,
            "projects": projects
                .iter()
                .map(|p| serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "test_cases": p.test_cases.len(),
                    "evidence": p.evidence.len(),
                }))
                .collect::<Vec<_>>(),
        }))?,
        OutputFormat::Text => {
            for project in &projects {
                let marker = if current.as_deref() == Some(project.id.as_str()) {
                    "*".green().bold().to_string()
                } else {
                    " ".to_string()
                };
                println!(
                    "{} {}  {}  {}",
                    marker,
                    project.id,
                    project.name.bold(),
                    format!(
                        "({} test cases, {} images)",
                        project.test_cases.len(),
                        project.evidence.len()
                    )
                    .dimmed()
                );
            }
        }
    }
    library.close().await?;
    Ok(())
}

/// Switch the current project.
pub async fn switch(global: &GlobalArgs, id: &str) -> Result<()> {
    let library = open_library(global).await?;
    let switched = library
        .switch_project(id)
        .await
        .with_context(|| format!("Failed to switch to project {id}"))?;

    if !global.quiet && global.format == OutputFormat::Text {
        let name = library.current_project().map(|p| p.name).unwrap_or_default();
        if switched {
            println!("{} {}", "Switched to".green(), name.bold());
        } else {
            println!("{} is already current", name.bold());
        }
    }
    library.close().await?;
    Ok(())
}

/// Rename a project.
pub async fn rename(global: &GlobalArgs, id: &str, name: &str) -> Result<()> {
    let library = open_library(global).await?;
    library
        .rename_project(id, name)
        .await
        .with_context(|| format!("Failed to rename project {id}"))?;

    if !global.quiet && global.format == OutputFormat::Text {
        println!("{} {}", "Renamed to".green(), name.trim().bold());
    }
    library.close().await?;
    Ok(())
}

/// Delete a project with all of its evidence.
pub async fn delete(global: &GlobalArgs, id: &str) -> Result<()> {
    let library = open_library(global).await?;
    library
        .delete_project(id)
        .await
        .with_context(|| format!("Failed to delete project {id}"))?;

    if !global.quiet && global.format == OutputFormat::Text {
        println!("{} {}", "Deleted project".green(), id);
    }
    library.close().await?;
    Ok(())
}
