//! Add command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use evidence_core::NewEvidence;
use tracing::{info, warn};

use crate::utils::{describe, file_name, file_time, open_library, parse_date, print_json, read_input};
use crate::{GlobalArgs, OutputFormat};

/// Execute the add command.
///
/// Every file is ingested independently; the command fails after processing
/// all files if any of them failed.
pub async fn execute(
    global: &GlobalArgs,
    files: Vec<PathBuf>,
    case: Option<String>,
    date: Option<String>,
    comment: String,
) -> Result<()> {
    let library = open_library(global).await?;
    let offset = library.config().display_offset;
    let explicit_date = date.as_deref().map(|d| parse_date(d, offset)).transpose()?;

    let mut added = Vec::new();
    let mut first_error = None;

    for file in &files {
        let result = async {
            let bytes = read_input(file)?;
            let captured_at = explicit_date.unwrap_or_else(|| file_time(file));
            let mut new = NewEvidence::new(bytes, file_name(file), captured_at).with_comment(comment.clone());
            if let Some(case) = &case {
                new = new.in_test_case(case.clone());
            }
            library
                .add_evidence(new)
                .await
                .with_context(|| format!("Failed to add {}", file.display()))
        }
        .await;

        match result {
            Ok(record) => {
                info!(id = %record.id, path = %file.display(), "Added evidence");
                if global.format == OutputFormat::Text {
                    if global.quiet {
                        println!("{}", record.id);
                    } else {
                        let time = library.display_time(record.captured_at);
                        println!("{} {}", "Added".green(), describe(&record, &time));
                    }
                }
                added.push(record);
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Failed to add evidence");
                if !global.quiet {
                    eprintln!("{} {:#}", "skipped:".yellow(), e);
                }
                first_error.get_or_insert(e);
            }
        }
    }

    if global.format == OutputFormat::Json {
        print_json(&added)?;
    }
    library.close().await?;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
