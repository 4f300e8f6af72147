//! List command implementation.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::utils::{describe, open_library, print_json};
use crate::{GlobalArgs, OutputFormat};

/// Execute the list command.
pub async fn execute(global: &GlobalArgs) -> Result<()> {
    let library = open_library(global).await?;
    let project = library.current_project().context("No project selected")?;

    if global.format == OutputFormat::Json {
        print_json(&project)?;
        library.close().await?;
        return Ok(());
    }

    if !global.quiet {
        println!("{} ({})", project.name.bold(), project.id.dimmed());
    }

    let groups = project
        .test_cases
        .iter()
        .map(|tc| (tc.name.as_str(), Some(tc.id.as_str())))
        .chain(std::iter::once(("Unclassified", None)));

    for (name, test_case_id) in groups {
        let mut records: Vec<_> = project.evidence_in(test_case_id).collect();
        if records.is_empty() && test_case_id.is_none() {
            continue;
        }
        records.sort_by_key(|ev| ev.captured_at);

        match test_case_id {
            Some(id) => println!("\n{} {}", name.bold(), id.dimmed()),
            None => println!("\n{}", name.bold()),
        }
        if records.is_empty() {
            println!("  {}", "(no images)".dimmed());
        }
        for record in records {
            let time = library.display_time(record.captured_at);
            println!("  {}", describe(record, &time));
        }
    }

    library.close().await?;
    Ok(())
}
