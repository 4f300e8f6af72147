//! Evidence CLI - collect, stamp and export test evidence images.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (unknown project, test case or evidence id)
  65  Data error (unsupported image, stamping failed, artifacts missing)
  66  Cannot read input file
  69  Storage unavailable or busy
  74  I/O error while writing data or exports";

#[derive(Parser)]
#[command(name = "evidence")]
#[command(author, version, about = "Timestamped test evidence image manager", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Data directory (overrides EVIDENCE_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Maximum number of images kept in memory (overrides EVIDENCE_CACHE_CAPACITY)
    #[arg(long, global = true, value_name = "N")]
    capacity: Option<usize>,

    /// Stamp images on the calling thread instead of a worker thread
    #[arg(long, global = true)]
    no_worker: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for command results
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON on stdout
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage test cases of the current project
    #[command(subcommand)]
    Case(CaseCommand),

    /// Add images to the current project
    Add {
        /// Image files to add
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Test case id to file the images under
        #[arg(long, value_name = "CASE_ID")]
        case: Option<String>,

        /// Capture time, YYYY-MM-DDTHH:MM[:SS] in the display offset or RFC 3339
        /// (defaults to the file modification time)
        #[arg(long, value_name = "DATE")]
        date: Option<String>,

        /// Comment stored with every added image
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// List evidence of the current project
    List,

    /// Materialize display handles for an evidence image
    Show {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Replace an evidence image with an edited version
    Edit {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,

        /// Edited image file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Change the capture time and re-stamp the image
    Redate {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,

        /// New capture time, YYYY-MM-DDTHH:MM[:SS] in the display offset or RFC 3339
        #[arg(value_name = "DATE")]
        date: String,
    },

    /// Bring back the image as it was before the first edit
    Restore {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Move evidence to a test case (or to unclassified without --case)
    Move {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,

        /// Target test case id
        #[arg(long, value_name = "CASE_ID")]
        case: Option<String>,
    },

    /// Set the comment of an evidence image
    Comment {
        /// Evidence id
        #[arg(value_name = "ID")]
        id: String,

        /// New comment (empty to clear)
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Remove evidence images and their stored artifacts
    Remove {
        /// Evidence ids
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Delete every project, image and artifact
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Export the current project as Before/After/Export folders
    Export {
        /// Output directory
        #[arg(value_name = "DIR")]
        out: PathBuf,

        /// Export unstamped images
        #[arg(long)]
        no_timestamp: bool,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project and switch to it
    New {
        /// Project name
        #[arg(value_name = "NAME", default_value = "")]
        name: String,
    },
    /// List projects
    List,
    /// Switch the current project
    Switch {
        #[arg(value_name = "PROJECT_ID")]
        id: String,
    },
    /// Rename a project
    Rename {
        #[arg(value_name = "PROJECT_ID")]
        id: String,
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Delete a project with all of its evidence
    Delete {
        #[arg(value_name = "PROJECT_ID")]
        id: String,
    },
}

#[derive(Subcommand)]
enum CaseCommand {
    /// Add a test case (named No.N when no name is given)
    Add {
        #[arg(value_name = "NAME", default_value = "")]
        name: String,

        /// Insert at this position instead of appending
        #[arg(long, value_name = "INDEX")]
        at: Option<usize>,
    },
    /// List test cases of the current project
    List,
    /// Remove a test case with all of its evidence
    Remove {
        #[arg(value_name = "CASE_ID")]
        id: String,
    },
}

/// Options shared by every command.
pub struct GlobalArgs {
    pub data_dir: Option<PathBuf>,
    pub capacity: Option<usize>,
    pub no_worker: bool,
    pub format: OutputFormat,
    pub quiet: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("evidence_core=debug,evidence=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidence_core=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(command: Commands, global: &GlobalArgs) -> Result<()> {
    match command {
        Commands::Project(cmd) => match cmd {
            ProjectCommand::New { name } => commands::project::create(global, &name).await,
            ProjectCommand::List => commands::project::list(global).await,
            ProjectCommand::Switch { id } => commands::project::switch(global, &id).await,
            ProjectCommand::Rename { id, name } => {
                commands::project::rename(global, &id, &name).await
            }
            ProjectCommand::Delete { id } => commands::project::delete(global, &id).await,
        },
        Commands::Case(cmd) => match cmd {
            CaseCommand::Add { name, at } => commands::case::add(global, &name, at).await,
            CaseCommand::List => commands::case::list(global).await,
            CaseCommand::Remove { id } => commands::case::remove(global, &id).await,
        },
        Commands::Add {
            files,
            case,
            date,
            comment,
        } => commands::add::execute(global, files, case, date, comment).await,
        Commands::List => commands::list::execute(global).await,
        Commands::Show { id } => commands::show::execute(global, &id).await,
        Commands::Edit { id, file } => commands::edit::edit(global, &id, &file).await,
        Commands::Redate { id, date } => commands::edit::redate(global, &id, &date).await,
        Commands::Restore { id } => commands::edit::restore(global, &id).await,
        Commands::Move { id, case } => {
            commands::organize::move_to(global, &id, case.as_deref()).await
        }
        Commands::Comment { id, text } => commands::organize::comment(global, &id, &text).await,
        Commands::Remove { ids } => commands::organize::remove(global, &ids).await,
        Commands::Clear { yes } => commands::clear::execute(global, yes).await,
        Commands::Export { out, no_timestamp } => {
            commands::export::execute(global, &out, no_timestamp).await
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let global = GlobalArgs {
        data_dir: cli.data_dir,
        capacity: cli.capacity,
        no_worker: cli.no_worker,
        format: cli.format,
        quiet: cli.quiet,
    };

    match run(cli.command, &global).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            let exit = ExitCode::from_anyhow(&err);
            if let Some(message) = &exit.message {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            std::process::ExitCode::from(exit.code as u8)
        }
    }
}
