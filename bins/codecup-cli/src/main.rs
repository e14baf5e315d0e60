mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codecup-cli")]
#[command(about = "Codecup CLI - Check submissions and validate task files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the static security check on a Python source file
    Check {
        /// Source file to analyze
        file: PathBuf,

        /// Extra modules to forbid (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Print the verdict as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Validate a task import file and print a dry-run summary
    ValidateTasks {
        /// Task file (one task object or an array of tasks)
        #[arg(default_value = "config/tasks.json")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file, exclude, json } => {
            commands::check_file(&file, &exclude, json)?;
        }
        Commands::ValidateTasks { path } => {
            commands::validate_tasks(&path)?;
        }
    }

    Ok(())
}
