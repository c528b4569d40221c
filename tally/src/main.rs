//! Checklist-driven manual testing.
//!
//! `tally setup` creates a repository for test templates, `tally new` turns a
//! template into a run directory with a Markdown checklist, and `tally view`
//! walks through that checklist interactively.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use tally::exit_codes;
use tally::generate::new_run;
use tally::io::config::{CONFIG_FILE, load_config};
use tally::logging;
use tally::setup::setup_repository;
use tally::view::{check, run_directory, view};

#[derive(Parser)]
#[command(name = "tally", version, about = "Checklist-driven manual testing")]
struct Cli {
    /// More diagnostics on stderr (-v info, -vv debug). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new template repository in DIRECTORY.
    Setup { directory: PathBuf },
    /// Compile TEMPLATE into a new run directory and commit it.
    New {
        /// Template file; `.yaml`/`.yml` may be omitted.
        template: PathBuf,
        /// Defaults to `<template>-<date>.<n>`.
        directory: Option<PathBuf>,
    },
    /// Work through a run's checklist.
    View {
        /// Defaults to `tally-latest` or the newest run directory.
        directory: Option<PathBuf>,
    },
    /// Run a run directory's `tally-check` script.
    Check { directory: Option<PathBuf> },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("read current directory")?;
    match cli.command {
        Command::Setup { directory } => cmd_setup(&cwd.join(directory)),
        Command::New {
            template,
            directory,
        } => cmd_new(&cwd, &template, directory.as_deref()),
        Command::View { directory } => {
            let config = load_config(&cwd.join(CONFIG_FILE))?;
            view(&run_directory(&cwd, directory.as_deref())?, &config)
        }
        Command::Check { directory } => check(&run_directory(&cwd, directory.as_deref())?),
    }
}

fn cmd_setup(dir: &Path) -> Result<i32> {
    let outcome = setup_repository(dir)?;
    println!("Created {}", outcome.directory.display());
    println!("Edit {} to describe your tests.", outcome.template.display());
    Ok(exit_codes::OK)
}

fn cmd_new(cwd: &Path, template: &Path, directory: Option<&Path>) -> Result<i32> {
    let today = chrono::Local::now().date_naive();
    let run = new_run(cwd, template, directory, today)?;
    println!("Created {}", run.document.display());
    println!("{} actors, {} test instances", run.actors, run.instances);
    Ok(exit_codes::OK)
}
