mod cli;
mod commands;
mod config;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub stack_file: std::path::PathBuf,
    pub state_path: std::path::PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        state_path: config::state_path(&cli.file, cli.state.as_deref()),
        stack_file: cli.file,
    };

    match cli.command {
        Command::Validate => commands::validate::run(&ctx),
        Command::Plan => commands::plan::run(&ctx),
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Destroy(args) => commands::destroy::run(&ctx, &args),
        Command::State(cmd) => commands::state::run(&ctx, cmd),
        Command::Outputs(args) => commands::outputs::run(&ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stratus", &mut io::stdout());
            Ok(())
        }
    }
}
