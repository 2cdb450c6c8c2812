mod cli;
mod commands;
mod config;
mod manifest;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Settings;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub settings: Settings,
    /// Mock cloud state file
    pub state_path: PathBuf,
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

    let Cli {
        verbose,
        quiet,
        state,
        config,
        command,
    } = cli;
    let context = || -> Result<Context> {
        let settings = Settings::load(config.as_deref())?;
        Ok(Context {
            verbose,
            quiet,
            state_path: settings.state_path(state.as_deref())?,
            settings,
        })
    };

    match command {
        Command::Plan(args) => commands::run::plan(&context()?, &args.manifest),
        Command::Apply(args) => commands::run::apply(
            &context()?,
            &args.manifest,
            &commands::run::ApplyOptions {
                jobs: args.jobs,
                timeout: args.timeout,
                yes: args.yes,
            },
        ),
        Command::Check(args) => commands::run::check(&context()?, &args.manifest),
        Command::Prune(args) => {
            commands::run::prune(&context()?, &args.manifest, args.dry_run, args.yes)
        }
        Command::Rule(args) => commands::rule::run(&args.rule, args.permission),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cloudup", &mut io::stdout());
            Ok(())
        }
    }
}
