// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use pipkin::cli::Cli;
use pipkin::config::FileConfig;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version end up here too
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "warn,pipkin=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    pipkin::commands::run(cli, file)?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    if let Some(pipkin::Error::Management {
        command,
        stdout,
        stderr,
        ..
    }) = err.downcast_ref::<pipkin::Error>()
    {
        error!("Failed command: {}", command);
        if !stdout.trim().is_empty() {
            error!("Output:\n{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            error!("Error output:\n{}", stderr.trim_end());
        }
    }
    eprintln!("ERROR: {:#}", err);
}
