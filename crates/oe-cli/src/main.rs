use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use oe_cli::commands::{inspect, kept, merge, roots, timing, validate};
use oe_cli::{Cli, Commands, Config};
use oe_core::{FailurePolicy, ValidateOptions};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Some(Commands::Inspect { path }) => inspect::run(&mut out, &path)?,
        Some(Commands::Roots { path, min_size_gb }) => {
            roots::run(&mut out, &path, min_size_gb.or(config.min_size_gb))?;
        }
        Some(Commands::Kept { path }) => kept::run(&mut out, &path)?,
        Some(Commands::Merge {
            manifests,
            mut exclude,
        }) => {
            exclude.extend(config.exclude_streams);
            merge::run(&mut out, &manifests, &exclude)?;
        }
        Some(Commands::Timing { recording, device }) => {
            timing::run(&mut out, &recording, device.as_deref())?;
        }
        Some(Commands::Validate {
            roots,
            all_recordings,
            keep_going,
        }) => {
            let policy = if keep_going || config.keep_going {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            };
            let options = ValidateOptions {
                ignore_small_folders: config.ignore_small_folders && !all_recordings,
                policy,
            };
            validate::run(&mut out, &roots, options)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
