#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            target,
            unwind,
            format,
            dot,
            report_out,
        } => {
            commands::verify::run_verify_command(target, unwind, format, dot, report_out)?;
        }
        Commands::Visualize {
            target,
            unwind,
            errors_only,
            out,
        } => {
            commands::visualize::run_visualize_command(target, unwind, errors_only, out)?;
        }
        Commands::List {
            file,
            policy,
            error_methods,
        } => {
            commands::list::run_list_command(file, policy, error_methods)?;
        }
    }

    Ok(())
}
