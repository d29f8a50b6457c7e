//! Vigil CLI - Main Entry Point
//!
//! Runs declarative interaction-verification scenarios against a web
//! application and reports per-step verdicts. Exit codes are distinct
//! per cause so automation can tell failures apart:
//! 0 all pass, 1 assertion failure, 2 inconclusive, 3 driver error.

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{list, run, validate};

/// Exit codes per verdict class
pub const EXIT_PASS: i32 = 0;
pub const EXIT_FAIL: i32 = 1;
pub const EXIT_INCONCLUSIVE: i32 = 2;
pub const EXIT_DRIVER_ERROR: i32 = 3;

/// Vigil - browser interaction-verification harness
#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and verify their backend effects
    Run(run::RunArgs),

    /// Parse scenario files and report problems
    Validate(validate::ValidateArgs),

    /// List scenarios in a directory
    List(list::ListArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let exit_code = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Validate(args) => validate::execute(args, cli.format),
        Commands::List(args) => list::execute(args, cli.format),
        Commands::Version => {
            println!("vigil v{}", env!("CARGO_PKG_VERSION"));
            println!("Browser interaction-verification harness");
            Ok(EXIT_PASS)
        }
    };

    match exit_code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_DRIVER_ERROR);
        }
    }
}
