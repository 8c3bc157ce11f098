//! jailsync - declarative fail2ban and ufw policy reconciliation
//!
//! Exit codes: 0 converged (or dry-run), 1 partial failure, 2 aborted.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use jailsync::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Set language if specified
    if let Some(ref lang) = cli.lang {
        jailsync::commands::override_language(lang);
    }

    match cli.command {
        Commands::Reconcile { dry_run } => {
            let code = jailsync::commands::reconcile::run(dry_run, &cli.config).await?;
            return Ok(ExitCode::from(code));
        }
        Commands::Probe => jailsync::commands::probe::run(&cli.config).await?,
        Commands::Fetch => jailsync::commands::fetch::run(&cli.config).await?,
        Commands::Status => jailsync::commands::status::run(&cli.config).await?,
        Commands::Init => jailsync::commands::init::run(&cli.config).await?,
        Commands::Version => println!("jailsync {}", env!("CARGO_PKG_VERSION")),
    }

    Ok(ExitCode::SUCCESS)
}
