//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "jailsync")]
#[command(
    author,
    version,
    about = "Declarative fail2ban and ufw policy reconciliation"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (for cron/systemd timer)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Language override (en, fr)
    #[arg(long, global = true)]
    pub lang: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation pass
    Reconcile {
        /// Compute and print the plan without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which web server and database were detected
    Probe,

    /// Fetch and print the validated allow-list
    Fetch,

    /// Show the last pass and the daemon state
    Status,

    /// Write a default configuration file if none exists
    Init,

    /// Show version
    Version,
}
