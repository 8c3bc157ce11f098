//! Fetch command implementation.

use anyhow::Result;
use rust_i18n::t;
use std::path::Path;

use crate::fetcher::{AllowListSource, RemoteAllowList};

/// Fetch the allow-list and print every validated entry.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;

    let source = RemoteAllowList::from_config(&config.allowlist)?;
    let entries = source.fetch_allow_list().await?;

    println!();
    println!("{}", t!("fetch.source", url = source.source_url()));
    println!("{}", t!("fetch.entries", count = entries.len()));
    println!();
    for entry in &entries {
        let ports: Vec<String> = entry.ports.iter().map(|p| p.to_string()).collect();
        println!("  {:<45} {}", entry.network_prefix.to_string(), ports.join(","));
    }
    println!();

    Ok(())
}
