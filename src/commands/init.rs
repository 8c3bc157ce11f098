//! Init command implementation.

use anyhow::Result;
use rust_i18n::t;
use std::path::Path;
use tracing::info;

use crate::config::Config;

/// Write the default configuration unless a file already exists.
pub async fn run(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        info!("Config already exists at {:?}, leaving it untouched", config_path);
        return Ok(());
    }

    Config::default().save(config_path)?;
    println!("{}", t!("init.written", path = config_path.display()));
    println!("{}", t!("init.next_step"));
    Ok(())
}
