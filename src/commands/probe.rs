//! Probe command implementation.

use anyhow::Result;
use rust_i18n::t;
use std::path::Path;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::prober::{Prober, SystemctlQuery};

/// Print the services the next pass would gate rule groups on.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;

    let executor = RealCommandExecutor::new();
    let prober = Prober::new(
        SystemctlQuery::new(&executor),
        &config.probe.web,
        &config.probe.database,
    );
    let signals = prober.probe()?;

    println!();
    if signals.is_empty() {
        println!("{}", t!("probe.none"));
    }
    for signal in &signals {
        if signal.confidence {
            println!("{:<10} {}", signal.kind.to_string(), signal.flavor);
        } else {
            println!(
                "{:<10} {}  {}",
                signal.kind.to_string(),
                signal.flavor,
                t!("probe.transitioning")
            );
        }
    }
    println!();

    Ok(())
}
