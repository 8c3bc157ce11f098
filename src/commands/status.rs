//! Status command implementation.

use anyhow::Result;
use rust_i18n::t;
use std::path::Path;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::daemon::{Fail2banDaemon, IpsDaemon};
use crate::firewall::{Firewall, UfwFirewall};
use crate::fs_abstraction::real_fs;
use crate::reconciler::OwnershipScope;
use crate::state::JailsyncState;
use crate::utils::{format_duration, truncate};

/// Show the last pass and what jailsync currently manages.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let scope = OwnershipScope::new(&config.daemon.managed_prefix, &config.allowlist.label);

    let fs = real_fs();
    let state = JailsyncState::load(fs, &config.state_file).unwrap_or_default();
    let executor = RealCommandExecutor::new();
    let daemon = Fail2banDaemon::from_config(&config.daemon, &executor, fs);
    let firewall = UfwFirewall::new(config.firewall.ufw.clone(), &executor);

    println!();
    match &state.last_pass {
        Some(record) => {
            println!(
                "{}",
                t!(
                    "status.last_pass",
                    time = record.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    outcome = record.outcome,
                    code = record.exit_code
                )
            );
            println!(
                "{}",
                t!(
                    "status.changes",
                    daemon = record.daemon_changes,
                    firewall = record.firewall_changes
                )
            );
            for err in &record.errors {
                println!("  ! {}", err);
            }
        }
        None => println!("{}", t!("status.last_pass_never")),
    }
    if let Some(fetched_at) = state.allow_list.fetched_at {
        println!(
            "{}",
            t!(
                "status.cached_list",
                count = state.allow_list.entries.len(),
                time = fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
            )
        );
    }
    println!();

    let active = daemon.is_active().await.unwrap_or(false);
    if active {
        println!("{}", t!("status.daemon_active"));
    } else {
        println!("{}", t!("status.daemon_down"));
    }

    match daemon.list_rule_groups().await {
        Ok(groups) => {
            let managed: Vec<_> = groups.iter().filter(|g| scope.owns_group(&g.name)).collect();
            println!("{}", t!("status.managed_jails", count = managed.len()));
            for group in managed {
                let enabled = if group.enabled {
                    t!("status.jail_enabled")
                } else {
                    t!("status.jail_disabled")
                };
                println!(
                    "  {:<28} {:<10} {}",
                    truncate(&group.name, 28),
                    enabled,
                    t!(
                        "status.jail_ban",
                        duration = format_duration(group.ban_duration_seconds)
                    )
                );
            }
        }
        Err(e) => println!(
            "{}",
            t!("status.managed_jails_unavailable", error = format!("{:#}", e))
        ),
    }

    match firewall.list_rules().await {
        Ok(rules) => {
            let managed = rules.iter().filter(|r| scope.owns_rule(r)).count();
            println!(
                "{}",
                t!(
                    "status.managed_rules",
                    count = managed,
                    label = config.allowlist.label
                )
            );
        }
        Err(e) => println!(
            "{}",
            t!("status.managed_rules_unavailable", error = format!("{:#}", e))
        ),
    }
    println!();

    Ok(())
}
