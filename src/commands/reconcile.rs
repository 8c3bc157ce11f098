//! Reconcile command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{error, info, warn};

use crate::cmd_abstraction::RealCommandExecutor;
use crate::daemon::Fail2banDaemon;
use crate::error::PassError;
use crate::fetcher::RemoteAllowList;
use crate::firewall::UfwFirewall;
use crate::fs_abstraction::real_fs;
use crate::lock::LockGuard;
use crate::pass::{run_pass, PassContext, PassOutcome, EXIT_FATAL};
use crate::prober::{Prober, SystemctlQuery};
use crate::reconciler::OwnershipScope;
use crate::signal::ShutdownToken;
use crate::state::{JailsyncState, PassRecord};
use crate::synthesizer::StaticRules;
use crate::utils::check_root;

/// Run one pass and return the process exit code.
pub async fn run(dry_run: bool, config_path: &Path) -> Result<u8> {
    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => return Ok(abort(PassError::Config(format!("{:#}", e)))),
    };

    if !dry_run {
        if let Err(e) = check_root() {
            return Ok(abort(PassError::Config(e.to_string())));
        }
    }

    let _lock = match LockGuard::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(e) => return Ok(abort(PassError::Lock(format!("{:#}", e)))),
    };

    let shutdown = ShutdownToken::new();
    shutdown.listen_for_signals();

    let fs = real_fs();
    let mut state = JailsyncState::load(fs, &config.state_file).unwrap_or_else(|e| {
        warn!("Ignoring unreadable state file: {:#}", e);
        JailsyncState::default()
    });

    let source = match RemoteAllowList::from_config(&config.allowlist) {
        Ok(source) => source,
        Err(e) => return Ok(abort(e.into())),
    };

    let executor = RealCommandExecutor::new();
    let prober = Prober::new(
        SystemctlQuery::new(&executor),
        &config.probe.web,
        &config.probe.database,
    );
    let daemon = Fail2banDaemon::from_config(&config.daemon, &executor, fs);
    let firewall = UfwFirewall::new(config.firewall.ufw.clone(), &executor);

    let ctx = PassContext {
        prober: &prober,
        source: &source,
        daemon: &daemon,
        firewall: &firewall,
        static_rules: StaticRules::from_config(&config.daemon.managed_prefix, &config.policy),
        scope: OwnershipScope::new(&config.daemon.managed_prefix, &config.allowlist.label),
        shutdown,
        dry_run,
        use_cached_on_failure: config.allowlist.use_cached_on_failure,
        concurrent_targets: config.applier.concurrent_targets,
    };

    let outcome = run_pass(&ctx, &mut state.allow_list).await;
    report(&outcome)?;

    if !dry_run {
        state.last_pass = Some(PassRecord::from_outcome(&outcome));
        if let Err(e) = state.save(fs, &config.state_file) {
            warn!("Failed to record pass state: {:#}", e);
        }
    }

    Ok(outcome.exit_code())
}

fn abort(err: PassError) -> u8 {
    error!("Pass aborted, nothing applied: {}", err);
    EXIT_FATAL
}

fn report(outcome: &PassOutcome) -> Result<()> {
    match outcome {
        PassOutcome::DryRun { plan } => {
            let json = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;
            println!("{}", json);
        }
        PassOutcome::Applied { plan, result } => {
            if plan.is_empty() {
                info!("Converged, no changes");
            } else if result.is_clean() {
                info!(
                    "Converged: {} daemon and {} firewall changes applied",
                    plan.daemon_changes(),
                    plan.firewall_changes()
                );
            } else {
                for err in &result.errors {
                    error!("{}", err);
                }
                if result.cancelled {
                    warn!("Pass interrupted; the next pass will finish converging");
                } else {
                    warn!(
                        "Pass finished with {} failed operations; they will be retried next pass",
                        result.errors.len()
                    );
                }
            }
        }
        // Already logged by the pass runner
        PassOutcome::Aborted(_) => {}
    }
    Ok(())
}
