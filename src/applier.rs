//! Applier: execute a [`ReconcilePlan`] against the daemon and the firewall.
//!
//! Each target is one sequential unit (removes, adds, verify). A failed
//! operation is recorded and the unit carries on; nothing is rolled back,
//! since the next pass re-plans only what is still divergent.

use serde::Serialize;
use tracing::{info, warn};

use crate::daemon::IpsDaemon;
use crate::error::{ApplyError, Target};
use crate::firewall::Firewall;
use crate::policy::{FirewallRule, RuleGroup};
use crate::reconciler::ReconcilePlan;
use crate::signal::ShutdownToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    pub daemon_ok: bool,
    pub firewall_ok: bool,
    pub errors: Vec<ApplyError>,
    /// Operations that succeeded, in execution order
    pub daemon_applied: Vec<String>,
    pub firewall_applied: Vec<String>,
    /// A shutdown request stopped the run early
    pub cancelled: bool,
}

impl ApplyResult {
    pub fn is_clean(&self) -> bool {
        self.daemon_ok && self.firewall_ok && self.errors.is_empty() && !self.cancelled
    }
}

/// Result of one target's apply+verify unit.
#[derive(Debug)]
struct TargetOutcome {
    target: Target,
    applied: Vec<String>,
    errors: Vec<ApplyError>,
    cancelled: bool,
    skipped: bool,
}

impl TargetOutcome {
    fn new(target: Target) -> Self {
        Self {
            target,
            applied: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
            skipped: false,
        }
    }

    fn skipped(target: Target) -> Self {
        Self {
            skipped: true,
            ..Self::new(target)
        }
    }

    fn record(&mut self, operation: String, result: anyhow::Result<()>) {
        match result {
            Ok(()) => self.applied.push(operation),
            Err(e) => {
                warn!("{} {} failed: {:#}", self.target, operation, e);
                self.errors
                    .push(ApplyError::new(self.target, operation, format!("{:#}", e)));
            }
        }
    }

    fn ok(&self, pending: usize) -> bool {
        if self.skipped {
            return pending == 0;
        }
        self.errors.is_empty() && !self.cancelled
    }
}

pub struct Applier<'a> {
    daemon: &'a dyn IpsDaemon,
    firewall: &'a dyn Firewall,
    shutdown: ShutdownToken,
    concurrent: bool,
}

impl<'a> Applier<'a> {
    pub fn new(
        daemon: &'a dyn IpsDaemon,
        firewall: &'a dyn Firewall,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            daemon,
            firewall,
            shutdown,
            concurrent: false,
        }
    }

    /// Run the two target units at the same time; they touch disjoint state.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub async fn apply(&self, plan: ReconcilePlan) -> ApplyResult {
        let daemon_pending = plan.daemon_changes();
        let firewall_pending = plan.firewall_changes();

        let (daemon, firewall) = if self.concurrent {
            tokio::join!(
                self.apply_daemon(&plan.daemon_removes, &plan.daemon_adds),
                self.apply_firewall(&plan.firewall_removes, &plan.firewall_adds)
            )
        } else {
            let daemon = self
                .apply_daemon(&plan.daemon_removes, &plan.daemon_adds)
                .await;
            let firewall = if daemon.cancelled || self.shutdown.is_cancelled() {
                info!("Shutdown requested, firewall changes not started");
                TargetOutcome::skipped(Target::Firewall)
            } else {
                self.apply_firewall(&plan.firewall_removes, &plan.firewall_adds)
                    .await
            };
            (daemon, firewall)
        };

        let result = ApplyResult {
            daemon_ok: daemon.ok(daemon_pending),
            firewall_ok: firewall.ok(firewall_pending),
            cancelled: daemon.cancelled
                || firewall.cancelled
                || ((daemon.skipped || firewall.skipped) && daemon_pending + firewall_pending > 0),
            errors: daemon.errors.into_iter().chain(firewall.errors).collect(),
            daemon_applied: daemon.applied,
            firewall_applied: firewall.applied,
        };

        info!(
            "Apply finished: daemon {} ({} ops), firewall {} ({} ops), {} errors",
            if result.daemon_ok { "ok" } else { "FAILED" },
            result.daemon_applied.len(),
            if result.firewall_ok { "ok" } else { "FAILED" },
            result.firewall_applied.len(),
            result.errors.len()
        );
        result
    }

    async fn apply_daemon(&self, removes: &[String], adds: &[RuleGroup]) -> TargetOutcome {
        let mut out = TargetOutcome::new(Target::Daemon);
        if removes.is_empty() && adds.is_empty() {
            return out;
        }
        if self.shutdown.is_cancelled() {
            out.skipped = true;
            return out;
        }

        for name in removes {
            if self.shutdown.is_cancelled() {
                out.cancelled = true;
                return out;
            }
            let result = self.daemon.remove_rule_group(name).await;
            out.record(format!("remove {}", name), result);
        }

        for group in adds {
            if self.shutdown.is_cancelled() {
                out.cancelled = true;
                return out;
            }
            let result = self.daemon.upsert_rule_group(group).await;
            out.record(format!("upsert {}", group.name), result);
        }

        if out.applied.is_empty() {
            return out;
        }

        // Verify: the daemon must accept the new configuration and stay up
        let reload = self.daemon.reload().await;
        out.record("reload".to_string(), reload);

        match self.daemon.is_active().await {
            Ok(true) => {}
            Ok(false) => out.errors.push(ApplyError::new(
                Target::Daemon,
                "verify",
                "daemon is not active after reload",
            )),
            Err(e) => out
                .errors
                .push(ApplyError::new(Target::Daemon, "verify", format!("{:#}", e))),
        }

        out
    }

    async fn apply_firewall(
        &self,
        removes: &[FirewallRule],
        adds: &[FirewallRule],
    ) -> TargetOutcome {
        let mut out = TargetOutcome::new(Target::Firewall);
        if removes.is_empty() && adds.is_empty() {
            return out;
        }
        if self.shutdown.is_cancelled() {
            out.skipped = true;
            return out;
        }

        let mut removed = Vec::new();
        for rule in removes {
            if self.shutdown.is_cancelled() {
                out.cancelled = true;
                return out;
            }
            let result = self.firewall.remove_rule(rule).await;
            if result.is_ok() {
                removed.push(rule);
            }
            out.record(format!("remove {}", rule), result);
        }

        let mut added = Vec::new();
        for rule in adds {
            if self.shutdown.is_cancelled() {
                out.cancelled = true;
                return out;
            }
            let result = self.firewall.add_rule(rule).await;
            if result.is_ok() {
                added.push(rule);
            }
            out.record(format!("add {}", rule), result);
        }

        // Verify only what reported success; failures are already recorded
        match self.firewall.list_rules().await {
            Ok(live) => {
                for rule in added {
                    if !live.contains(rule) {
                        out.errors.push(ApplyError::new(
                            Target::Firewall,
                            format!("verify add {}", rule),
                            "rule missing after apply",
                        ));
                    }
                }
                for rule in removed {
                    if live.contains(rule) {
                        out.errors.push(ApplyError::new(
                            Target::Firewall,
                            format!("verify remove {}", rule),
                            "rule still present after apply",
                        ));
                    }
                }
            }
            Err(e) => out
                .errors
                .push(ApplyError::new(Target::Firewall, "verify", format!("{:#}", e))),
        }

        out
    }
}
