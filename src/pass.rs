//! One reconciliation pass: probe, fetch, synthesize, snapshot, reconcile, apply.
//!
//! ```text
//! Prober ──signals──┐
//!                   ├─► Synthesizer ─► PolicyDocument ─┐
//! Fetcher ─entries──┘                                   ├─► Reconciler ─► Plan ─► Applier
//! IpsDaemon + Firewall ──────── current state ─────────┘
//! ```
//!
//! Any failure before the applier aborts the pass with nothing touched.
//! In particular an empty or failed fetch never reaches the reconciler, so a
//! provider outage cannot strip the host's allow rules.

use tracing::{error, info, warn};

use crate::applier::{Applier, ApplyResult};
use crate::daemon::IpsDaemon;
use crate::error::{PassError, Target};
use crate::fetcher::AllowListSource;
use crate::firewall::Firewall;
use crate::policy::AllowEntry;
use crate::prober::{Prober, ServiceQuery};
use crate::reconciler::{reconcile, OwnershipScope, ReconcilePlan};
use crate::signal::ShutdownToken;
use crate::state::AllowListCache;
use crate::synthesizer::{synthesize, StaticRules};

pub const EXIT_OK: u8 = 0;
pub const EXIT_PARTIAL: u8 = 1;
pub const EXIT_FATAL: u8 = 2;

/// Everything one pass needs, borrowed from the command layer.
pub struct PassContext<'a, Q: ServiceQuery> {
    pub prober: &'a Prober<Q>,
    pub source: &'a dyn AllowListSource,
    pub daemon: &'a dyn IpsDaemon,
    pub firewall: &'a dyn Firewall,
    pub static_rules: StaticRules,
    pub scope: OwnershipScope,
    pub shutdown: ShutdownToken,
    pub dry_run: bool,
    pub use_cached_on_failure: bool,
    pub concurrent_targets: bool,
}

#[derive(Debug)]
pub enum PassOutcome {
    DryRun {
        plan: ReconcilePlan,
    },
    Applied {
        plan: ReconcilePlan,
        result: ApplyResult,
    },
    Aborted(PassError),
}

impl PassOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            PassOutcome::DryRun { .. } => EXIT_OK,
            PassOutcome::Applied { result, .. } if result.is_clean() => EXIT_OK,
            PassOutcome::Applied { .. } => EXIT_PARTIAL,
            PassOutcome::Aborted(_) => EXIT_FATAL,
        }
    }

    pub fn plan(&self) -> Option<&ReconcilePlan> {
        match self {
            PassOutcome::DryRun { plan } | PassOutcome::Applied { plan, .. } => Some(plan),
            PassOutcome::Aborted(_) => None,
        }
    }
}

/// Run one pass. Never fails; fatal conditions become [`PassOutcome::Aborted`].
///
/// A successful fetch refreshes `cache`; a failed one falls back to it only
/// when `use_cached_on_failure` is set and the cache is non-empty.
pub async fn run_pass<Q: ServiceQuery>(
    ctx: &PassContext<'_, Q>,
    cache: &mut AllowListCache,
) -> PassOutcome {
    match execute(ctx, cache).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Pass aborted, nothing applied: {}", e);
            PassOutcome::Aborted(e)
        }
    }
}

async fn execute<Q: ServiceQuery>(
    ctx: &PassContext<'_, Q>,
    cache: &mut AllowListCache,
) -> Result<PassOutcome, PassError> {
    let signals = ctx.prober.probe()?;
    for signal in &signals {
        info!(
            "Detected {} service: {}{}",
            signal.kind,
            signal.flavor,
            if signal.confidence { "" } else { " (transitioning)" }
        );
    }

    let entries = fetch_entries(ctx, cache).await?;

    let desired = synthesize(&signals, &entries, &ctx.static_rules)
        .map_err(|e| PassError::Policy(format!("{:#}", e)))?;
    info!(
        "Desired state: {} rule groups, {} firewall rules",
        desired.rule_groups().len(),
        desired.firewall_rules().len()
    );

    let current_daemon = ctx
        .daemon
        .list_rule_groups()
        .await
        .map_err(|e| PassError::Snapshot {
            target: Target::Daemon,
            message: format!("{:#}", e),
        })?;
    let current_firewall = ctx
        .firewall
        .list_rules()
        .await
        .map_err(|e| PassError::Snapshot {
            target: Target::Firewall,
            message: format!("{:#}", e),
        })?;

    let plan = reconcile(&desired, &current_daemon, &current_firewall, &ctx.scope);
    info!(
        "Plan: daemon +{} -{}, firewall +{} -{}",
        plan.daemon_adds.len(),
        plan.daemon_removes.len(),
        plan.firewall_adds.len(),
        plan.firewall_removes.len()
    );

    if ctx.dry_run {
        return Ok(PassOutcome::DryRun { plan });
    }

    if plan.is_empty() {
        info!("Already converged, nothing to apply");
    }

    let result = Applier::new(ctx.daemon, ctx.firewall, ctx.shutdown.clone())
        .concurrent(ctx.concurrent_targets)
        .apply(plan.clone())
        .await;

    Ok(PassOutcome::Applied { plan, result })
}

async fn fetch_entries<Q: ServiceQuery>(
    ctx: &PassContext<'_, Q>,
    cache: &mut AllowListCache,
) -> Result<Vec<AllowEntry>, PassError> {
    match ctx.source.fetch_allow_list().await {
        Ok(entries) => {
            cache.store(&entries);
            Ok(entries)
        }
        Err(e) if ctx.use_cached_on_failure && !cache.is_empty() => {
            warn!(
                "{}; falling back to cached allow-list ({} entries, fetched {})",
                e,
                cache.entries.len(),
                cache
                    .fetched_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "at an unknown time".to_string())
            );
            Ok(cache.entries.clone())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::daemon::mock::MemoryDaemon;
    use crate::error::{FetchError, FetchErrorKind};
    use crate::firewall::mock::MemoryFirewall;
    use crate::policy::fixtures::{group, rule};
    use crate::prober::{MockServiceQuery, UnitState};
    use async_trait::async_trait;

    const LABEL: &str = "jailsync-monitor";

    struct StaticSource(Result<Vec<AllowEntry>, FetchError>);

    #[async_trait]
    impl AllowListSource for StaticSource {
        async fn fetch_allow_list(&self) -> Result<Vec<AllowEntry>, FetchError> {
            self.0.clone()
        }
    }

    fn entries(prefixes: &[&str]) -> Vec<AllowEntry> {
        prefixes
            .iter()
            .map(|p| AllowEntry::new(p, &[80, 443], LABEL).unwrap())
            .collect()
    }

    fn nginx_prober() -> Prober<MockServiceQuery> {
        let mut query = MockServiceQuery::new();
        query.expect_state().returning(|unit| {
            Ok(if unit == "nginx" {
                UnitState::Active
            } else {
                UnitState::NotFound
            })
        });
        Prober::new(
            query,
            &["nginx".to_string(), "caddy".to_string()],
            &["mysql".to_string()],
        )
    }

    fn context<'a>(
        prober: &'a Prober<MockServiceQuery>,
        source: &'a StaticSource,
        daemon: &'a dyn IpsDaemon,
        firewall: &'a MemoryFirewall,
    ) -> PassContext<'a, MockServiceQuery> {
        PassContext {
            prober,
            source,
            daemon,
            firewall,
            static_rules: StaticRules::from_config("jailsync-", &PolicyConfig::default()),
            scope: OwnershipScope::new("jailsync-", LABEL),
            shutdown: ShutdownToken::new(),
            dry_run: false,
            use_cached_on_failure: false,
            concurrent_targets: false,
        }
    }

    #[tokio::test]
    async fn test_empty_fetch_aborts_without_touching_targets() {
        let prober = nginx_prober();
        let source = StaticSource(Err(FetchError::empty("provider returned []")));
        let daemon = MemoryDaemon::with_groups(vec![group("jailsync-sshd"), group("sshd")]);
        let firewall = MemoryFirewall::with_rules(vec![
            rule("69.162.124.0/24", 80, LABEL),
            rule("10.0.0.0/8", 22, "office"),
        ]);
        let before_groups = daemon.snapshot();
        let before_rules = firewall.snapshot();

        let ctx = context(&prober, &source, &daemon, &firewall);
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;

        match &outcome {
            PassOutcome::Aborted(PassError::Fetch(e)) => assert_eq!(e.kind, FetchErrorKind::Empty),
            other => panic!("expected fetch abort, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(), EXIT_FATAL);
        assert!(outcome.plan().is_none());
        assert_eq!(daemon.snapshot(), before_groups);
        assert_eq!(firewall.snapshot(), before_rules);
        assert_eq!(*daemon.reloads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cached_allow_list_fallback() {
        let prober = nginx_prober();
        let source = StaticSource(Err(FetchError::network("connection refused")));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let mut cache = AllowListCache::default();
        cache.store(&entries(&["69.162.124.0/24"]));

        let mut ctx = context(&prober, &source, &daemon, &firewall);
        ctx.use_cached_on_failure = true;
        let outcome = run_pass(&ctx, &mut cache).await;

        assert_eq!(outcome.exit_code(), EXIT_OK);
        assert_eq!(firewall.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_needs_non_empty_cache() {
        let prober = nginx_prober();
        let source = StaticSource(Err(FetchError::network("timed out")));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let mut ctx = context(&prober, &source, &daemon, &firewall);
        ctx.use_cached_on_failure = true;
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;

        assert_eq!(outcome.exit_code(), EXIT_FATAL);
        assert!(firewall.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_successful_fetch_refreshes_cache() {
        let prober = nginx_prober();
        let fresh = entries(&["216.144.250.150"]);
        let source = StaticSource(Ok(fresh.clone()));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let mut cache = AllowListCache::default();
        cache.store(&entries(&["192.0.2.0/24"]));

        let mut ctx = context(&prober, &source, &daemon, &firewall);
        ctx.dry_run = true;
        run_pass(&ctx, &mut cache).await;

        assert_eq!(cache.entries, fresh);
    }

    #[tokio::test]
    async fn test_dry_run_plans_but_changes_nothing() {
        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24", "216.144.250.150"])));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let mut ctx = context(&prober, &source, &daemon, &firewall);
        ctx.dry_run = true;
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;

        assert_eq!(outcome.exit_code(), EXIT_OK);
        let plan = outcome.plan().unwrap();
        assert_eq!(plan.firewall_adds.len(), 4);
        assert!(plan
            .daemon_adds
            .iter()
            .any(|g| g.name == "jailsync-botsearch" && g.enabled));
        assert!(daemon.snapshot().is_empty());
        assert!(firewall.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_converges_then_second_pass_is_noop() {
        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24", "2607:ff68:107::/48"])));
        let daemon = MemoryDaemon::with_groups(vec![group("jailsync-stale"), group("recidive")]);
        let firewall = MemoryFirewall::with_rules(vec![
            rule("192.0.2.0/24", 80, LABEL),
            rule("10.0.0.0/8", 22, "office"),
        ]);
        let ctx = context(&prober, &source, &daemon, &firewall);
        let mut cache = AllowListCache::default();

        let first = run_pass(&ctx, &mut cache).await;
        assert_eq!(first.exit_code(), EXIT_OK, "{:?}", first);

        let names: Vec<String> = daemon.snapshot().into_iter().map(|g| g.name).collect();
        assert!(names.contains(&"recidive".to_string()));
        assert!(!names.contains(&"jailsync-stale".to_string()));
        let rules = firewall.snapshot();
        assert!(rules.contains(&rule("10.0.0.0/8", 22, "office")));
        assert!(!rules.contains(&rule("192.0.2.0/24", 80, LABEL)));
        assert_eq!(rules.len(), 5);

        let second = run_pass(&ctx, &mut cache).await;
        assert_eq!(second.exit_code(), EXIT_OK);
        assert!(second.plan().unwrap().is_empty());
        assert_eq!(*daemon.reloads.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_operator_rule_with_same_source_and_port_survives() {
        let prober = nginx_prober();
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::with_rules(vec![rule("69.162.124.0/24", 80, "office")]);
        let mut cache = AllowListCache::default();

        let listed = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let outcome = run_pass(&context(&prober, &listed, &daemon, &firewall), &mut cache).await;
        assert_eq!(outcome.exit_code(), EXIT_OK, "{:?}", outcome);
        assert_eq!(
            outcome.plan().unwrap().firewall_adds,
            vec![rule("69.162.124.0/24", 443, LABEL)]
        );
        assert!(firewall
            .snapshot()
            .contains(&rule("69.162.124.0/24", 80, "office")));

        // Provider moves away from the prefix
        let moved = StaticSource(Ok(entries(&["216.144.250.150"])));
        let outcome = run_pass(&context(&prober, &moved, &daemon, &firewall), &mut cache).await;
        assert_eq!(outcome.exit_code(), EXIT_OK, "{:?}", outcome);
        let rules = firewall.snapshot();
        assert!(rules.contains(&rule("69.162.124.0/24", 80, "office")));
        assert!(!rules.contains(&rule("69.162.124.0/24", 443, LABEL)));
    }

    #[tokio::test]
    async fn test_fail2ban_store_converges_around_stray_sections() {
        use crate::cmd_abstraction::{output, MockCommandExecutor};
        use crate::daemon::Fail2banDaemon;
        use crate::fs_abstraction::real_fs;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let jail_dir = dir.path().join("jail.d");
        let filter_dir = dir.path().join("filter.d");
        std::fs::create_dir_all(&jail_dir).unwrap();
        std::fs::write(
            jail_dir.join("custom.local"),
            "[jailsync-legacy]\nenabled = true\nfilter = sshd\n",
        )
        .unwrap();

        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|_, args| {
            Ok(output(0, if args[0] == "ping" { "pong\n" } else { "OK\n" }, ""))
        });
        let daemon = Fail2banDaemon::new(&jail_dir, "fail2ban-client", &executor, real_fs())
            .filter_dir(&filter_dir)
            .managed_prefix("jailsync-");

        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let firewall = MemoryFirewall::default();
        let ctx = context(&prober, &source, &daemon, &firewall);
        let mut cache = AllowListCache::default();

        let first = run_pass(&ctx, &mut cache).await;
        assert_eq!(first.exit_code(), EXIT_OK, "{:?}", first);
        assert!(first.plan().unwrap().daemon_removes.is_empty());
        assert!(filter_dir.join("jailsync-portscan.conf").exists());
        assert!(filter_dir.join("jailsync-badports.conf").exists());
        assert!(jail_dir.join("custom.local").exists());

        let second = run_pass(&ctx, &mut cache).await;
        assert_eq!(second.exit_code(), EXIT_OK, "{:?}", second);
        assert!(second.plan().unwrap().is_empty(), "{:?}", second.plan());
    }

    #[tokio::test]
    async fn test_partial_failure_exits_one() {
        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let daemon = MemoryDaemon::default();
        let mut firewall = MemoryFirewall::default();
        firewall.fail_adds.insert(rule("69.162.124.0/24", 443, LABEL));

        let ctx = context(&prober, &source, &daemon, &firewall);
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;

        assert_eq!(outcome.exit_code(), EXIT_PARTIAL);
        match outcome {
            PassOutcome::Applied { result, .. } => {
                assert!(result.daemon_ok);
                assert!(!result.firewall_ok);
            }
            other => panic!("expected applied outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_failure_is_fatal() {
        let mut query = MockServiceQuery::new();
        query.expect_state().returning(|unit| {
            Err(crate::error::ProbeError::Unreachable {
                unit: unit.to_string(),
                reason: "Failed to connect to bus".to_string(),
            })
        });
        let prober = Prober::new(query, &["nginx".to_string()], &[]);
        let source = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let ctx = context(&prober, &source, &daemon, &firewall);
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;
        assert!(matches!(outcome, PassOutcome::Aborted(PassError::Probe(_))));
        assert_eq!(outcome.exit_code(), EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_fatal() {
        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let daemon = MemoryDaemon::default();
        let mut firewall = MemoryFirewall::default();
        firewall.fail_list = true;

        let ctx = context(&prober, &source, &daemon, &firewall);
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;
        assert!(matches!(
            outcome,
            PassOutcome::Aborted(PassError::Snapshot {
                target: Target::Firewall,
                ..
            })
        ));
        assert!(daemon.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pass_exits_one() {
        let prober = nginx_prober();
        let source = StaticSource(Ok(entries(&["69.162.124.0/24"])));
        let daemon = MemoryDaemon::default();
        let firewall = MemoryFirewall::default();

        let ctx = context(&prober, &source, &daemon, &firewall);
        ctx.shutdown.cancel();
        let outcome = run_pass(&ctx, &mut AllowListCache::default()).await;
        assert_eq!(outcome.exit_code(), EXIT_PARTIAL);
    }
}
