//! Reconciler: diff desired state against live state.
//!
//! Only state owned by this tool is ever scheduled for removal: rule groups
//! whose name carries the managed prefix, and firewall rules carrying the
//! managed label. Everything else in the live stores is left alone.

use ipnet::IpNet;
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

use crate::policy::{FirewallRule, PolicyDocument, RuleGroup};

/// How this tool recognises state it created.
#[derive(Debug, Clone)]
pub struct OwnershipScope {
    pub group_prefix: String,
    pub firewall_label: String,
}

impl OwnershipScope {
    pub fn new(group_prefix: impl Into<String>, firewall_label: impl Into<String>) -> Self {
        Self {
            group_prefix: group_prefix.into(),
            firewall_label: firewall_label.into(),
        }
    }

    pub fn owns_group(&self, name: &str) -> bool {
        name.starts_with(&self.group_prefix)
    }

    pub fn owns_rule(&self, rule: &FirewallRule) -> bool {
        rule.label == self.firewall_label
    }
}

/// Operations needed to converge. Consumed once by the applier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Groups to create or replace
    pub daemon_adds: Vec<RuleGroup>,
    pub daemon_removes: Vec<String>,
    pub firewall_adds: Vec<FirewallRule>,
    pub firewall_removes: Vec<FirewallRule>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.daemon_adds.is_empty()
            && self.daemon_removes.is_empty()
            && self.firewall_adds.is_empty()
            && self.firewall_removes.is_empty()
    }

    pub fn daemon_changes(&self) -> usize {
        self.daemon_adds.len() + self.daemon_removes.len()
    }

    pub fn firewall_changes(&self) -> usize {
        self.firewall_adds.len() + self.firewall_removes.len()
    }
}

/// Compute the minimal plan taking `current_*` to `desired`.
///
/// Adds follow desired order; removes follow current order.
pub fn reconcile(
    desired: &PolicyDocument,
    current_daemon: &[RuleGroup],
    current_firewall: &[FirewallRule],
    scope: &OwnershipScope,
) -> ReconcilePlan {
    let current_groups: HashSet<&RuleGroup> = current_daemon.iter().collect();
    let desired_names: HashSet<&str> = desired
        .rule_groups()
        .iter()
        .map(|g| g.name.as_str())
        .collect();

    // A group present with any differing field is replaced wholesale
    let daemon_adds = desired
        .rule_groups()
        .iter()
        .filter(|g| !current_groups.contains(g))
        .cloned()
        .collect();

    let mut removed = HashSet::new();
    let daemon_removes = current_daemon
        .iter()
        .map(|g| g.name.as_str())
        .filter(|name| !desired_names.contains(name) && scope.owns_group(name))
        .filter(|name| removed.insert(*name))
        .map(str::to_string)
        .collect();

    let current_rules: HashSet<&FirewallRule> = current_firewall.iter().collect();
    let desired_rules: HashSet<&FirewallRule> = desired.firewall_rules().iter().collect();

    // ufw matches on source and port only, so adding over a foreign rule
    // would relabel it as ours
    let foreign_keys: HashSet<(IpNet, u16)> = current_firewall
        .iter()
        .filter(|r| !scope.owns_rule(r))
        .map(FirewallRule::match_key)
        .collect();

    let firewall_adds = desired
        .firewall_rules()
        .iter()
        .filter(|r| !current_rules.contains(r))
        .filter(|r| {
            let foreign = foreign_keys.contains(&r.match_key());
            if foreign {
                warn!(
                    "Not adding {}: an unmanaged rule already allows {} on port {}",
                    r, r.network_prefix, r.port
                );
            }
            !foreign
        })
        .cloned()
        .collect();

    let mut removed_rules = HashSet::new();
    let firewall_removes = current_firewall
        .iter()
        .filter(|r| !desired_rules.contains(r) && scope.owns_rule(r))
        .filter(|r| removed_rules.insert(*r))
        .cloned()
        .collect();

    ReconcilePlan {
        daemon_adds,
        daemon_removes,
        firewall_adds,
        firewall_removes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::fixtures::{group, rule};

    const LABEL: &str = "jailsync-monitor";

    fn scope() -> OwnershipScope {
        OwnershipScope::new("jailsync-", LABEL)
    }

    fn doc(groups: Vec<RuleGroup>, rules: Vec<FirewallRule>) -> PolicyDocument {
        PolicyDocument::new(groups, rules).unwrap()
    }

    #[test]
    fn test_empty_current_adds_everything() {
        let desired = doc(
            vec![group("jailsync-sshd")],
            vec![rule("69.162.124.0/24", 80, LABEL), rule("69.162.124.0/24", 443, LABEL)],
        );
        let plan = reconcile(&desired, &[], &[], &scope());
        assert_eq!(plan.daemon_adds.len(), 1);
        assert_eq!(plan.firewall_adds.len(), 2);
        assert!(plan.daemon_removes.is_empty());
        assert!(plan.firewall_removes.is_empty());
    }

    #[test]
    fn test_identical_group_produces_no_ops() {
        let desired = doc(vec![group("jailsync-sshd")], vec![]);
        let plan = reconcile(&desired, &[group("jailsync-sshd")], &[], &scope());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_changed_group_is_replaced() {
        let mut live = group("jailsync-sshd");
        live.threshold.max_attempts = 10;
        let desired = doc(vec![group("jailsync-sshd")], vec![]);

        let plan = reconcile(&desired, &[live], &[], &scope());
        assert_eq!(plan.daemon_adds, vec![group("jailsync-sshd")]);
        assert!(plan.daemon_removes.is_empty());
    }

    #[test]
    fn test_only_managed_groups_removed() {
        let desired = doc(vec![group("jailsync-sshd")], vec![]);
        let live = vec![
            group("jailsync-sshd"),
            group("jailsync-botsearch"),
            group("sshd"),
            group("recidive"),
        ];
        let plan = reconcile(&desired, &live, &[], &scope());
        assert_eq!(plan.daemon_removes, vec!["jailsync-botsearch".to_string()]);
        assert!(plan.daemon_adds.is_empty());
    }

    #[test]
    fn test_unlabelled_rules_never_removed() {
        let desired = doc(vec![], vec![rule("69.162.124.0/24", 80, LABEL)]);
        let live = vec![
            rule("69.162.124.0/24", 80, LABEL),
            rule("69.162.124.0/24", 443, LABEL),
            rule("203.0.113.0/24", 22, "office"),
            rule("198.51.100.0/24", 443, ""),
        ];
        let plan = reconcile(&desired, &[], &live, &scope());
        assert_eq!(plan.firewall_removes, vec![rule("69.162.124.0/24", 443, LABEL)]);
        assert!(plan.firewall_adds.is_empty());
    }

    #[test]
    fn test_foreign_rule_on_same_source_and_port_is_not_taken_over() {
        let desired = doc(
            vec![],
            vec![rule("69.162.124.0/24", 80, LABEL), rule("69.162.124.0/24", 443, LABEL)],
        );
        let live = vec![rule("69.162.124.0/24", 80, "office"), rule("69.162.124.0/24", 22, "")];
        let plan = reconcile(&desired, &[], &live, &scope());
        assert_eq!(plan.firewall_adds, vec![rule("69.162.124.0/24", 443, LABEL)]);
        assert!(plan.firewall_removes.is_empty());

        // Provider later drops the prefix: the operator's rule stays
        let shrunk = doc(vec![], vec![]);
        let mut live = live;
        live.push(rule("69.162.124.0/24", 443, LABEL));
        let plan = reconcile(&shrunk, &[], &live, &scope());
        assert_eq!(plan.firewall_removes, vec![rule("69.162.124.0/24", 443, LABEL)]);
    }

    #[test]
    fn test_unlabelled_rule_on_same_source_and_port_blocks_add() {
        let desired = doc(vec![], vec![rule("10.0.0.0/8", 3306, LABEL)]);
        let live = vec![rule("10.0.0.0/8", 3306, "")];
        assert!(reconcile(&desired, &[], &live, &scope()).is_empty());
    }

    #[test]
    fn test_duplicate_live_entries_removed_once() {
        let desired = doc(vec![], vec![]);
        let live_rules = vec![rule("10.0.0.0/8", 80, LABEL), rule("10.0.0.0/8", 80, LABEL)];
        let live_groups = vec![group("jailsync-old"), group("jailsync-old")];
        let plan = reconcile(&desired, &live_groups, &live_rules, &scope());
        assert_eq!(plan.firewall_removes.len(), 1);
        assert_eq!(plan.daemon_removes.len(), 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let desired = doc(
            vec![group("jailsync-sshd"), group("jailsync-portscan")],
            vec![rule("69.162.124.0/24", 80, LABEL)],
        );
        let live_groups = vec![group("jailsync-stale"), group("custom")];
        let live_rules = vec![rule("192.0.2.0/24", 80, LABEL), rule("192.0.2.0/24", 22, "ops")];

        let plan = reconcile(&desired, &live_groups, &live_rules, &scope());
        assert!(!plan.is_empty());

        // Simulate a fully successful apply
        let mut groups: Vec<RuleGroup> = live_groups
            .into_iter()
            .filter(|g| !plan.daemon_removes.contains(&g.name))
            .collect();
        groups.extend(plan.daemon_adds.iter().cloned());
        let mut rules: Vec<FirewallRule> = live_rules
            .into_iter()
            .filter(|r| !plan.firewall_removes.contains(r))
            .collect();
        rules.extend(plan.firewall_adds.iter().cloned());

        let second = reconcile(&desired, &groups, &rules, &scope());
        assert!(second.is_empty(), "second plan not empty: {:?}", second);
    }

    #[test]
    fn test_plan_counts() {
        let plan = ReconcilePlan {
            daemon_adds: vec![group("a")],
            daemon_removes: vec!["b".to_string(), "c".to_string()],
            firewall_adds: vec![],
            firewall_removes: vec![rule("10.0.0.0/8", 80, LABEL)],
        };
        assert_eq!(plan.daemon_changes(), 3);
        assert_eq!(plan.firewall_changes(), 1);
        assert!(!plan.is_empty());
        assert!(ReconcilePlan::default().is_empty());
    }
}
