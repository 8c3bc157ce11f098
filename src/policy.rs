//! Desired-state data model.
//!
//! Everything here is plain data: signals produced by the prober, allow
//! entries produced by the fetcher, and the [`PolicyDocument`] the synthesizer
//! builds for one pass.

use anyhow::{bail, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::validation::{validate_cidr, validate_group_name, validate_port};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Web,
    Database,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Web => f.write_str("web"),
            ServiceKind::Database => f.write_str("database"),
        }
    }
}

/// A service detected on the host during one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSignal {
    pub kind: ServiceKind,
    /// Unit name that matched, e.g. `nginx` or `mariadb`
    pub flavor: String,
    /// `false` when the unit was caught mid-transition (activating, reloading)
    pub confidence: bool,
}

impl ServiceSignal {
    pub fn new(kind: ServiceKind, flavor: impl Into<String>) -> Self {
        Self {
            kind,
            flavor: flavor.into(),
            confidence: true,
        }
    }
}

/// A prefix the allow-list provider says must be reachable on `ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowEntry {
    pub network_prefix: IpNet,
    pub ports: BTreeSet<u16>,
    pub label: String,
}

impl AllowEntry {
    /// Build a validated entry from raw provider data.
    pub fn new(prefix: &str, ports: &[u32], label: &str) -> Result<Self> {
        let network_prefix = validate_cidr(prefix)?;
        if ports.is_empty() {
            bail!("Allow entry {} has no ports", network_prefix);
        }
        let ports = ports
            .iter()
            .map(|p| validate_port(*p))
            .collect::<Result<BTreeSet<u16>>>()?;
        Ok(Self {
            network_prefix,
            ports,
            label: label.to_string(),
        })
    }
}

/// Opaque filter description handed to the daemon's own filter language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MatchSpec {
    /// Daemon filter name (e.g. `sshd`, `nginx-botsearch`)
    pub filter: String,
    /// One path per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    /// Port expression for single-port bans (e.g. `ssh`, `http,https`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Filter shipped by jailsync itself rather than by the daemon's package.
    /// When set, `filter` must equal the group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<FilterDefinition>,
}

/// Patterns of a managed filter, in the daemon's regex dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// One pattern per line; `<HOST>` marks the offending address
    pub failregex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datepattern: Option<String>,
}

/// Trim every line of a multi-line value and drop blank ones, which is the
/// only form the jail file format can carry back unchanged.
pub fn normalize_lines(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl MatchSpec {
    fn normalize(&mut self) {
        if let Some(log_path) = self.log_path.as_mut() {
            *log_path = normalize_lines(log_path);
        }
        if let Some(def) = self.definition.as_mut() {
            def.failregex = normalize_lines(&def.failregex);
            if let Some(datepattern) = def.datepattern.as_mut() {
                *datepattern = datepattern.trim().to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Threshold {
    pub max_attempts: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionScope {
    #[default]
    SinglePort,
    AllPorts,
}

/// A named detection-and-response policy for the intrusion-prevention daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    pub enabled: bool,
    pub match_spec: MatchSpec,
    pub threshold: Threshold,
    pub ban_duration_seconds: u64,
    pub ban_duration_max_seconds: u64,
    pub escalating: bool,
    #[serde(default)]
    pub action_scope: ActionScope,
}

impl RuleGroup {
    /// Check the per-group invariants.
    pub fn validate(&self) -> Result<()> {
        validate_group_name(&self.name)?;
        if self.threshold.max_attempts < 1 {
            bail!("Rule group '{}': max_attempts must be at least 1", self.name);
        }
        if self.ban_duration_max_seconds < self.ban_duration_seconds {
            bail!(
                "Rule group '{}': ban_duration_max_seconds ({}) is below ban_duration_seconds ({})",
                self.name,
                self.ban_duration_max_seconds,
                self.ban_duration_seconds
            );
        }
        if self.match_spec.filter.trim().is_empty() {
            bail!("Rule group '{}': filter cannot be empty", self.name);
        }
        if let Some(def) = &self.match_spec.definition {
            if self.match_spec.filter != self.name {
                bail!(
                    "Rule group '{}': a group defining its own filter must name the filter '{}'",
                    self.name,
                    self.name
                );
            }
            if normalize_lines(&def.failregex).is_empty() {
                bail!("Rule group '{}': failregex cannot be empty", self.name);
            }
        }
        Ok(())
    }
}

/// A firewall allow rule. The whole triple is its identity in a plan, but the
/// firewall itself matches rules on source and port only (see [`Self::match_key`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirewallRule {
    pub network_prefix: IpNet,
    pub port: u16,
    pub label: String,
}

impl FirewallRule {
    /// What ufw compares when deciding whether a rule already exists. The
    /// comment is not part of it: re-adding a rule only rewrites its comment.
    pub fn match_key(&self) -> (IpNet, u16) {
        (self.network_prefix, self.port)
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} port {} ({})", self.network_prefix, self.port, self.label)
    }
}

/// The desired state for one pass. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDocument {
    rule_groups: Vec<RuleGroup>,
    firewall_rules: Vec<FirewallRule>,
}

impl PolicyDocument {
    /// Build a document, enforcing group invariants and name uniqueness.
    /// Multi-line match values are normalized and duplicate firewall rules
    /// collapse to their first occurrence.
    pub fn new(mut rule_groups: Vec<RuleGroup>, firewall_rules: Vec<FirewallRule>) -> Result<Self> {
        let mut names = HashSet::new();
        for group in &mut rule_groups {
            group.match_spec.normalize();
        }
        for group in &rule_groups {
            group.validate()?;
            if !names.insert(group.name.as_str()) {
                bail!("Duplicate rule group name '{}'", group.name);
            }
        }

        let mut seen = HashSet::new();
        let firewall_rules = firewall_rules
            .into_iter()
            .filter(|rule| seen.insert(rule.clone()))
            .collect();

        Ok(Self {
            rule_groups,
            firewall_rules,
        })
    }

    pub fn rule_groups(&self) -> &[RuleGroup] {
        &self.rule_groups
    }

    pub fn firewall_rules(&self) -> &[FirewallRule] {
        &self.firewall_rules
    }

    pub fn rule_group(&self, name: &str) -> Option<&RuleGroup> {
        self.rule_groups.iter().find(|g| g.name == name)
    }
}
