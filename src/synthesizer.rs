//! Policy synthesizer: probe signals + allow-list + static rules → desired state.
//!
//! Gating is table-driven. Each conditional group names the service kind that
//! gates it and the flavors it has a daemon filter for; a detected flavor
//! without a filter still yields the group, disabled, so the document records
//! what could be protected.
//!
//! Filters fail2ban does not ship (port scans, bad ports, Caddy's JSON log)
//! are carried in the group itself and written by the daemon backend.

use anyhow::Result;

use crate::config::PolicyConfig;
use crate::policy::{
    ActionScope, AllowEntry, FilterDefinition, FirewallRule, MatchSpec, PolicyDocument, RuleGroup,
    ServiceKind, ServiceSignal, Threshold,
};

/// Static inputs: naming, shared tuning and operator-defined groups.
#[derive(Debug, Clone)]
pub struct StaticRules {
    pub prefix: String,
    pub ban_seconds: u64,
    pub ban_max_seconds: u64,
    pub escalating: bool,
    pub extra_groups: Vec<RuleGroup>,
}

impl StaticRules {
    pub fn from_config(prefix: &str, policy: &PolicyConfig) -> Self {
        Self {
            prefix: prefix.to_string(),
            ban_seconds: policy.ban_seconds,
            ban_max_seconds: policy.ban_max_seconds,
            escalating: policy.escalating,
            extra_groups: policy.extra_groups.clone(),
        }
    }
}

/// Where a generated group's filter comes from.
#[derive(Clone, Copy)]
enum FilterRef {
    /// Shipped with the daemon package
    Stock(&'static str),
    /// Written by jailsync under the group's own name
    Own {
        failregex: &'static str,
        datepattern: Option<&'static str>,
    },
}

impl FilterRef {
    fn match_spec(self, group_name: &str, log_path: &str, port: Option<&str>) -> MatchSpec {
        let (filter, definition) = match self {
            FilterRef::Stock(name) => (name.to_string(), None),
            FilterRef::Own {
                failregex,
                datepattern,
            } => (
                group_name.to_string(),
                Some(FilterDefinition {
                    failregex: failregex.to_string(),
                    datepattern: datepattern.map(str::to_string),
                }),
            ),
        };
        MatchSpec {
            filter,
            log_path: Some(log_path.to_string()),
            port: port.map(str::to_string),
            definition,
        }
    }
}

/// Blocked inbound TCP SYNs as logged by ufw
const UFW_SYN_BLOCK: &str = r"^.*\[UFW BLOCK\] IN=\S+ .*SRC=<HOST> .*PROTO=TCP .*\bSYN\b";

/// Blocked connection attempts to telnet, RPC, SMB, MSSQL, RDP or VNC
const UFW_BAD_PORT: &str =
    r"^.*\[UFW BLOCK\] IN=\S+ .*SRC=<HOST> .*DPT=(?:23|135|139|445|1433|3389|5900)\b";

/// Caddy's JSON access log hitting well-known scanner paths
const CADDY_BOTSEARCH: &str = r#"^.*"remote_ip":"<HOST>".*"uri":"[^"]*(?:wp-login\.php|xmlrpc\.php|/\.env|/\.git/|phpmyadmin|/cgi-bin/)"#;

/// Template for a generated group, before naming and tuning.
struct GroupTemplate {
    suffix: &'static str,
    filter: FilterRef,
    log_path: &'static str,
    port: Option<&'static str>,
    max_attempts: u32,
    window_seconds: u64,
    /// Multiplier on the configured base ban duration
    ban_factor: u64,
    scope: ActionScope,
}

const BASE_GROUPS: &[GroupTemplate] = &[
    GroupTemplate {
        suffix: "sshd",
        filter: FilterRef::Stock("sshd"),
        log_path: "%(sshd_log)s",
        port: Some("ssh"),
        max_attempts: 5,
        window_seconds: 600,
        ban_factor: 1,
        scope: ActionScope::SinglePort,
    },
    GroupTemplate {
        suffix: "portscan",
        filter: FilterRef::Own {
            failregex: UFW_SYN_BLOCK,
            datepattern: None,
        },
        log_path: "/var/log/ufw.log",
        port: None,
        max_attempts: 3,
        window_seconds: 300,
        ban_factor: 24,
        scope: ActionScope::AllPorts,
    },
    GroupTemplate {
        suffix: "badports",
        filter: FilterRef::Own {
            failregex: UFW_BAD_PORT,
            datepattern: None,
        },
        log_path: "/var/log/ufw.log",
        port: None,
        max_attempts: 1,
        window_seconds: 3600,
        ban_factor: 24,
        scope: ActionScope::AllPorts,
    },
];

/// A flavor the gate knows about. `filter: None` marks a flavor that is
/// recognised but has no filter yet, so its group is a disabled placeholder.
struct Flavor {
    flavor: &'static str,
    filter: Option<FilterRef>,
    log_path: &'static str,
    port: &'static str,
}

/// A group emitted only when a service of `kind` was detected.
struct GatedGroup {
    kind: ServiceKind,
    suffix: &'static str,
    /// Port for flavors missing from `flavors`
    default_port: Option<&'static str>,
    max_attempts: u32,
    window_seconds: u64,
    ban_factor: u64,
    flavors: &'static [Flavor],
}

const GATED_GROUPS: &[GatedGroup] = &[
    GatedGroup {
        kind: ServiceKind::Web,
        suffix: "botsearch",
        default_port: Some("http,https"),
        max_attempts: 2,
        window_seconds: 600,
        ban_factor: 24,
        flavors: &[
            Flavor {
                flavor: "nginx",
                filter: Some(FilterRef::Stock("nginx-botsearch")),
                log_path: "/var/log/nginx/access.log",
                port: "http,https",
            },
            Flavor {
                flavor: "caddy",
                filter: Some(FilterRef::Own {
                    failregex: CADDY_BOTSEARCH,
                    datepattern: Some(r#""ts":{EPOCH}"#),
                }),
                log_path: "/var/log/caddy/access.log",
                port: "http,https",
            },
            Flavor {
                flavor: "apache2",
                filter: Some(FilterRef::Stock("apache-badbots")),
                log_path: "/var/log/apache2/access.log",
                port: "http,https",
            },
            Flavor {
                flavor: "httpd",
                filter: Some(FilterRef::Stock("apache-badbots")),
                log_path: "/var/log/httpd/access_log",
                port: "http,https",
            },
        ],
    },
    GatedGroup {
        kind: ServiceKind::Database,
        suffix: "db-auth",
        default_port: None,
        max_attempts: 5,
        window_seconds: 600,
        ban_factor: 1,
        flavors: &[
            Flavor {
                flavor: "mysql",
                filter: Some(FilterRef::Stock("mysqld-auth")),
                log_path: "/var/log/mysql/error.log",
                port: "3306",
            },
            Flavor {
                flavor: "mariadb",
                filter: Some(FilterRef::Stock("mysqld-auth")),
                log_path: "/var/log/mysql/error.log",
                port: "3306",
            },
            Flavor {
                flavor: "postgresql",
                filter: None,
                log_path: "/var/log/postgresql/postgresql-main.log",
                port: "5432",
            },
        ],
    },
];

impl StaticRules {
    fn ban(&self, factor: u64) -> (u64, u64) {
        let ban = self.ban_seconds.saturating_mul(factor);
        (ban, self.ban_max_seconds.max(ban))
    }

    fn base_group(&self, t: &GroupTemplate) -> RuleGroup {
        let (ban, ban_max) = self.ban(t.ban_factor);
        let name = format!("{}{}", self.prefix, t.suffix);
        RuleGroup {
            match_spec: t.filter.match_spec(&name, t.log_path, t.port),
            name,
            enabled: true,
            threshold: Threshold {
                max_attempts: t.max_attempts,
                window_seconds: t.window_seconds,
            },
            ban_duration_seconds: ban,
            ban_duration_max_seconds: ban_max,
            escalating: self.escalating,
            action_scope: t.scope,
        }
    }

    fn gated_group(&self, gate: &GatedGroup, signal: &ServiceSignal) -> RuleGroup {
        let (ban, ban_max) = self.ban(gate.ban_factor);
        let name = format!("{}{}", self.prefix, gate.suffix);
        let known = gate.flavors.iter().find(|f| f.flavor == signal.flavor);

        // Flavors without a filter keep a placeholder filter named after the flavor
        let (enabled, match_spec) = match known {
            Some(Flavor {
                filter: Some(filter),
                log_path,
                port,
                ..
            }) => (true, filter.match_spec(&name, log_path, Some(*port))),
            _ => (
                false,
                MatchSpec {
                    filter: format!("{}-{}", signal.flavor, gate.suffix),
                    log_path: None,
                    port: known.map(|f| f.port).or(gate.default_port).map(str::to_string),
                    definition: None,
                },
            ),
        };

        RuleGroup {
            name,
            enabled,
            match_spec,
            threshold: Threshold {
                max_attempts: gate.max_attempts,
                window_seconds: gate.window_seconds,
            },
            ban_duration_seconds: ban,
            ban_duration_max_seconds: ban_max,
            escalating: self.escalating,
            action_scope: ActionScope::SinglePort,
        }
    }
}

/// Build the desired-state document for one pass.
///
/// Pure: identical arguments always produce an identical document.
pub fn synthesize(
    signals: &[ServiceSignal],
    allow_entries: &[AllowEntry],
    static_rules: &StaticRules,
) -> Result<PolicyDocument> {
    let mut groups: Vec<RuleGroup> = BASE_GROUPS
        .iter()
        .map(|t| static_rules.base_group(t))
        .collect();

    for gate in GATED_GROUPS {
        if let Some(signal) = signals.iter().find(|s| s.kind == gate.kind) {
            groups.push(static_rules.gated_group(gate, signal));
        }
    }

    groups.extend(static_rules.extra_groups.iter().cloned());

    let rules = allow_entries
        .iter()
        .flat_map(|entry| {
            entry.ports.iter().map(move |port| FirewallRule {
                network_prefix: entry.network_prefix,
                port: *port,
                label: entry.label.clone(),
            })
        })
        .collect();

    PolicyDocument::new(groups, rules)
}
