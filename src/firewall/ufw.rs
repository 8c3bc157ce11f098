//! ufw backend implementation.
//!
//! Rules are read from `ufw show added`, which prints user rules in the
//! same syntax used to create them, comment included:
//!
//! ```text
//! Added user rules (see 'ufw status' for running firewall):
//! ufw allow from 69.162.124.0/24 to any port 80 proto tcp comment 'jailsync-monitor'
//! ufw allow 22/tcp
//! ```

use anyhow::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use tracing::{debug, warn};

use super::Firewall;
use crate::cmd_abstraction::{run_checked, CommandExecutor};
use crate::policy::FirewallRule;
use crate::validation::validate_cidr;

pub struct UfwFirewall<'a> {
    ufw: String,
    executor: &'a dyn CommandExecutor,
}

impl<'a> UfwFirewall<'a> {
    pub fn new(ufw: impl Into<String>, executor: &'a dyn CommandExecutor) -> Self {
        Self {
            ufw: ufw.into(),
            executor,
        }
    }

    /// Arguments shared by `allow` and `delete allow`.
    fn rule_args(rule: &FirewallRule) -> Vec<String> {
        vec![
            "allow".to_string(),
            "proto".to_string(),
            "tcp".to_string(),
            "from".to_string(),
            rule.network_prefix.to_string(),
            "to".to_string(),
            "any".to_string(),
            "port".to_string(),
            rule.port.to_string(),
            "comment".to_string(),
            rule.label.clone(),
        ]
    }

    fn run_rule_command(&self, prefix: &[&str], rule: &FirewallRule) -> Result<()> {
        let mut args: Vec<&str> = prefix.to_vec();
        let rule_args = Self::rule_args(rule);
        args.extend(rule_args.iter().map(String::as_str));
        run_checked(self.executor, &self.ufw, &args)?;
        Ok(())
    }
}

#[async_trait]
impl Firewall for UfwFirewall<'_> {
    async fn list_rules(&self) -> Result<Vec<FirewallRule>> {
        let stdout = run_checked(self.executor, &self.ufw, &["show", "added"])?;
        let rules = parse_show_added(&stdout);
        debug!("ufw reports {} address/port allow rules", rules.len());
        Ok(rules)
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.run_rule_command(&[], rule)?;
        debug!("ufw: allowed {}", rule);
        Ok(())
    }

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.run_rule_command(&["delete"], rule)?;
        debug!("ufw: deleted {}", rule);
        Ok(())
    }
}

/// Parse `ufw show added` into allow rules that have a source prefix and a
/// single port. Other rules cannot belong to jailsync and are skipped.
pub fn parse_show_added(output: &str) -> Vec<FirewallRule> {
    output.lines().filter_map(parse_rule_line).collect()
}

fn parse_rule_line(line: &str) -> Option<FirewallRule> {
    let line = line.trim();
    let body = line.strip_prefix("ufw ")?;

    // Comment may contain spaces; split it off before tokenizing
    let (spec, label) = match body.split_once(" comment ") {
        Some((spec, comment)) => (spec, unquote(comment.trim())),
        None => (body, String::new()),
    };

    let tokens: Vec<&str> = spec.split_whitespace().collect();
    if tokens.first() != Some(&"allow") {
        return None;
    }

    let value_after = |key: &str| {
        tokens
            .iter()
            .position(|t| *t == key)
            .and_then(|i| tokens.get(i + 1).copied())
    };

    let from = value_after("from")?;
    if from == "any" {
        return None;
    }
    let port_token = value_after("port")?;
    let network_prefix: IpNet = match validate_cidr(from) {
        Ok(net) => net,
        Err(e) => {
            warn!("Ignoring ufw rule with unparseable source: {} ({})", line, e);
            return None;
        }
    };
    // Ranges and lists ("8000:8080", "80,443") are never created by jailsync
    let port: u16 = port_token.parse().ok().filter(|p| *p != 0)?;

    Some(FirewallRule {
        network_prefix,
        port,
        label,
    })
}

fn unquote(s: &str) -> String {
    let stripped = s
        .strip_prefix('\'')
        .and_then(|x| x.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|x| x.strip_suffix('"')))
        .unwrap_or(s);
    stripped.to_string()
}
