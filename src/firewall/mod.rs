//! Firewall control interface (ufw).

mod ufw;

use anyhow::Result;
use async_trait::async_trait;

pub use ufw::{parse_show_added, UfwFirewall};

use crate::policy::FirewallRule;

/// Rule store of the host firewall.
#[async_trait]
pub trait Firewall: Send + Sync {
    /// All allow rules, whoever created them.
    async fn list_rules(&self) -> Result<Vec<FirewallRule>>;

    async fn add_rule(&self, rule: &FirewallRule) -> Result<()>;

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<()>;
}
