//! Intrusion-prevention daemon control interface (fail2ban).

mod fail2ban;
pub mod jail;

use anyhow::Result;
use async_trait::async_trait;

pub use fail2ban::Fail2banDaemon;

use crate::policy::RuleGroup;

/// Control plane of the intrusion-prevention daemon.
#[async_trait]
pub trait IpsDaemon: Send + Sync {
    /// Every rule group the daemon knows about, managed or not.
    async fn list_rule_groups(&self) -> Result<Vec<RuleGroup>>;

    /// Create or replace a group. Must be atomic per group.
    async fn upsert_rule_group(&self, group: &RuleGroup) -> Result<()>;

    async fn remove_rule_group(&self, name: &str) -> Result<()>;

    /// Make the daemon pick up stored changes.
    async fn reload(&self) -> Result<()>;

    async fn is_active(&self) -> Result<bool>;
}
