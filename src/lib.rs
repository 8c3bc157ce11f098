//! # jailsync - declarative fail2ban and ufw policy reconciliation
//!
//! Each pass computes the security policy a host *should* have from what is
//! running on it and from a provider-published allow-list, then converges the
//! intrusion-prevention daemon (fail2ban) and the host firewall (ufw) onto it.
//! Passes are idempotent: a second pass over an unchanged host does nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        jailsync                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: reconcile, probe, fetch, status, init      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Prober (systemctl is-active)   Fetcher (reqwest + rustls)  │
//! │    └── web / database signals     └── allow-list entries    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Synthesizer → PolicyDocument → Reconciler → ReconcilePlan  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Applier                                                    │
//! │    ├── IpsDaemon trait  → Fail2banDaemon (jail.d files)     │
//! │    └── Firewall trait   → UfwFirewall (labelled rules)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! jailsync only ever removes what it created: rule groups whose name starts
//! with the managed prefix (`jailsync-` by default) and firewall rules carrying
//! its label. Operator-created jails and rules are never touched.
//!
//! An empty or failed allow-list fetch aborts the pass before anything is
//! planned, so a provider outage never revokes existing allow rules.
//!
//! ## Example Usage
//!
//! ```no_run
//! use jailsync::policy::{AllowEntry, ServiceKind, ServiceSignal};
//! use jailsync::reconciler::{reconcile, OwnershipScope};
//! use jailsync::synthesizer::{synthesize, StaticRules};
//! use jailsync::config::PolicyConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let signals = vec![ServiceSignal::new(ServiceKind::Web, "nginx")];
//!     let entries = vec![AllowEntry::new("69.162.124.0/24", &[80, 443], "jailsync-monitor")?];
//!     let rules = StaticRules::from_config("jailsync-", &PolicyConfig::default());
//!
//!     let desired = synthesize(&signals, &entries, &rules)?;
//!     let plan = reconcile(
//!         &desired,
//!         &[],
//!         &[],
//!         &OwnershipScope::new("jailsync-", "jailsync-monitor"),
//!     );
//!     println!("{}", serde_json::to_string_pretty(&plan)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`policy`] - Signals, allow entries, rule groups, firewall rules
//! - [`prober`] - Service detection through systemd
//! - [`fetcher`] - HTTP client for the allow-list provider
//! - [`synthesizer`] - Desired-state document construction
//! - [`reconciler`] - Label-scoped diff into a plan
//! - [`applier`] - Plan execution with per-target verification
//! - [`pass`] - One full pass and its exit code
//! - [`daemon`] - fail2ban control (jail.d codec, reload, ping)
//! - [`firewall`] - ufw control
//! - [`config`] - Configuration parsing and validation
//! - [`state`] - Last pass record and allow-list cache
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`signal`] - Graceful shutdown signal handling
//! - [`validation`] - Input validation (CIDRs, ports, names, URLs)
//! - [`utils`] - Common utility functions (root check, formatting)

rust_i18n::i18n!("i18n", fallback = "en");

pub mod applier;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fetcher;
pub mod firewall;
pub mod fs_abstraction;
pub mod lock;
pub mod pass;
pub mod policy;
pub mod prober;
pub mod reconciler;
pub mod signal;
pub mod state;
pub mod synthesizer;
pub mod utils;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
