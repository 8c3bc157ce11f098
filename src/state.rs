//! Persistent pass state: the last pass record and the last good allow-list.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::fs_abstraction::FileSystem;
use crate::pass::PassOutcome;
use crate::policy::AllowEntry;

/// Summary of one finished pass, as shown by `jailsync status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub finished_at: DateTime<Utc>,
    /// `clean`, `dry_run`, `partial`, `cancelled` or `aborted`
    pub outcome: String,
    pub exit_code: u8,
    pub daemon_changes: usize,
    pub firewall_changes: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PassRecord {
    pub fn from_outcome(outcome: &PassOutcome) -> Self {
        let (label, daemon_changes, firewall_changes, errors) = match outcome {
            PassOutcome::DryRun { plan } => (
                "dry_run",
                plan.daemon_changes(),
                plan.firewall_changes(),
                Vec::new(),
            ),
            PassOutcome::Applied { plan, result } => {
                let label = if result.cancelled {
                    "cancelled"
                } else if result.is_clean() {
                    "clean"
                } else {
                    "partial"
                };
                (
                    label,
                    plan.daemon_changes(),
                    plan.firewall_changes(),
                    result.errors.iter().map(|e| e.to_string()).collect(),
                )
            }
            PassOutcome::Aborted(e) => ("aborted", 0, 0, vec![e.to_string()]),
        };

        Self {
            finished_at: Utc::now(),
            outcome: label.to_string(),
            exit_code: outcome.exit_code(),
            daemon_changes,
            firewall_changes,
            errors,
        }
    }
}

/// Last allow-list that passed validation, kept for the opt-in fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowListCache {
    pub fetched_at: Option<DateTime<Utc>>,
    pub entries: Vec<AllowEntry>,
}

impl AllowListCache {
    pub fn store(&mut self, entries: &[AllowEntry]) {
        self.entries = entries.to_vec();
        self.fetched_at = Some(Utc::now());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JailsyncState {
    pub last_pass: Option<PassRecord>,
    pub allow_list: AllowListCache,
}

impl JailsyncState {
    /// Load state, or the empty state if the file does not exist yet.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            return Ok(Self::default());
        }
        let content = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read state file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {:?}", path))
    }

    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        fs.write_atomic(path, content.as_bytes(), 0o600)
            .with_context(|| format!("Failed to write state file: {:?}", path))
    }
}
