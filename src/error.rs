//! Error types for jailsync.
//!
//! Domain errors are typed so the pass runner can decide what is fatal,
//! what is retryable on the next pass and what is only reported.
//! Command and I/O plumbing uses `anyhow` with context, as elsewhere.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The service manager could not answer a probe query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Service manager unreachable while querying '{unit}': {reason}")]
    Unreachable { unit: String, reason: String },

    #[error("Unrecognised state '{state}' reported for '{unit}'")]
    UnexpectedState { unit: String, state: String },
}

/// Why an allow-list fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorKind {
    /// Transport failure, timeout or non-success HTTP status. Retryable.
    Network,
    /// Body is not the expected structure, or every entry was malformed.
    Parse,
    /// The provider returned zero entries. Never treated as "allow nothing".
    Empty,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Parse => "parse",
            FetchErrorKind::Empty => "empty",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Allow-list fetch failed ({kind}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            message: message.into(),
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Empty,
            message: message.into(),
        }
    }

    /// Whether the next scheduled pass may simply try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, FetchErrorKind::Empty)
    }
}

/// Which managed system an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Daemon,
    Firewall,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Daemon => f.write_str("daemon"),
            Target::Firewall => f.write_str("firewall"),
        }
    }
}

/// A single failed apply step. Never aborts the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("[{target}] {operation}: {message}")]
pub struct ApplyError {
    pub target: Target,
    pub operation: String,
    pub message: String,
}

impl ApplyError {
    pub fn new(target: Target, operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            target,
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Fatal precondition failures that abort a pass before anything is applied.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock unavailable: {0}")]
    Lock(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid policy: {0}")]
    Policy(String),

    #[error("Failed to read current {target} state: {message}")]
    Snapshot { target: Target, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::network("timeout").is_retryable());
        assert!(FetchError::parse("bad json").is_retryable());
        assert!(!FetchError::empty("no entries").is_retryable());
    }

    #[test]
    fn test_fetch_error_display_names_kind() {
        let err = FetchError::empty("provider returned []");
        assert_eq!(
            err.to_string(),
            "Allow-list fetch failed (empty): provider returned []"
        );
    }

    #[test]
    fn test_apply_error_display() {
        let err = ApplyError::new(Target::Firewall, "add 10.0.0.0/8:80", "ufw exited 1");
        assert_eq!(err.to_string(), "[firewall] add 10.0.0.0/8:80: ufw exited 1");
    }

    #[test]
    fn test_pass_error_wraps_probe() {
        let err: PassError = ProbeError::Unreachable {
            unit: "nginx".to_string(),
            reason: "no such file".to_string(),
        }
        .into();
        assert!(err.to_string().contains("nginx"));
    }
}
