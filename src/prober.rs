//! Environment prober: which web server and database are running here.
//!
//! The prober never inspects the host directly. It asks a [`ServiceQuery`]
//! capability about well-known unit names in priority order and keeps the
//! first active one per kind.

use tracing::debug;

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::ProbeError;
use crate::policy::{ServiceKind, ServiceSignal};

/// State of a unit as reported by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    /// Starting or reloading: present, but not yet confirmed healthy
    Transitioning,
    Inactive,
    NotFound,
}

/// "Is this service running" capability.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceQuery: Send + Sync {
    fn state(&self, unit: &str) -> Result<UnitState, ProbeError>;
}

/// Queries systemd with `systemctl is-active <unit>`.
pub struct SystemctlQuery<'a> {
    executor: &'a dyn CommandExecutor,
    systemctl: String,
}

impl<'a> SystemctlQuery<'a> {
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self {
            executor,
            systemctl: "systemctl".to_string(),
        }
    }
}

impl ServiceQuery for SystemctlQuery<'_> {
    fn state(&self, unit: &str) -> Result<UnitState, ProbeError> {
        let output = self
            .executor
            .run(&self.systemctl, &args_to_strings(&["is-active", unit]))
            .map_err(|e| ProbeError::Unreachable {
                unit: unit.to_string(),
                reason: e.to_string(),
            })?;

        // is-active exits 0 only for "active"; the printed state is authoritative
        match output.first_line() {
            "active" => Ok(UnitState::Active),
            "activating" | "reloading" => Ok(UnitState::Transitioning),
            "inactive" | "failed" | "deactivating" | "maintenance" => Ok(UnitState::Inactive),
            "unknown" => Ok(UnitState::NotFound),
            "" if output.code == Some(4) => Ok(UnitState::NotFound),
            "" => Err(ProbeError::Unreachable {
                unit: unit.to_string(),
                reason: output.failure_message(),
            }),
            other => Err(ProbeError::UnexpectedState {
                unit: unit.to_string(),
                state: other.to_string(),
            }),
        }
    }
}

/// Candidate unit names per service kind, highest priority first.
#[derive(Debug, Clone)]
pub struct Prober<Q: ServiceQuery> {
    query: Q,
    candidates: Vec<(ServiceKind, Vec<String>)>,
}

impl<Q: ServiceQuery> Prober<Q> {
    pub fn new(query: Q, web: &[String], database: &[String]) -> Self {
        Self {
            query,
            candidates: vec![
                (ServiceKind::Web, web.to_vec()),
                (ServiceKind::Database, database.to_vec()),
            ],
        }
    }

    /// Detect at most one web and one database service.
    pub fn probe(&self) -> Result<Vec<ServiceSignal>, ProbeError> {
        let mut signals = Vec::new();

        for (kind, units) in &self.candidates {
            for unit in units {
                let state = self.query.state(unit)?;
                debug!("Probe {} candidate {}: {:?}", kind, unit, state);
                let confidence = match state {
                    UnitState::Active => true,
                    UnitState::Transitioning => false,
                    UnitState::Inactive | UnitState::NotFound => continue,
                };
                signals.push(ServiceSignal {
                    kind: *kind,
                    flavor: unit.clone(),
                    confidence,
                });
                break;
            }
        }

        Ok(signals)
    }
}
