//! Error taxonomy for ReportDesk.
//!
//! Every failure is scoped to the single operation that produced it.
//! Anomalies (push events for unknown schedules) are not errors; the store
//! reports them as an apply outcome and logs them.

use crate::types::{ActionKind, ScheduleId};

/// Result alias used across ReportDesk crates.
pub type Result<T> = std::result::Result<T, DeskError>;

/// ReportDesk error.
#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    /// Rejected locally before any remote call was made.
    #[error("{0}")]
    LocalPrecondition(Precondition),

    /// The server refused the request (validation failure, not found, ...).
    #[error("{reason}")]
    RemoteRejection { status: Option<u16>, reason: String },

    /// Network, timeout, or undecodable response.
    #[error("Transport error: {0}")]
    TransportFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a request never left the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("schedule {0} is inactive and cannot be run now")]
    Inactive(ScheduleId),

    #[error("a {kind} request for {target} is already in progress")]
    InFlight { kind: ActionKind, target: String },

    #[error("schedule {0} is not loaded")]
    UnknownSchedule(ScheduleId),

    #[error("interval must be a positive number of minutes (got {0})")]
    InvalidInterval(i64),

    /// Request whose target or payload does not fit its kind.
    #[error("malformed {0} request: missing target or payload")]
    Malformed(ActionKind),
}

impl DeskError {
    /// Shorthand for a server rejection.
    pub fn rejected(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::RemoteRejection {
            status,
            reason: reason.into(),
        }
    }

    /// True when the server answered "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteRejection { status: Some(404), .. })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalPrecondition(_))
    }

    /// Text to show the operator.
    ///
    /// Server reasons are passed through verbatim; transport failures get a
    /// generic message since their detail is only useful in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::LocalPrecondition(p) => p.to_string(),
            Self::RemoteRejection { reason, .. } => reason.clone(),
            Self::TransportFailure(_) => {
                "Could not reach the server. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<Precondition> for DeskError {
    fn from(p: Precondition) -> Self {
        Self::LocalPrecondition(p)
    }
}
