//! # ReportDesk Core
//!
//! Shared types for the ReportDesk dashboard client: the schedule data
//! model, the error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::DeskConfig;
pub use error::{DeskError, Precondition, Result};
pub use types::{
    ActionKind, ActionPayload, ActionRequest, CompletionStatus, NewSchedule, PushEvent,
    PushEventName, ReportRecord, Schedule, ScheduleChanges, ScheduleId, SchedulePatch,
};
