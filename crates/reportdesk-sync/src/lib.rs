//! # ReportDesk Sync
//!
//! Client-side synchronization core for the report dashboard: one in-memory
//! store of schedule state kept consistent across operator actions and
//! server-pushed alerts.
//!
//! ## Design Principles
//! - The server is authoritative: nothing is applied before it confirms
//! - One writer: every change is a single fold under the store lock
//! - No lock across `.await`: remote calls run with the store unlocked
//! - Rows are derived: the view never keeps state of its own
//!
//! ## Architecture
//! ```text
//! operator ──► ActionDispatcher ──► ScheduleApi (HTTP)
//!                    │                    │
//!                    └──── confirmed ◄────┘
//!                              │
//!   PushTransport (WS) ──► PushListener ──► ScheduleStore ──► project() ──► rows
//!                                               │
//!                                         watch::Receiver (revision)
//! ```

pub mod dispatch;
pub mod history;
pub mod listener;
pub mod push;
pub mod remote;
pub mod store;
pub mod view;

#[cfg(test)]
mod testing;

pub use dispatch::{ActionDispatcher, Dispatched};
pub use history::{group_by_month, load_history, MonthGroup};
pub use listener::{ListenerStats, PushListener};
pub use push::{PushStream, PushTransport, WsPushTransport};
pub use remote::{HttpScheduleApi, ScheduleApi};
pub use store::{ApplyOutcome, InFlightGuard, PatchOrigin, ScheduleStore, SharedStore};
pub use view::{project, render_table, RowAction, RowView};
