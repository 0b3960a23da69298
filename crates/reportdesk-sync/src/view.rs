//! View projection: store snapshot → table rows.

use chrono::{DateTime, Utc};
use reportdesk_core::types::{ActionKind, CompletionStatus, Schedule, ScheduleId};

use crate::store::ScheduleStore;

/// A control offered on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowAction {
    Edit,
    Delete,
    ToggleActive,
    RunNow,
    MarkCompleted,
}

impl RowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::ToggleActive => "toggle_active",
            Self::RunNow => "run_now",
            Self::MarkCompleted => "mark_completed",
        }
    }

    /// The dispatcher action this control issues.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Edit => ActionKind::Update,
            Self::Delete => ActionKind::Delete,
            Self::ToggleActive => ActionKind::ToggleActive,
            Self::RunNow => ActionKind::RunNow,
            Self::MarkCompleted => ActionKind::MarkCompleted,
        }
    }

    fn from_kind(kind: ActionKind) -> Option<Self> {
        match kind {
            ActionKind::Create => None,
            ActionKind::Update => Some(Self::Edit),
            ActionKind::Delete => Some(Self::Delete),
            ActionKind::ToggleActive => Some(Self::ToggleActive),
            ActionKind::RunNow => Some(Self::RunNow),
            ActionKind::MarkCompleted => Some(Self::MarkCompleted),
        }
    }
}

/// One rendered schedule row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub id: ScheduleId,
    pub description: String,
    pub interval: u32,
    pub path: Option<String>,
    pub url: Option<String>,
    pub active: bool,
    pub status_label: &'static str,
    pub toggle_label: &'static str,
    pub available_actions: Vec<RowAction>,
    /// Offered actions with a request outstanding; shown disabled.
    pub busy_actions: Vec<RowAction>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl RowView {
    pub fn offers(&self, action: RowAction) -> bool {
        self.available_actions.contains(&action)
    }

    /// Offered and not currently busy.
    pub fn enabled(&self, action: RowAction) -> bool {
        self.offers(action) && !self.busy_actions.contains(&action)
    }
}

/// Project every record in display order. Pure: same snapshot, same rows.
pub fn project(store: &ScheduleStore) -> Vec<RowView> {
    store
        .list()
        .into_iter()
        .map(|schedule| project_row(schedule, store.busy_kinds(&schedule.id)))
        .collect()
}

fn project_row(schedule: &Schedule, busy: Vec<ActionKind>) -> RowView {
    let mut available = vec![RowAction::Edit, RowAction::Delete, RowAction::ToggleActive];
    if schedule.is_active {
        available.push(RowAction::RunNow);
    }
    if schedule.is_pending() {
        available.push(RowAction::MarkCompleted);
    }
    let mut busy: Vec<RowAction> = busy.into_iter().filter_map(RowAction::from_kind).collect();
    busy.sort();

    RowView {
        id: schedule.id.clone(),
        description: schedule.description.clone(),
        interval: schedule.interval_minutes,
        path: schedule.target_path.clone(),
        url: schedule.target_url.clone(),
        active: schedule.is_active,
        status_label: match schedule.completion_status {
            CompletionStatus::Pending => "Report pending",
            CompletionStatus::Completed => "Completed",
        },
        toggle_label: if schedule.is_active { "Deactivate" } else { "Activate" },
        available_actions: available,
        busy_actions: busy,
        next_run: schedule.next_run_time,
        last_run: schedule.last_run_time,
    }
}

const HEADERS: [&str; 8] = [
    "ID", "Description", "Interval", "Path", "URL", "Active", "Status", "Actions",
];

/// Plain-text table for terminal output.
pub fn render_table(rows: &[RowView]) -> String {
    if rows.is_empty() {
        return "No schedules registered.\n".to_string();
    }

    let cells: Vec<[String; 8]> = rows
        .iter()
        .map(|row| {
            let actions: Vec<String> = row
                .available_actions
                .iter()
                .map(|a| {
                    if row.busy_actions.contains(a) {
                        format!("({}…)", a.as_str())
                    } else {
                        a.as_str().to_string()
                    }
                })
                .collect();
            [
                row.id.to_string(),
                row.description.clone(),
                format!("{}m", row.interval),
                row.path.clone().unwrap_or_else(|| "-".into()),
                row.url.clone().unwrap_or_else(|| "-".into()),
                if row.active { "yes" } else { "no" }.to_string(),
                row.status_label.to_string(),
                actions.join(" "),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for line in &cells {
        for (w, cell) in widths.iter_mut().zip(line) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(String::from), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(rule.join("-+-").as_str());
    out.push('\n');
    for line in &cells {
        push_line(&mut out, line, &widths);
    }
    out
}

fn push_line(out: &mut String, cells: &[String; 8], widths: &[usize; 8]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!("{cell:<w$}", w = *w))
        .collect();
    out.push_str(padded.join(" | ").trim_end());
    out.push('\n');
}
