//! Schedule data model: records, patches, action requests, push events.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Server-assigned schedule identifier.
///
/// Opaque to the client. The backend hands out integers; they are kept as
/// their decimal string so the client never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScheduleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScheduleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for ScheduleId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for ScheduleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// Per-cycle reporting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Pending,
    Completed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// One recurring report definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default)]
    pub interval_minutes: u32,
    /// Where the report is written (a workbook path in most deployments).
    #[serde(default, alias = "excel_path", deserialize_with = "non_empty")]
    pub target_path: Option<String>,
    /// Form or page the operator fills in.
    #[serde(default, alias = "google_form_url", deserialize_with = "non_empty")]
    pub target_url: Option<String>,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    #[serde(default)]
    pub completion_status: CompletionStatus,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub next_run_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_run_time: Option<DateTime<Utc>>,
    /// Local revision, bumped by the store on every apply. Never sent.
    #[serde(skip)]
    pub version: u64,
}

fn bool_true() -> bool {
    true
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(normalize_text(raw))
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn lenient_datetime_required<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC.
///
/// The backend stores run times without a zone and serializes them as such.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

/// Empty or whitespace-only input means "no value".
pub fn normalize_text(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

impl Schedule {
    /// Blank record used as the base when a patch creates a new entry.
    pub fn empty(id: ScheduleId) -> Self {
        Self {
            id,
            description: String::new(),
            interval_minutes: 0,
            target_path: None,
            target_url: None,
            is_active: true,
            completion_status: CompletionStatus::Pending,
            next_run_time: None,
            last_run_time: None,
            version: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.completion_status == CompletionStatus::Pending
    }
}

/// Partial update of a schedule. `None` leaves the field untouched.
///
/// Nullable fields use `Option<Option<_>>`: `Some(None)` clears the value.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePatch {
    pub id: ScheduleId,
    pub description: Option<String>,
    pub interval_minutes: Option<u32>,
    pub target_path: Option<Option<String>>,
    pub target_url: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub completion_status: Option<CompletionStatus>,
    pub next_run_time: Option<Option<DateTime<Utc>>>,
    pub last_run_time: Option<Option<DateTime<Utc>>>,
}

impl SchedulePatch {
    pub fn new(id: ScheduleId) -> Self {
        Self {
            id,
            description: None,
            interval_minutes: None,
            target_path: None,
            target_url: None,
            is_active: None,
            completion_status: None,
            next_run_time: None,
            last_run_time: None,
        }
    }

    /// Patch carrying every wire field of `schedule`.
    pub fn full(schedule: &Schedule) -> Self {
        Self {
            id: schedule.id.clone(),
            description: Some(schedule.description.clone()),
            interval_minutes: Some(schedule.interval_minutes),
            target_path: Some(schedule.target_path.clone()),
            target_url: Some(schedule.target_url.clone()),
            is_active: Some(schedule.is_active),
            completion_status: Some(schedule.completion_status),
            next_run_time: Some(schedule.next_run_time),
            last_run_time: Some(schedule.last_run_time),
        }
    }

    pub fn completion(id: ScheduleId, status: CompletionStatus) -> Self {
        Self {
            completion_status: Some(status),
            ..Self::new(id)
        }
    }

    pub fn active(id: ScheduleId, is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::new(id)
        }
    }

    /// Merge into `target`. The caller owns versioning.
    pub fn merge_into(&self, target: &mut Schedule) {
        if let Some(v) = &self.description {
            target.description = v.clone();
        }
        if let Some(v) = self.interval_minutes {
            target.interval_minutes = v;
        }
        if let Some(v) = &self.target_path {
            target.target_path = v.clone();
        }
        if let Some(v) = &self.target_url {
            target.target_url = v.clone();
        }
        if let Some(v) = self.is_active {
            target.is_active = v;
        }
        if let Some(v) = self.completion_status {
            target.completion_status = v;
        }
        if let Some(v) = self.next_run_time {
            target.next_run_time = v;
        }
        if let Some(v) = self.last_run_time {
            target.last_run_time = v;
        }
    }
}

/// Kinds of user-initiated mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    ToggleActive,
    RunNow,
    MarkCompleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::ToggleActive => "toggle_active",
            Self::RunNow => "run_now",
            Self::MarkCompleted => "mark_completed",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields for a new schedule, as entered by the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSchedule {
    pub description: String,
    /// Raw input; validated before dispatch.
    pub interval_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl NewSchedule {
    pub fn new(description: impl Into<String>, interval_minutes: i64) -> Self {
        Self {
            description: description.into(),
            interval_minutes,
            target_path: None,
            target_url: None,
        }
    }

    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = normalize_text(Some(path.into()));
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = normalize_text(Some(url.into()));
        self
    }
}

/// Edited fields of an existing schedule. Only `Some` fields are sent.
///
/// An empty path or url clears the stored value on the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScheduleChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl ScheduleChanges {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn interval_minutes(mut self, minutes: i64) -> Self {
        self.interval_minutes = Some(minutes);
        self
    }

    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.interval_minutes.is_none()
            && self.target_path.is_none()
            && self.target_url.is_none()
    }

    /// Patch with the server-confirmed values of exactly the fields this
    /// change touched.
    pub fn confirmed_patch(&self, confirmed: &Schedule) -> SchedulePatch {
        let mut patch = SchedulePatch::new(confirmed.id.clone());
        if self.description.is_some() {
            patch.description = Some(confirmed.description.clone());
        }
        if self.interval_minutes.is_some() {
            patch.interval_minutes = Some(confirmed.interval_minutes);
        }
        if self.target_path.is_some() {
            patch.target_path = Some(confirmed.target_path.clone());
        }
        if self.target_url.is_some() {
            patch.target_url = Some(confirmed.target_url.clone());
        }
        patch
    }
}

/// Payload of an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    None,
    Create(NewSchedule),
    Update(ScheduleChanges),
}

/// A mutation, fully built before it is handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub target: Option<ScheduleId>,
    pub payload: ActionPayload,
}

impl ActionRequest {
    pub fn create(new: NewSchedule) -> Self {
        Self {
            kind: ActionKind::Create,
            target: None,
            payload: ActionPayload::Create(new),
        }
    }

    pub fn update(id: ScheduleId, changes: ScheduleChanges) -> Self {
        Self {
            kind: ActionKind::Update,
            target: Some(id),
            payload: ActionPayload::Update(changes),
        }
    }

    pub fn delete(id: ScheduleId) -> Self {
        Self::targeted(ActionKind::Delete, id)
    }

    pub fn toggle_active(id: ScheduleId) -> Self {
        Self::targeted(ActionKind::ToggleActive, id)
    }

    pub fn run_now(id: ScheduleId) -> Self {
        Self::targeted(ActionKind::RunNow, id)
    }

    pub fn mark_completed(id: ScheduleId) -> Self {
        Self::targeted(ActionKind::MarkCompleted, id)
    }

    fn targeted(kind: ActionKind, id: ScheduleId) -> Self {
        Self {
            kind,
            target: Some(id),
            payload: ActionPayload::None,
        }
    }
}

/// Named server-pushed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PushEventName {
    /// A cycle's deadline passed without the report being completed.
    AlertTriggered,
    Other(String),
}

impl From<String> for PushEventName {
    fn from(s: String) -> Self {
        match s.as_str() {
            "alert_triggered" => Self::AlertTriggered,
            _ => Self::Other(s),
        }
    }
}

impl From<PushEventName> for String {
    fn from(name: PushEventName) -> Self {
        match name {
            PushEventName::AlertTriggered => "alert_triggered".to_string(),
            PushEventName::Other(s) => s,
        }
    }
}

/// One event from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(alias = "event", alias = "type")]
    pub name: PushEventName,
    pub schedule_id: ScheduleId,
    /// Opaque server timestamp; identifies redeliveries of the same alert.
    #[serde(default)]
    pub occurred_at: Option<String>,
}

impl PushEvent {
    pub fn alert(schedule_id: impl Into<ScheduleId>, occurred_at: impl Into<String>) -> Self {
        Self {
            name: PushEventName::AlertTriggered,
            schedule_id: schedule_id.into(),
            occurred_at: Some(occurred_at.into()),
        }
    }
}

/// One completed report, as listed by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub schedule_id: ScheduleId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub schedule_description: String,
    #[serde(deserialize_with = "lenient_datetime_required")]
    pub reported_at: DateTime<Utc>,
}
