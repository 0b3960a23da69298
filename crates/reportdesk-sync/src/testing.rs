//! In-memory backend for tests: records calls, can reject, and can hold a
//! call open until the test releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reportdesk_core::error::{DeskError, Result};
use reportdesk_core::types::{
    CompletionStatus, NewSchedule, ReportRecord, Schedule, ScheduleChanges, ScheduleId,
};
use tokio::sync::Notify;

use crate::remote::ScheduleApi;

#[derive(Default)]
struct FakeState {
    schedules: Vec<Schedule>,
    history: Vec<ReportRecord>,
    next_id: u64,
    calls: Vec<String>,
    rejections: HashMap<&'static str, (u16, String)>,
    offline: bool,
    toggle_override: Option<bool>,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
}

impl FakeApi {
    pub fn with(schedules: Vec<Schedule>) -> Arc<Self> {
        let next_id = schedules.len() as u64 + 100;
        let api = Self::default();
        {
            let mut st = api.state.lock().unwrap();
            st.schedules = schedules;
            st.next_id = next_id;
        }
        Arc::new(api)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(method))
            .count()
    }

    pub fn reject(&self, method: &'static str, status: u16, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .rejections
            .insert(method, (status, reason.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Make the server answer toggles with this flag regardless of the request.
    pub fn override_toggle(&self, value: bool) {
        self.state.lock().unwrap().toggle_override = Some(value);
    }

    pub fn set_history(&self, history: Vec<ReportRecord>) {
        self.state.lock().unwrap().history = history;
    }

    pub fn server_record(&self, id: &str) -> Option<Schedule> {
        let st = self.state.lock().unwrap();
        st.schedules.iter().find(|s| s.id.as_str() == id).cloned()
    }

    /// Calls to `method` block until [`FakeApi::release`].
    pub fn hold(&self, method: &'static str) {
        self.gates
            .lock()
            .unwrap()
            .insert(method, Arc::new(Notify::new()));
    }

    /// Let one held call to `method` answer.
    pub fn release(&self, method: &'static str) {
        if let Some(gate) = self.gates.lock().unwrap().get(method) {
            gate.notify_one();
        }
    }

    async fn enter(&self, method: &'static str, id: Option<&ScheduleId>) -> Result<()> {
        {
            let mut st = self.state.lock().unwrap();
            st.calls.push(match id {
                Some(id) => format!("{method}:{id}"),
                None => method.to_string(),
            });
        }
        let gate = self.gates.lock().unwrap().get(method).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let st = self.state.lock().unwrap();
        if st.offline {
            return Err(DeskError::TransportFailure("connection refused".into()));
        }
        if let Some((status, reason)) = st.rejections.get(method) {
            return Err(DeskError::rejected(Some(*status), reason.clone()));
        }
        Ok(())
    }

    fn find(&self, id: &ScheduleId) -> Result<Schedule> {
        self.server_record(id.as_str())
            .ok_or_else(|| DeskError::rejected(Some(404), "Schedule not found"))
    }

    fn modify(&self, id: &ScheduleId, f: impl FnOnce(&mut Schedule)) -> Result<Schedule> {
        let mut st = self.state.lock().unwrap();
        let record = st
            .schedules
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| DeskError::rejected(Some(404), "Schedule not found"))?;
        f(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl ScheduleApi for FakeApi {
    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.enter("list_schedules", None).await?;
        Ok(self.state.lock().unwrap().schedules.clone())
    }

    async fn create_schedule(&self, new: &NewSchedule) -> Result<Schedule> {
        self.enter("create_schedule", None).await?;
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let mut s = Schedule::empty(ScheduleId::from(st.next_id));
        s.description = new.description.clone();
        s.interval_minutes = new.interval_minutes as u32;
        s.target_path = new.target_path.clone();
        s.target_url = new.target_url.clone();
        st.schedules.push(s.clone());
        Ok(s)
    }

    async fn get_schedule(&self, id: &ScheduleId) -> Result<Schedule> {
        self.enter("get_schedule", Some(id)).await?;
        self.find(id)
    }

    async fn update_schedule(&self, id: &ScheduleId, changes: &ScheduleChanges) -> Result<Schedule> {
        self.enter("update_schedule", Some(id)).await?;
        self.modify(id, |s| {
            if let Some(d) = &changes.description {
                s.description = d.clone();
            }
            if let Some(m) = changes.interval_minutes {
                s.interval_minutes = m as u32;
            }
            if let Some(p) = &changes.target_path {
                s.target_path = Some(p.clone()).filter(|p| !p.is_empty());
            }
            if let Some(u) = &changes.target_url {
                s.target_url = Some(u.clone()).filter(|u| !u.is_empty());
            }
        })
    }

    async fn delete_schedule(&self, id: &ScheduleId) -> Result<()> {
        self.enter("delete_schedule", Some(id)).await?;
        let mut st = self.state.lock().unwrap();
        let before = st.schedules.len();
        st.schedules.retain(|s| &s.id != id);
        if st.schedules.len() == before {
            return Err(DeskError::rejected(Some(404), "Schedule not found"));
        }
        Ok(())
    }

    async fn toggle_active(&self, id: &ScheduleId, requested: bool) -> Result<Schedule> {
        self.enter("toggle_active", Some(id)).await?;
        let value = self.state.lock().unwrap().toggle_override.unwrap_or(requested);
        self.modify(id, |s| s.is_active = value)
    }

    async fn run_now(&self, id: &ScheduleId) -> Result<()> {
        self.enter("run_now", Some(id)).await?;
        self.find(id).map(|_| ())
    }

    async fn mark_completed(&self, id: &ScheduleId) -> Result<()> {
        self.enter("mark_completed", Some(id)).await?;
        self.modify(id, |s| s.completion_status = CompletionStatus::Completed)
            .map(|_| ())
    }

    async fn list_report_history(&self) -> Result<Vec<ReportRecord>> {
        self.enter("list_report_history", None).await?;
        Ok(self.state.lock().unwrap().history.clone())
    }
}

pub(crate) fn schedule(id: &str, active: bool, status: CompletionStatus) -> Schedule {
    let mut s = Schedule::empty(ScheduleId::from(id));
    s.description = format!("report {id}");
    s.interval_minutes = 60;
    s.is_active = active;
    s.completion_status = status;
    s
}
