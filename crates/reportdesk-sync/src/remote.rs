//! Remote schedule API: the backend's REST surface as seen by the client.

use async_trait::async_trait;
use reportdesk_core::config::ApiConfig;
use reportdesk_core::error::{DeskError, Result};
use reportdesk_core::types::{NewSchedule, ReportRecord, Schedule, ScheduleChanges, ScheduleId};
use serde::de::DeserializeOwned;

/// Calls the dispatcher makes against the authoritative backend.
#[async_trait]
pub trait ScheduleApi: Send + Sync {
    async fn list_schedules(&self) -> Result<Vec<Schedule>>;
    async fn create_schedule(&self, new: &NewSchedule) -> Result<Schedule>;
    async fn get_schedule(&self, id: &ScheduleId) -> Result<Schedule>;
    async fn update_schedule(&self, id: &ScheduleId, changes: &ScheduleChanges) -> Result<Schedule>;
    async fn delete_schedule(&self, id: &ScheduleId) -> Result<()>;
    /// Ask for `requested` as the new active flag; the returned record is authoritative.
    async fn toggle_active(&self, id: &ScheduleId, requested: bool) -> Result<Schedule>;
    async fn run_now(&self, id: &ScheduleId) -> Result<()>;
    async fn mark_completed(&self, id: &ScheduleId) -> Result<()>;
    async fn list_report_history(&self) -> Result<Vec<ReportRecord>>;
}

/// HTTP implementation against the dashboard backend.
pub struct HttpScheduleApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScheduleApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeskError::TransportFailure(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn schedule_url(&self, id: &ScheduleId, suffix: &str) -> String {
        if suffix.is_empty() {
            self.url(&format!("schedules/{id}"))
        } else {
            self.url(&format!("schedules/{id}/{suffix}"))
        }
    }

    /// Send and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = self.send(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| DeskError::TransportFailure(format!("Invalid response body: {e}")))
    }

    /// Send, turning non-2xx answers into rejections with the server's reason.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| DeskError::TransportFailure(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!("backend rejected request: {status} {body}");
        Err(DeskError::rejected(
            Some(status.as_u16()),
            rejection_reason(status, &body),
        ))
    }
}

/// Pull the human-readable reason out of an error body.
///
/// The backend answers with `{"error": ...}`; framework-level aborts use
/// `description` or `message`. Anything else falls back to the status line.
fn rejection_reason(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "description", "message"] {
            if let Some(reason) = json[key].as_str().filter(|r| !r.is_empty()) {
                return reason.to_string();
            }
        }
    }
    format!("HTTP error! status: {}", status.as_u16())
}

#[async_trait]
impl ScheduleApi for HttpScheduleApi {
    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.send_json(self.client.get(self.url("schedules"))).await
    }

    async fn create_schedule(&self, new: &NewSchedule) -> Result<Schedule> {
        self.send_json(self.client.post(self.url("schedules")).json(new))
            .await
    }

    async fn get_schedule(&self, id: &ScheduleId) -> Result<Schedule> {
        self.send_json(self.client.get(self.schedule_url(id, ""))).await
    }

    async fn update_schedule(&self, id: &ScheduleId, changes: &ScheduleChanges) -> Result<Schedule> {
        self.send_json(self.client.put(self.schedule_url(id, "")).json(changes))
            .await
    }

    async fn delete_schedule(&self, id: &ScheduleId) -> Result<()> {
        self.send(self.client.delete(self.schedule_url(id, "")))
            .await
            .map(|_| ())
    }

    async fn toggle_active(&self, id: &ScheduleId, requested: bool) -> Result<Schedule> {
        self.send_json(
            self.client
                .put(self.schedule_url(id, ""))
                .json(&serde_json::json!({ "is_active": requested })),
        )
        .await
    }

    async fn run_now(&self, id: &ScheduleId) -> Result<()> {
        self.send(self.client.post(self.schedule_url(id, "run_now")))
            .await
            .map(|_| ())
    }

    async fn mark_completed(&self, id: &ScheduleId) -> Result<()> {
        self.send(self.client.post(self.schedule_url(id, "complete")))
            .await
            .map(|_| ())
    }

    async fn list_report_history(&self) -> Result<Vec<ReportRecord>> {
        self.send_json(self.client.get(self.url("report_history"))).await
    }
}
