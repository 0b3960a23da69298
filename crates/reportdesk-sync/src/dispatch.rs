//! Action dispatch: runs operator mutations against the backend and folds
//! the confirmed results into the store.
//!
//! Each operation: check preconditions + register in-flight (one fold) →
//! remote call (store unlocked) → fold the response → release the slot.
//! Nothing is written to the store before the server confirms it.

use std::sync::Arc;

use reportdesk_core::error::{Precondition, Result};
use reportdesk_core::types::{
    ActionKind, ActionPayload, ActionRequest, CompletionStatus, NewSchedule, Schedule,
    ScheduleChanges, ScheduleId, SchedulePatch,
};

use crate::remote::ScheduleApi;
use crate::store::{ApplyOutcome, PatchOrigin, ScheduleStore, SharedStore};

/// What a dispatched request achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Created(Schedule),
    Updated(Schedule),
    Deleted,
    Toggled { is_active: bool },
    Started,
    Completed,
}

/// Executes user-initiated mutations.
pub struct ActionDispatcher {
    api: Arc<dyn ScheduleApi>,
    store: SharedStore,
}

impl ActionDispatcher {
    pub fn new(api: Arc<dyn ScheduleApi>, store: SharedStore) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn api(&self) -> &Arc<dyn ScheduleApi> {
        &self.api
    }

    /// Route a prebuilt request to its operation.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<Dispatched> {
        let ActionRequest { kind, target, payload } = request;
        match (kind, target, payload) {
            (ActionKind::Create, _, ActionPayload::Create(new)) => {
                self.create(new).await.map(Dispatched::Created)
            }
            (ActionKind::Update, Some(id), ActionPayload::Update(changes)) => {
                self.update(&id, changes).await.map(Dispatched::Updated)
            }
            (ActionKind::Delete, Some(id), _) => self.delete(&id).await.map(|_| Dispatched::Deleted),
            (ActionKind::ToggleActive, Some(id), _) => self
                .toggle_active(&id)
                .await
                .map(|is_active| Dispatched::Toggled { is_active }),
            (ActionKind::RunNow, Some(id), _) => self.run_now(&id).await.map(|_| Dispatched::Started),
            (ActionKind::MarkCompleted, Some(id), _) => {
                self.mark_completed(&id).await.map(|_| Dispatched::Completed)
            }
            (kind, target, _) => {
                tracing::debug!("refusing malformed {kind} request (target: {target:?})");
                Err(Precondition::Malformed(kind).into())
            }
        }
    }

    /// Rebuild the store from the full server listing.
    pub async fn reload(&self) -> Result<usize> {
        let issued_at = self.store.read(|s| s.revision());
        let schedules = self.api.list_schedules().await?;
        let count = self.store.write(|s| s.replace_all(schedules, issued_at));
        tracing::info!("📋 Loaded {count} schedules");
        Ok(count)
    }

    /// Refresh one record (e.g. before editing it). Never inserts.
    pub async fn fetch(&self, id: &ScheduleId) -> Result<Schedule> {
        let issued_at = self.store.read(|s| s.revision());
        let schedule = self.api.get_schedule(id).await?;
        self.store.apply(
            SchedulePatch::full(&schedule),
            PatchOrigin::Fetched { issued_at },
        );
        Ok(self.store.get(id).unwrap_or(schedule))
    }

    /// Create a schedule; the server assigns its id.
    pub async fn create(&self, new: NewSchedule) -> Result<Schedule> {
        validate_interval(new.interval_minutes)?;
        let _guard = self.store.begin(ActionKind::Create, None)?;

        let created = self.api.create_schedule(&new).await?;
        self.store
            .apply(SchedulePatch::full(&created), PatchOrigin::Created);
        tracing::info!("📅 Schedule created: '{}' ({})", created.description, created.id);
        Ok(self.store.get(&created.id).unwrap_or(created))
    }

    /// Edit fields of an existing schedule.
    ///
    /// Only the fields in `changes` are merged, with the values the server
    /// confirmed; completion status is left alone.
    pub async fn update(&self, id: &ScheduleId, changes: ScheduleChanges) -> Result<Schedule> {
        if let Some(minutes) = changes.interval_minutes {
            validate_interval(minutes)?;
        }
        let mut current = None;
        let guard = self.store.begin_if(ActionKind::Update, Some(id), |s| {
            current = Some(require(s, id)?.clone());
            Ok(!changes.is_empty())
        })?;
        let Some(_guard) = guard else {
            // Nothing to change; the local record already is the desired state.
            return current.ok_or_else(|| Precondition::UnknownSchedule(id.clone()).into());
        };

        let confirmed = self.api.update_schedule(id, &changes).await?;
        let outcome = self.store.apply(
            changes.confirmed_patch(&confirmed),
            PatchOrigin::Action(ActionKind::Update),
        );
        if outcome == ApplyOutcome::Dropped {
            tracing::info!("Schedule {id} was removed before its update returned");
            return Ok(confirmed);
        }
        tracing::info!("✏️ Schedule {id} updated");
        Ok(self.store.get(id).unwrap_or(confirmed))
    }

    /// Delete a schedule. Deleting an absent schedule succeeds.
    pub async fn delete(&self, id: &ScheduleId) -> Result<()> {
        let _guard = self.store.begin(ActionKind::Delete, Some(id))?;

        match self.api.delete_schedule(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("{id} already gone on the server");
            }
            Err(e) => return Err(e),
        }
        if self.store.write(|s| s.remove(id)) {
            tracing::info!("🗑️ Schedule {id} deleted");
        }
        Ok(())
    }

    /// Flip the active flag. Returns the flag the server settled on.
    pub async fn toggle_active(&self, id: &ScheduleId) -> Result<bool> {
        let mut requested = false;
        let _guard = self
            .store
            .begin_if(ActionKind::ToggleActive, Some(id), |s| {
                requested = !require(s, id)?.is_active;
                Ok(true)
            })?;

        let confirmed = self.api.toggle_active(id, requested).await?;
        if confirmed.is_active != requested {
            tracing::info!(
                "Schedule {id}: asked for active={requested}, server kept active={}",
                confirmed.is_active
            );
        }
        self.store.apply(
            SchedulePatch::active(id.clone(), confirmed.is_active),
            PatchOrigin::Action(ActionKind::ToggleActive),
        );
        Ok(confirmed.is_active)
    }

    /// Trigger the report immediately. Inactive schedules are refused
    /// without contacting the server.
    pub async fn run_now(&self, id: &ScheduleId) -> Result<()> {
        let _guard = self.store.begin_if(ActionKind::RunNow, Some(id), |s| {
            if !require(s, id)?.is_active {
                return Err(Precondition::Inactive(id.clone()).into());
            }
            Ok(true)
        })?;

        self.api.run_now(id).await?;
        tracing::info!("▶️ Report for schedule {id} started");
        Ok(())
    }

    /// Mark the current cycle's report as done. Safe to repeat: an already
    /// completed schedule returns `Ok` without a remote call.
    pub async fn mark_completed(&self, id: &ScheduleId) -> Result<()> {
        let guard = self.store.begin_if(ActionKind::MarkCompleted, Some(id), |s| {
            Ok(require(s, id)?.is_pending())
        })?;
        let Some(_guard) = guard else {
            tracing::debug!("{id} already completed");
            return Ok(());
        };

        self.api.mark_completed(id).await?;
        self.store.apply(
            SchedulePatch::completion(id.clone(), CompletionStatus::Completed),
            PatchOrigin::Action(ActionKind::MarkCompleted),
        );
        tracing::info!("✅ Schedule {id} marked completed");
        Ok(())
    }
}

fn require<'a>(store: &'a ScheduleStore, id: &ScheduleId) -> Result<&'a Schedule> {
    store
        .get(id)
        .ok_or_else(|| Precondition::UnknownSchedule(id.clone()).into())
}

/// Intervals are whole positive minutes.
pub fn validate_interval(minutes: i64) -> Result<u32> {
    u32::try_from(minutes)
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| Precondition::InvalidInterval(minutes).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{schedule, FakeApi};
    use reportdesk_core::error::DeskError;
    use reportdesk_core::types::PushEvent;

    async fn setup(schedules: Vec<Schedule>) -> (Arc<FakeApi>, Arc<ActionDispatcher>) {
        let api = FakeApi::with(schedules);
        let dispatcher = Arc::new(ActionDispatcher::new(api.clone(), SharedStore::new()));
        dispatcher.reload().await.unwrap();
        (api, dispatcher)
    }

    fn status(d: &ActionDispatcher, id: &str) -> CompletionStatus {
        d.store().get(&id.into()).unwrap().completion_status
    }

    /// Let spawned tasks run up to their next await point.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_create_inserts_server_record() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        let created = d
            .create(NewSchedule::new("Monthly close", 30).target_url("https://forms.example/x"))
            .await
            .unwrap();
        assert_eq!(created.description, "Monthly close");
        assert!(created.version > 0);
        assert_eq!(api.call_count("create_schedule"), 1);
        let ids: Vec<String> = d.store().read(|s| s.list().iter().map(|r| r.id.to_string()).collect());
        assert_eq!(ids, vec!["1".to_string(), created.id.to_string()]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_interval_locally() {
        let (api, d) = setup(vec![]).await;
        let err = d.create(NewSchedule::new("x", 0)).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::LocalPrecondition(Precondition::InvalidInterval(0))
        ));
        assert!(d.create(NewSchedule::new("x", -5)).await.is_err());
        assert_eq!(api.call_count("create_schedule"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_store_unchanged() {
        let (api, d) = setup(vec![]).await;
        api.reject("create_schedule", 500, "Failed to add schedule to database");
        let err = d.create(NewSchedule::new("x", 5)).await.unwrap_err();
        assert_eq!(err.user_message(), "Failed to add schedule to database");
        assert!(d.store().read(|s| s.is_empty()));
        assert!(!d.store().read(|s| s.is_in_flight(ActionKind::Create, None)));
    }

    #[tokio::test]
    async fn test_update_applies_only_after_confirmation() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.hold("update_schedule");

        let d2 = d.clone();
        let task = tokio::spawn(async move {
            d2.update(&"1".into(), ScheduleChanges::default().description("renamed"))
                .await
        });
        settle().await;
        assert_eq!(d.store().get(&"1".into()).unwrap().description, "report 1");
        assert!(d.store().read(|s| s.is_in_flight(ActionKind::Update, Some(&"1".into()))));

        api.release("update_schedule");
        let updated = task.await.unwrap().unwrap();
        assert_eq!(updated.description, "renamed");
        assert_eq!(d.store().get(&"1".into()).unwrap().description, "renamed");
    }

    #[tokio::test]
    async fn test_update_rejection_surfaces_reason() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.reject("update_schedule", 400, "Invalid interval_minutes, must be a positive integer.");
        let err = d
            .update(&"1".into(), ScheduleChanges::default().interval_minutes(5))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Invalid interval_minutes, must be a positive integer.");
        assert_eq!(d.store().get(&"1".into()).unwrap().interval_minutes, 60);
    }

    #[tokio::test]
    async fn test_update_response_for_deleted_record_is_dropped() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.hold("update_schedule");
        let d2 = d.clone();
        let task = tokio::spawn(async move {
            d2.update(&"1".into(), ScheduleChanges::default().description("late"))
                .await
        });
        settle().await;
        d.store().write(|s| s.remove(&"1".into()));

        api.release("update_schedule");
        assert!(task.await.unwrap().is_ok());
        assert!(d.store().get(&"1".into()).is_none());
    }

    #[tokio::test]
    async fn test_empty_update_makes_no_call() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        d.update(&"1".into(), ScheduleChanges::default()).await.unwrap();
        assert_eq!(api.call_count("update_schedule"), 0);
    }

    #[tokio::test]
    async fn test_delete_twice_both_succeed() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        d.delete(&"1".into()).await.unwrap();
        d.delete(&"1".into()).await.unwrap();
        assert!(d.store().get(&"1".into()).is_none());
        assert_eq!(api.call_count("delete_schedule"), 2);
    }

    #[tokio::test]
    async fn test_delete_transport_failure_keeps_record() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.set_offline(true);
        let err = d.delete(&"1".into()).await.unwrap_err();
        assert!(matches!(err, DeskError::TransportFailure(_)));
        assert!(d.store().get(&"1".into()).is_some());
    }

    #[tokio::test]
    async fn test_toggle_trusts_server_value() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.override_toggle(true);
        let active = d.toggle_active(&"1".into()).await.unwrap();
        assert!(active);
        assert!(d.store().get(&"1".into()).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_toggle_twice_before_response() {
        let (api, d) = setup(vec![schedule("7", true, CompletionStatus::Pending)]).await;
        api.hold("toggle_active");

        let d2 = d.clone();
        let first = tokio::spawn(async move { d2.toggle_active(&"7".into()).await });
        settle().await;

        let err = d.toggle_active(&"7".into()).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::LocalPrecondition(Precondition::InFlight { kind: ActionKind::ToggleActive, .. })
        ));
        assert_eq!(api.call_count("toggle_active"), 1);

        api.release("toggle_active");
        assert!(!first.await.unwrap().unwrap());
        assert!(!d.store().get(&"7".into()).unwrap().is_active);

        api.release("toggle_active");
        assert!(d.toggle_active(&"7".into()).await.unwrap());
        assert_eq!(api.call_count("toggle_active"), 2);
    }

    #[tokio::test]
    async fn test_different_ids_run_concurrently() {
        let (api, d) = setup(vec![
            schedule("1", true, CompletionStatus::Pending),
            schedule("2", true, CompletionStatus::Pending),
        ])
        .await;
        api.hold("run_now");
        let (da, db) = (d.clone(), d.clone());
        let a = tokio::spawn(async move { da.run_now(&"1".into()).await });
        let b = tokio::spawn(async move { db.run_now(&"2".into()).await });
        settle().await;
        assert_eq!(api.call_count("run_now"), 2);
        api.release("run_now");
        api.release("run_now");
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_now_inactive_makes_no_call() {
        let (api, d) = setup(vec![schedule("3", false, CompletionStatus::Pending)]).await;
        let err = d.run_now(&"3".into()).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::LocalPrecondition(Precondition::Inactive(_))
        ));
        assert_eq!(api.call_count("run_now"), 0);
    }

    #[tokio::test]
    async fn test_run_now_leaves_status() {
        let (api, d) = setup(vec![schedule("3", true, CompletionStatus::Completed)]).await;
        d.run_now(&"3".into()).await.unwrap();
        assert_eq!(api.call_count("run_now"), 1);
        assert_eq!(status(&d, "3"), CompletionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_local_failure() {
        let (api, d) = setup(vec![]).await;
        let err = d.run_now(&"99".into()).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::LocalPrecondition(Precondition::UnknownSchedule(_))
        ));
        assert!(api.calls().iter().all(|c| c == "list_schedules"));
    }

    #[tokio::test]
    async fn test_mark_completed_twice_same_as_once() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        d.mark_completed(&"1".into()).await.unwrap();
        let once = d.store().get(&"1".into()).unwrap();
        d.mark_completed(&"1".into()).await.unwrap();
        let twice = d.store().get(&"1".into()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.completion_status, CompletionStatus::Completed);
        assert_eq!(api.call_count("mark_completed"), 1);
    }

    #[tokio::test]
    async fn test_alert_wins_over_later_update_response() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Completed)]).await;
        api.hold("update_schedule");
        let d2 = d.clone();
        let task = tokio::spawn(async move {
            d2.update(&"1".into(), ScheduleChanges::default().description("renamed"))
                .await
        });
        settle().await;

        let alert = PushEvent::alert(1u64, "2026-10-17T09:00:00Z");
        crate::listener::fold_event(d.store(), &alert);
        api.release("update_schedule");
        task.await.unwrap().unwrap();

        let record = d.store().get(&"1".into()).unwrap();
        assert_eq!(record.completion_status, CompletionStatus::Pending);
        assert_eq!(record.description, "renamed");
    }

    #[tokio::test]
    async fn test_dispatch_routes_requests() {
        let (_api, d) = setup(vec![schedule("5", true, CompletionStatus::Pending)]).await;
        let out = d
            .dispatch(ActionRequest::toggle_active("5".into()))
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Toggled { is_active: false });

        let out = d
            .dispatch(ActionRequest::create(NewSchedule::new("new", 15)))
            .await
            .unwrap();
        assert!(matches!(out, Dispatched::Created(_)));

        let out = d.dispatch(ActionRequest::delete("5".into())).await.unwrap();
        assert_eq!(out, Dispatched::Deleted);
    }

    #[tokio::test]
    async fn test_fetch_refreshes_but_never_inserts() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        api.reject("get_schedule", 404, "Schedule not found");
        assert!(d.fetch(&"1".into()).await.unwrap_err().is_not_found());

        let (_api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        d.store().write(|s| s.remove(&"1".into()));
        d.fetch(&"1".into()).await.unwrap();
        assert!(d.store().get(&"1".into()).is_none());
    }

    #[tokio::test]
    async fn test_malformed_request_is_refused_locally() {
        let (api, d) = setup(vec![schedule("1", true, CompletionStatus::Pending)]).await;
        let request = ActionRequest {
            kind: ActionKind::Update,
            target: None,
            payload: ActionPayload::Update(ScheduleChanges::default().description("x")),
        };
        let err = d.dispatch(request).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::LocalPrecondition(Precondition::Malformed(ActionKind::Update))
        ));
        assert!(err.is_local());

        let request = ActionRequest {
            kind: ActionKind::Create,
            target: None,
            payload: ActionPayload::None,
        };
        assert!(matches!(
            d.dispatch(request).await,
            Err(DeskError::LocalPrecondition(Precondition::Malformed(ActionKind::Create)))
        ));
        assert_eq!(api.calls(), vec!["list_schedules".to_string()]);
    }

    #[test]
    fn test_validate_interval() {
        assert_eq!(validate_interval(15).unwrap(), 15);
        assert!(validate_interval(0).is_err());
        assert!(validate_interval(-1).is_err());
        assert!(validate_interval(i64::from(u32::MAX) + 1).is_err());
    }
}
