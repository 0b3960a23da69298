//! Push listener: folds server-pushed events into the store and keeps the
//! subscription alive across disconnects.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reportdesk_core::config::PushConfig;
use reportdesk_core::error::Result;
use reportdesk_core::types::{CompletionStatus, PushEvent, PushEventName, SchedulePatch};
use tokio::sync::watch;

use crate::push::PushTransport;
use crate::store::{ApplyOutcome, PatchOrigin, SharedStore};

/// Counters for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub sessions: u32,
    pub applied: u64,
    pub duplicates: u64,
    pub anomalies: u64,
    pub ignored: u64,
}

impl ListenerStats {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted { .. } | ApplyOutcome::Updated { .. } => self.applied += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
            ApplyOutcome::UnknownSchedule => self.anomalies += 1,
            ApplyOutcome::Dropped | ApplyOutcome::Ignored => self.ignored += 1,
        }
    }
}

pub struct PushListener {
    store: SharedStore,
    transport: Arc<dyn PushTransport>,
    auto_reconnect: bool,
    reconnect_delay: Duration,
}

impl PushListener {
    pub fn new(store: SharedStore, transport: Arc<dyn PushTransport>, config: &PushConfig) -> Self {
        Self {
            store,
            transport,
            auto_reconnect: config.auto_reconnect,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }

    /// Apply one event to the store.
    pub fn fold(&self, event: &PushEvent) -> ApplyOutcome {
        fold_event(&self.store, event)
    }

    /// Consume events until `shutdown` flips to `true` (or its sender drops).
    ///
    /// Disconnects never touch the store: records stay as they were and
    /// the next session resumes folding on top of them. Without
    /// `auto_reconnect`, a failed connect is returned and a closed session
    /// ends the run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ListenerStats> {
        let mut stats = ListenerStats::default();

        while !*shutdown.borrow() {
            match self.transport.connect().await {
                Ok(mut events) => {
                    stats.sessions += 1;
                    tracing::info!("🔔 Push channel connected (session {})", stats.sessions);
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                tracing::info!("Push listener stopping");
                                return Ok(stats);
                            }
                            next = events.next() => match next {
                                Some(Ok(event)) => stats.record(self.fold(&event)),
                                Some(Err(e)) => {
                                    tracing::warn!("Push channel error: {e}");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                    tracing::warn!("⚠️ Push channel disconnected");
                }
                Err(e) if !self.auto_reconnect => return Err(e),
                Err(e) => tracing::warn!("Push channel connect failed: {e}"),
            }

            if !self.auto_reconnect {
                break;
            }
            tracing::debug!("reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        Ok(stats)
    }
}

/// Fold a push event into `store`.
///
/// An alert puts the schedule back to pending whatever its status was;
/// redeliveries of the same alert are no-ops.
pub fn fold_event(store: &SharedStore, event: &PushEvent) -> ApplyOutcome {
    match &event.name {
        PushEventName::AlertTriggered => {
            let outcome = store.apply(
                SchedulePatch::completion(event.schedule_id.clone(), CompletionStatus::Pending),
                PatchOrigin::Push {
                    occurred_at: event.occurred_at.clone(),
                },
            );
            if outcome.is_applied() {
                tracing::info!("🚨 Alert for schedule {}: report pending", event.schedule_id);
            }
            outcome
        }
        PushEventName::Other(name) => {
            tracing::debug!("ignoring push event '{name}' for {}", event.schedule_id);
            ApplyOutcome::Ignored
        }
    }
}
