//! Schedule store, the client's single source of truth for schedule state.
//!
//! Every change goes through [`ScheduleStore::apply`] (or a reload/remove),
//! one fold at a time, behind [`SharedStore`]'s mutex. Observers only ever see
//! fully merged records.
//!
//! Key invariants:
//! - At most one record per id; `order` never holds an id twice
//! - Only reloads and create responses may insert records
//! - Push events must reference a loaded record (otherwise: anomaly)
//! - Redelivered alerts (same id + `occurred_at`) are no-ops
//! - A reload or fetch issued before an alert landed never resets that
//!   alert's `completion_status`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use reportdesk_core::types::{ActionKind, Schedule, ScheduleId, SchedulePatch};
use reportdesk_core::{Precondition, Result};
use tokio::sync::watch;

/// How many alert keys are remembered per schedule for de-duplication.
const ALERT_MEMORY: usize = 64;

/// Where a patch came from. Decides whether it may create a record and how
/// an unknown id is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOrigin {
    /// Full list from the server; `issued_at` is the store revision when
    /// the request went out.
    Reload { issued_at: u64 },
    /// Response to a successful create.
    Created,
    /// Single-record fetch.
    Fetched { issued_at: u64 },
    /// Response to a mutation other than create.
    Action(ActionKind),
    /// Server-pushed event.
    Push { occurred_at: Option<String> },
}

impl PatchOrigin {
    fn may_insert(&self) -> bool {
        matches!(self, Self::Reload { .. } | Self::Created)
    }

    fn issued_at(&self) -> Option<u64> {
        match self {
            Self::Reload { issued_at } | Self::Fetched { issued_at } => Some(*issued_at),
            _ => None,
        }
    }
}

/// Result of folding one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted { version: u64 },
    Updated { version: u64 },
    /// Alert already applied; nothing changed.
    Duplicate,
    /// Push event for an id the client has not loaded.
    UnknownSchedule,
    /// Response for a record that no longer exists (deleted meanwhile).
    Dropped,
    /// Event that carries nothing for the store.
    Ignored,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Inserted { .. } | Self::Updated { .. })
    }
}

/// Key of an outstanding request: at most one per `(kind, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub kind: ActionKind,
    pub target: Option<ScheduleId>,
}

/// In-memory cache of schedule records.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    records: HashMap<ScheduleId, Schedule>,
    /// Insertion order of the last full reload, creates appended.
    order: Vec<ScheduleId>,
    in_flight: HashSet<InFlightKey>,
    applied_alerts: HashMap<ScheduleId, VecDeque<String>>,
    /// Revision at which each record last took a push event.
    pushed_at: HashMap<ScheduleId, u64>,
    /// Bumped on every observable change; records take it as their version.
    revision: u64,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ScheduleId) -> Option<&Schedule> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &ScheduleId) -> bool {
        self.records.contains_key(id)
    }

    /// Records in display order.
    pub fn list(&self) -> Vec<&Schedule> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Merge a partial update.
    pub fn apply(&mut self, mut patch: SchedulePatch, origin: PatchOrigin) -> ApplyOutcome {
        let id = patch.id.clone();

        if let PatchOrigin::Push { occurred_at } = &origin {
            if !self.records.contains_key(&id) {
                tracing::warn!(
                    target: "reportdesk::anomaly",
                    "push event for unknown schedule {id}; waiting for next reload"
                );
                return ApplyOutcome::UnknownSchedule;
            }
            if let Some(key) = occurred_at {
                let seen = self.applied_alerts.entry(id.clone()).or_default();
                if seen.contains(key) {
                    tracing::debug!("duplicate alert for {id} at {key} ignored");
                    return ApplyOutcome::Duplicate;
                }
                seen.push_back(key.clone());
                if seen.len() > ALERT_MEMORY {
                    seen.pop_front();
                }
            }
        }

        let inserted = if self.records.contains_key(&id) {
            false
        } else if origin.may_insert() {
            self.records.insert(id.clone(), Schedule::empty(id.clone()));
            self.order.push(id.clone());
            true
        } else {
            tracing::debug!("{origin:?} response for removed schedule {id} dropped");
            return ApplyOutcome::Dropped;
        };

        if let (Some(issued_at), Some(pushed_at)) = (origin.issued_at(), self.pushed_at.get(&id)) {
            if *pushed_at > issued_at && patch.completion_status.take().is_some() {
                tracing::debug!("{id}: keeping pushed status over response issued at r{issued_at}");
            }
        }

        self.revision += 1;
        let version = self.revision;
        if matches!(origin, PatchOrigin::Push { .. }) {
            self.pushed_at.insert(id.clone(), version);
        }
        if let Some(record) = self.records.get_mut(&id) {
            patch.merge_into(record);
            record.version = version;
        }

        if inserted {
            ApplyOutcome::Inserted { version }
        } else {
            ApplyOutcome::Updated { version }
        }
    }

    /// Replace the contents with a full server listing requested at
    /// revision `issued_at`.
    ///
    /// Records keep their alert memory. A record the server no longer lists
    /// is dropped, unless it was applied after the listing was requested
    /// (a create that raced the reload); such records stay at the end.
    /// Returns the number of records afterwards.
    pub fn replace_all(&mut self, schedules: Vec<Schedule>, issued_at: u64) -> usize {
        let listed: HashSet<ScheduleId> = schedules.iter().map(|s| s.id.clone()).collect();
        let (stale, newer): (Vec<ScheduleId>, Vec<ScheduleId>) = self
            .order
            .iter()
            .filter(|id| !listed.contains(*id))
            .cloned()
            .partition(|id| self.records.get(id).is_none_or(|r| r.version <= issued_at));
        for id in &stale {
            self.records.remove(id);
            self.applied_alerts.remove(id);
            self.pushed_at.remove(id);
        }

        self.order.clear();
        for schedule in &schedules {
            if !self.order.contains(&schedule.id) && self.records.contains_key(&schedule.id) {
                self.order.push(schedule.id.clone());
            }
            self.apply(SchedulePatch::full(schedule), PatchOrigin::Reload { issued_at });
        }
        if !newer.is_empty() {
            tracing::debug!("reload kept {} schedules created after it was sent", newer.len());
            self.order.extend(newer);
        }
        if !stale.is_empty() {
            self.revision += 1;
            tracing::debug!("reload dropped {} schedules", stale.len());
        }
        self.records.len()
    }

    /// Remove a record. Returns whether it was present.
    pub fn remove(&mut self, id: &ScheduleId) -> bool {
        let removed = self.records.remove(id).is_some();
        if removed {
            self.order.retain(|o| o != id);
            self.applied_alerts.remove(id);
            self.pushed_at.remove(id);
            self.revision += 1;
        }
        removed
    }

    /// Register an outstanding request; refuses a second one for the same key.
    pub fn begin(&mut self, kind: ActionKind, target: Option<&ScheduleId>) -> Result<()> {
        let key = InFlightKey {
            kind,
            target: target.cloned(),
        };
        if self.in_flight.contains(&key) {
            return Err(Precondition::InFlight {
                kind,
                target: target.map_or_else(|| "new schedule".to_string(), |id| id.to_string()),
            }
            .into());
        }
        self.in_flight.insert(key);
        self.revision += 1;
        Ok(())
    }

    pub fn finish(&mut self, kind: ActionKind, target: Option<&ScheduleId>) {
        let key = InFlightKey {
            kind,
            target: target.cloned(),
        };
        if self.in_flight.remove(&key) {
            self.revision += 1;
        }
    }

    pub fn is_in_flight(&self, kind: ActionKind, target: Option<&ScheduleId>) -> bool {
        self.in_flight.contains(&InFlightKey {
            kind,
            target: target.cloned(),
        })
    }

    /// Kinds with an outstanding request for `id`.
    pub fn busy_kinds(&self, id: &ScheduleId) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self
            .in_flight
            .iter()
            .filter(|k| k.target.as_ref() == Some(id))
            .map(|k| k.kind)
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Shared handle to the store: one mutex-guarded fold at a time, plus a watch
/// channel that publishes the revision after every change.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<ScheduleStore>>,
    changes: Arc<watch::Sender<u64>>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(ScheduleStore::new())),
            changes: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScheduleStore> {
        // Folds never leave the store half-merged, so a poisoned lock is safe to reuse.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ScheduleStore) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate under the lock, then publish the new revision if it moved.
    pub fn write<R>(&self, f: impl FnOnce(&mut ScheduleStore) -> R) -> R {
        let (result, before, after) = {
            let mut store = self.lock();
            let before = store.revision();
            let result = f(&mut store);
            (result, before, store.revision())
        };
        if after != before {
            self.changes.send_replace(after);
        }
        result
    }

    pub fn apply(&self, patch: SchedulePatch, origin: PatchOrigin) -> ApplyOutcome {
        self.write(|s| s.apply(patch, origin))
    }

    pub fn get(&self, id: &ScheduleId) -> Option<Schedule> {
        self.read(|s| s.get(id).cloned())
    }

    /// Receiver that wakes on every store change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Mark `(kind, target)` outstanding until the guard drops.
    pub fn begin(&self, kind: ActionKind, target: Option<&ScheduleId>) -> Result<InFlightGuard> {
        self.write(|s| s.begin(kind, target))?;
        Ok(self.guard(kind, target))
    }

    /// Check local preconditions and register the request in one fold.
    ///
    /// `check` returns `Ok(false)` when the desired state already holds and
    /// no request is needed; then nothing is registered and `None` comes back.
    pub fn begin_if(
        &self,
        kind: ActionKind,
        target: Option<&ScheduleId>,
        check: impl FnOnce(&ScheduleStore) -> Result<bool>,
    ) -> Result<Option<InFlightGuard>> {
        let proceed = self.write(|s| {
            if !check(&*s)? {
                return Ok(false);
            }
            s.begin(kind, target)?;
            Ok::<_, reportdesk_core::DeskError>(true)
        })?;
        Ok(proceed.then(|| self.guard(kind, target)))
    }

    fn guard(&self, kind: ActionKind, target: Option<&ScheduleId>) -> InFlightGuard {
        InFlightGuard {
            store: self.clone(),
            kind,
            target: target.cloned(),
        }
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases an in-flight slot when dropped, including on error or when the
/// dispatching future is cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    store: SharedStore,
    kind: ActionKind,
    target: Option<ScheduleId>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let (kind, target) = (self.kind, self.target.take());
        self.store.write(|s| s.finish(kind, target.as_ref()));
    }
}
