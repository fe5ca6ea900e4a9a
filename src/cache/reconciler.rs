//! Applies dispatched events to the cached-query store.
//!
//! Task events are merged into the household's task list as idempotent
//! upserts/removals. Household-level events only mark queries stale; that
//! data is small and refetched wholesale. Every successful (re)connection
//! invalidates the whole cache because events may have been missed while
//! the socket was down and the server does not replay them.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{CachedValue, QueryCache, QueryKey};
use crate::model::Task;
use crate::realtime::dispatcher::{EventDispatcher, Subscription};
use crate::realtime::events::{EventKind, SyncEvent};

/// Translates sync events into cache mutations.
#[derive(Clone)]
pub struct CacheReconciler {
    cache: Arc<dyn QueryCache>,
}

impl CacheReconciler {
    pub fn new(cache: Arc<dyn QueryCache>) -> Self {
        Self { cache }
    }

    /// Register the reconciler for every event kind.
    ///
    /// Call this before consumers subscribe so the cache is already updated
    /// when their handlers run.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<Subscription> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let reconciler = self.clone();
                dispatcher.subscribe(kind, move |event| {
                    reconciler.apply(event);
                    Ok(())
                })
            })
            .collect()
    }

    /// Apply one event.
    pub fn apply(&self, event: &SyncEvent) {
        match event {
            SyncEvent::TaskCreated(change) | SyncEvent::TaskUpdated(change) => {
                self.upsert_task(&change.household_id, &change.task);
            }
            SyncEvent::TaskCompleted(completion) => {
                self.upsert_task(&completion.household_id, &completion.task);
            }
            SyncEvent::TaskAssigned(change) | SyncEvent::TaskUnassigned(change) => {
                self.upsert_task(&change.household_id, &change.task);
            }
            SyncEvent::TaskDeleted(deletion) => {
                self.remove_task(&deletion.household_id, &deletion.task_id);
            }
            SyncEvent::HouseholdUpdated(change) => {
                self.invalidate(QueryKey::Household(change.household.id.clone()));
                self.invalidate(QueryKey::Me);
            }
            SyncEvent::MemberJoined(join) => {
                self.invalidate(QueryKey::HouseholdUsers(join.household.id.clone()));
            }
            SyncEvent::MemberLeft(leave) => {
                self.invalidate(QueryKey::HouseholdUsers(leave.household.id.clone()));
            }
            SyncEvent::InviteCodeRefreshed(refresh) => {
                self.invalidate(QueryKey::InviteCode(refresh.household.id.clone()));
            }
            SyncEvent::UserUpdated(change) => {
                self.invalidate(QueryKey::HouseholdUsers(change.household_id.clone()));
                self.invalidate(QueryKey::Me);
            }
            SyncEvent::Connect | SyncEvent::Reconnect => {
                debug!(kind = %event.kind(), "invalidating all cached queries");
                self.cache.invalidate_all();
            }
            SyncEvent::Disconnect(_) | SyncEvent::ConnectError(_) => {}
        }
    }

    fn invalidate(&self, key: QueryKey) {
        trace!(?key, "invalidating query");
        self.cache.invalidate(&key);
    }

    fn task_list(&self, key: &QueryKey) -> Option<Vec<Task>> {
        match self.cache.get(key) {
            Some(CachedValue::Tasks(tasks)) => Some(tasks),
            _ => None,
        }
    }

    fn upsert_task(&self, household_id: &str, task: &Task) {
        let key = QueryKey::Tasks(household_id.to_owned());
        let mut tasks = self.task_list(&key).unwrap_or_default();

        match tasks.iter().position(|t| t.id == task.id) {
            Some(index) => {
                tasks[index] = task.clone();
                // Keep only the replaced entry for this id.
                let mut kept = 0usize;
                tasks.retain(|t| {
                    if t.id != task.id {
                        return true;
                    }
                    kept += 1;
                    kept == 1
                });
            }
            None => tasks.insert(0, task.clone()),
        }

        self.cache.update(key, CachedValue::Tasks(tasks));
    }

    fn remove_task(&self, household_id: &str, task_id: &str) {
        let key = QueryKey::Tasks(household_id.to_owned());
        let Some(mut tasks) = self.task_list(&key) else {
            return;
        };
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() != before {
            self.cache.update(key, CachedValue::Tasks(tasks));
        }
    }
}
