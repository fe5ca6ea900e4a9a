//! Cached-query store consumed by the reconciler.
//!
//! The UI layer owns the real cache; this module defines the seam
//! ([`QueryCache`]) and an in-memory implementation used by the CLI and tests.

pub mod reconciler;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{Household, Task, User};

pub use reconciler::CacheReconciler;

/// Identity of one cached query, mirroring the client's query layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The signed-in member (`["me"]`).
    Me,
    /// Task list of a household (`["tasks", id]`).
    Tasks(String),
    /// Household record (`["household", id]`).
    Household(String),
    /// Member list (`["household", id, "users"]`).
    HouseholdUsers(String),
    /// Invite code (`["household", id, "invite"]`).
    InviteCode(String),
}

impl QueryKey {
    /// Household the key is scoped to, if any.
    pub fn household_id(&self) -> Option<&str> {
        match self {
            Self::Me => None,
            Self::Tasks(id)
            | Self::Household(id)
            | Self::HouseholdUsers(id)
            | Self::InviteCode(id) => Some(id),
        }
    }
}

/// Value stored under a [`QueryKey`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Me(User),
    Tasks(Vec<Task>),
    Household(Household),
    Users(Vec<User>),
    InviteCode(String),
}

/// Externally owned cache of fetched queries.
///
/// Implementations must be safe to call from the connection task.
pub trait QueryCache: Send + Sync {
    /// Current value for `key`, stale or not.
    fn get(&self, key: &QueryKey) -> Option<CachedValue>;

    /// Store a fetched value, marking it fresh.
    fn set_value(&self, key: QueryKey, value: CachedValue);

    /// Replace a value with a locally merged one.
    ///
    /// An entry that was stale stays stale; a new entry starts fresh.
    fn update(&self, key: QueryKey, value: CachedValue);

    /// Mark one query stale so its next read refetches.
    fn invalidate(&self, key: &QueryKey);

    /// Mark every query stale.
    fn invalidate_all(&self);
}

#[derive(Debug)]
struct Entry {
    value: Option<CachedValue>,
    stale: bool,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<QueryKey, Entry>,
    invalidations: HashMap<QueryKey, u64>,
    full_invalidations: u64,
}

/// In-memory [`QueryCache`] with staleness tracking.
#[derive(Debug, Default)]
pub struct MemoryQueryCache {
    store: Mutex<Store>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        match self.store.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    /// Whether `key` has been invalidated since it was last set.
    ///
    /// Keys that were never set report `false`: there is nothing to refetch.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().entries.get(key).is_some_and(|e| e.stale)
    }

    /// Cached task list for a household.
    pub fn tasks(&self, household_id: &str) -> Option<Vec<Task>> {
        match self.get(&QueryKey::Tasks(household_id.to_owned())) {
            Some(CachedValue::Tasks(tasks)) => Some(tasks),
            _ => None,
        }
    }

    /// How many times `key` was invalidated individually.
    pub fn invalidation_count(&self, key: &QueryKey) -> u64 {
        self.lock().invalidations.get(key).copied().unwrap_or(0)
    }

    /// How many full invalidations have happened.
    pub fn full_invalidation_count(&self) -> u64 {
        self.lock().full_invalidations
    }
}

impl QueryCache for MemoryQueryCache {
    fn get(&self, key: &QueryKey) -> Option<CachedValue> {
        self.lock().entries.get(key).and_then(|e| e.value.clone())
    }

    fn set_value(&self, key: QueryKey, value: CachedValue) {
        self.lock().entries.insert(
            key,
            Entry {
                value: Some(value),
                stale: false,
            },
        );
    }

    fn update(&self, key: QueryKey, value: CachedValue) {
        let mut store = self.lock();
        let entry = store.entries.entry(key).or_insert(Entry {
            value: None,
            stale: false,
        });
        entry.value = Some(value);
    }

    fn invalidate(&self, key: &QueryKey) {
        let mut store = self.lock();
        *store.invalidations.entry(key.clone()).or_default() += 1;
        if let Some(entry) = store.entries.get_mut(key) {
            entry.stale = true;
        }
    }

    fn invalidate_all(&self) {
        let mut store = self.lock();
        store.full_invalidations += 1;
        for entry in store.entries.values_mut() {
            entry.stale = true;
        }
    }
}
