//! In-process layout store.
//!
//! Plays the role of browser session storage: fast, local, gone when the
//! process exits. Also used as the local tier behind [`FallbackLayoutStore`]
//! and as the test double for the coordinator, so it can be told to fail.
//!
//! [`FallbackLayoutStore`]: crate::services::fallback_store::FallbackLayoutStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::services::persistence_service::{now_secs, PersistFuture, PersistenceService};
use crate::types::errors::PersistenceError;
use crate::types::grid::GridSnapshot;
use crate::types::persistence::PersistedRecord;

pub struct MemoryLayoutStore {
    records: Mutex<HashMap<String, PersistedRecord>>,
    save_log: Mutex<Vec<(String, u64)>>,
    failing_saves: AtomicU32,
    failing_loads: AtomicU32,
    available: AtomicBool,
    latency: Duration,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every save and load sleeps for `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            save_log: Mutex::new(Vec::new()),
            failing_saves: AtomicU32::new(0),
            failing_loads: AtomicU32::new(0),
            available: AtomicBool::new(true),
            latency,
        }
    }

    /// The next `n` save attempts fail with `Unavailable`.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// The next `n` load attempts fail with `Unavailable`.
    pub fn fail_next_loads(&self, n: u32) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    /// While unavailable, every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Seeds a record directly, bypassing version checks.
    pub fn insert_record(&self, record: PersistedRecord) {
        lock(&self.records).insert(record.tab_id.clone(), record);
    }

    pub fn record(&self, tab_id: &str) -> Option<PersistedRecord> {
        lock(&self.records).get(tab_id).cloned()
    }

    /// Versions of every successful save for `tab_id`, in order.
    pub fn saved_versions(&self, tab_id: &str) -> Vec<u64> {
        lock(&self.save_log)
            .iter()
            .filter(|(id, _)| id == tab_id)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Number of successful saves across all tabs.
    pub fn save_count(&self) -> usize {
        lock(&self.save_log).len()
    }

    fn check(&self, counter: &AtomicU32, op: &str) -> Result<(), PersistenceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(format!("memory store offline during {}", op)));
        }
        let injected = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistenceError::Unavailable(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn save_now(&self, tab_id: &str, snapshot: &GridSnapshot) -> Result<(), PersistenceError> {
        self.check(&self.failing_saves, "save")?;
        let mut records = lock(&self.records);
        if let Some(stored) = records.get(tab_id) {
            if stored.version >= snapshot.version {
                return Err(PersistenceError::VersionConflict {
                    tab_id: tab_id.to_string(),
                    attempted: snapshot.version,
                    stored: stored.version,
                });
            }
        }
        let mut record = PersistedRecord::from_snapshot(snapshot, now_secs());
        record.tab_id = tab_id.to_string();
        records.insert(tab_id.to_string(), record);
        lock(&self.save_log).push((tab_id.to_string(), snapshot.version));
        Ok(())
    }
}

impl Default for MemoryLayoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceService for MemoryLayoutStore {
    fn save<'a>(&'a self, tab_id: &'a str, snapshot: &'a GridSnapshot) -> PersistFuture<'a, ()> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.save_now(tab_id, snapshot)
        })
    }

    fn load<'a>(&'a self, tab_id: &'a str) -> PersistFuture<'a, Option<PersistedRecord>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.check(&self.failing_loads, "load")?;
            Ok(self.record(tab_id))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
