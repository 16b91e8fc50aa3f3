//! The persistence backend contract.
//!
//! Futures are boxed so the service can sit behind `Arc<dyn PersistenceService>`
//! and be driven from a spawned task.

use std::future::Future;
use std::pin::Pin;

use crate::types::errors::PersistenceError;
use crate::types::grid::GridSnapshot;
use crate::types::persistence::PersistedRecord;

pub type PersistFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PersistenceError>> + Send + 'a>>;

/// Durable storage for tab layouts.
pub trait PersistenceService: Send + Sync {
    /// Stores `snapshot` as the latest record for `tab_id`.
    fn save<'a>(&'a self, tab_id: &'a str, snapshot: &'a GridSnapshot) -> PersistFuture<'a, ()>;

    /// Fetches the latest record for `tab_id`, or `None` if nothing was ever saved.
    fn load<'a>(&'a self, tab_id: &'a str) -> PersistFuture<'a, Option<PersistedRecord>>;
}

pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
