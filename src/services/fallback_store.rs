//! Two-tier layout store: a durable primary with a local secondary.
//!
//! Saves go to the primary; when it is unreachable the layout is written to
//! the secondary instead so it survives a reload, and the save still fails
//! with `FallbackOnly` because the secondary is not durable. Loads consult
//! both tiers and return whichever record carries the higher version.

use std::sync::Arc;

use log::warn;

use crate::services::persistence_service::{PersistFuture, PersistenceService};
use crate::types::errors::PersistenceError;
use crate::types::grid::GridSnapshot;
use crate::types::persistence::PersistedRecord;

pub struct FallbackLayoutStore {
    primary: Arc<dyn PersistenceService>,
    secondary: Arc<dyn PersistenceService>,
}

impl FallbackLayoutStore {
    pub fn new(primary: Arc<dyn PersistenceService>, secondary: Arc<dyn PersistenceService>) -> Self {
        Self { primary, secondary }
    }
}

impl PersistenceService for FallbackLayoutStore {
    fn save<'a>(&'a self, tab_id: &'a str, snapshot: &'a GridSnapshot) -> PersistFuture<'a, ()> {
        Box::pin(async move {
            match self.primary.save(tab_id, snapshot).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!("primary store failed for tab {}: {}; writing local copy", tab_id, e);
                    match self.secondary.save(tab_id, snapshot).await {
                        // A conflict here means the local tier already holds this version.
                        Ok(()) | Err(PersistenceError::VersionConflict { .. }) => {
                            Err(PersistenceError::FallbackOnly(e.to_string()))
                        }
                        Err(_) => Err(e),
                    }
                }
                Err(e) => Err(e),
            }
        })
    }

    fn load<'a>(&'a self, tab_id: &'a str) -> PersistFuture<'a, Option<PersistedRecord>> {
        Box::pin(async move {
            let primary = self.primary.load(tab_id).await;
            let secondary = self.secondary.load(tab_id).await;
            match (primary, secondary) {
                (Ok(a), Ok(b)) => Ok(newest(a, b)),
                (Ok(a), Err(e)) => {
                    warn!("local store load failed for tab {}: {}", tab_id, e);
                    Ok(a)
                }
                (Err(e), Ok(b)) if e.is_retryable() => {
                    warn!("primary store load failed for tab {}: {}; using local copy", tab_id, e);
                    match b {
                        Some(record) => Ok(Some(record)),
                        None => Err(e),
                    }
                }
                (Err(e), _) => Err(e),
            }
        })
    }
}

fn newest(a: Option<PersistedRecord>, b: Option<PersistedRecord>) -> Option<PersistedRecord> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.version > a.version { b } else { a }),
        (a, b) => a.or(b),
    }
}
