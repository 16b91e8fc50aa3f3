use serde::{Deserialize, Serialize};

use super::grid::{GridSnapshot, WidgetInstance};

/// Remote-tier representation of a tab layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub tab_id: String,
    pub version: u64,
    pub widgets: Vec<WidgetInstance>,
    pub updated_at: i64,
}

impl PersistedRecord {
    pub fn from_snapshot(snapshot: &GridSnapshot, updated_at: i64) -> Self {
        Self {
            tab_id: snapshot.tab_id.clone(),
            version: snapshot.version,
            widgets: snapshot.widgets.values().cloned().collect(),
            updated_at,
        }
    }

    /// Rebuilds a clean snapshot. Later duplicates of an instance id win.
    pub fn into_snapshot(self) -> GridSnapshot {
        let mut snapshot = GridSnapshot::empty(self.tab_id);
        snapshot.version = self.version;
        for widget in self.widgets {
            snapshot.widgets.insert(widget.instance_id.clone(), widget);
        }
        snapshot
    }
}

/// Phase of a tab's persistence pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveState {
    Clean,
    PendingSave,
    Saving,
}

/// Where an opened tab's initial snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSource {
    Persisted,
    Defaults,
    Empty,
    /// Loading failed after retries; the tab opened from defaults or empty.
    Degraded,
}

/// Result of an explicit flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved(u64),
    /// Nothing newer than the last persisted version.
    AlreadyClean(u64),
}

/// Outcome reported by a tab's persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceEvent {
    Saved { tab_id: String, version: u64 },
    Degraded { tab_id: String, version: u64, reason: String },
    /// The store already holds `stored`, which is at or beyond the version
    /// that was written. The owner rebases above it.
    Conflict { tab_id: String, attempted: u64, stored: u64 },
}

/// Notifications emitted to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SnapshotChanged { tab_id: String, version: u64 },
    Saved { tab_id: String, version: u64 },
    PersistenceDegraded { tab_id: String, version: u64, reason: String },
}
