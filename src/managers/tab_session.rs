//! Tab Session for TabGrid.
//!
//! Owns one live [`GridSnapshot`] per open tab and is the only place that
//! replaces it. The rendering layer reads snapshots from here, the input
//! layer drives gestures through here, and every accepted mutation is
//! handed to the [`PersistenceCoordinator`] without waiting for I/O.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::managers::gesture_tracker::{GestureTracker, GestureTrackerTrait};
use crate::services::persistence_coordinator::PersistenceCoordinator;
use crate::services::persistence_service::PersistenceService;
use crate::services::reconciler::{ReconcileResult, Reconciler};
use crate::services::retry::with_backoff;
use crate::services::tab_defaults::TabDefaultsProvider;
use crate::services::widget_registry::WidgetRegistry;
use crate::types::errors::{GestureError, PersistenceError, TabSessionError};
use crate::types::grid::{CellRect, GridSnapshot, Placement, WidgetInstance, WidgetProps};
use crate::types::interaction::{GestureKind, GesturePhase};
use crate::types::persistence::{EngineEvent, FlushOutcome, LoadSource, PersistenceEvent, SaveState};
use crate::types::settings::{EngineSettings, RetrySettings};

const EVENT_CAPACITY: usize = 256;

struct OpenTab {
    snapshot: GridSnapshot,
    gestures: GestureTracker,
}

/// Owner of every open tab's layout.
pub struct TabSession {
    tabs: HashMap<String, OpenTab>,
    reconciler: Reconciler,
    defaults: Arc<dyn TabDefaultsProvider>,
    store: Arc<dyn PersistenceService>,
    coordinator: PersistenceCoordinator,
    load_retry: RetrySettings,
    events: broadcast::Sender<EngineEvent>,
}

impl TabSession {
    pub fn new(
        settings: &EngineSettings,
        registry: Arc<dyn WidgetRegistry>,
        defaults: Arc<dyn TabDefaultsProvider>,
        store: Arc<dyn PersistenceService>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tabs: HashMap::new(),
            reconciler: Reconciler::new(registry, settings.grid.columns),
            defaults,
            coordinator: PersistenceCoordinator::new(store.clone(), settings.persistence.clone()),
            store,
            load_retry: settings.persistence.retry.clone(),
            events,
        }
    }

    /// Receiver for snapshot changes and persistence outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn not_open(tab_id: &str) -> TabSessionError {
        TabSessionError::TabNotOpen(tab_id.to_string())
    }

    // --- Tab lifecycle ---

    /// Opens a tab from its persisted layout, its declared defaults, or empty,
    /// in that order of preference. Load failures are retried; once retries
    /// are used up the tab still opens and a degraded event is emitted.
    pub async fn load_from_persistence(&mut self, tab_id: &str) -> Result<LoadSource, TabSessionError> {
        if self.tabs.contains_key(tab_id) {
            return Err(TabSessionError::TabAlreadyOpen(tab_id.to_string()));
        }

        let store = self.store.as_ref();
        let label = format!("load of tab {}", tab_id);
        let loaded = with_backoff(&self.load_retry, &label, move || store.load(tab_id)).await;

        let (snapshot, source) = match loaded {
            Ok(Some(record)) => {
                let mut snapshot = record.into_snapshot();
                snapshot.tab_id = tab_id.to_string();
                (self.reconciler.normalize(&snapshot), LoadSource::Persisted)
            }
            Ok(None) => self.seed_from_defaults(tab_id),
            Err(e) => {
                warn!("tab {}: load failed, opening without persisted layout: {}", tab_id, e);
                self.emit(EngineEvent::PersistenceDegraded {
                    tab_id: tab_id.to_string(),
                    version: 0,
                    reason: e.to_string(),
                });
                let (snapshot, _) = self.seed_from_defaults(tab_id);
                (snapshot, LoadSource::Degraded)
            }
        };

        info!(
            "tab {} opened from {:?} with {} widgets at v{}",
            tab_id,
            source,
            snapshot.len(),
            snapshot.version
        );
        self.coordinator.track(&snapshot);
        let version = snapshot.version;
        self.tabs.insert(
            tab_id.to_string(),
            OpenTab {
                snapshot,
                gestures: GestureTracker::new(),
            },
        );
        self.emit(EngineEvent::SnapshotChanged {
            tab_id: tab_id.to_string(),
            version,
        });
        Ok(source)
    }

    fn seed_from_defaults(&self, tab_id: &str) -> (GridSnapshot, LoadSource) {
        let defaults = self.defaults.get_default_layout(tab_id);
        let mut snapshot = GridSnapshot::empty(tab_id);
        if defaults.is_empty() {
            return (snapshot, LoadSource::Empty);
        }
        for widget in defaults {
            snapshot.widgets.insert(widget.instance_id.clone(), widget);
        }
        (self.reconciler.normalize(&snapshot), LoadSource::Defaults)
    }

    /// Closes a tab: in-flight gestures are dropped uncommitted, pending
    /// changes are flushed, and the tab's worker is stopped. The tab is
    /// closed even when the final flush fails; the error is returned.
    pub async fn close_tab(&mut self, tab_id: &str) -> Result<FlushOutcome, TabSessionError> {
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        let dropped = tab.gestures.cancel_all();
        if !dropped.is_empty() {
            debug!("tab {}: discarded {} in-flight gestures on close", tab_id, dropped.len());
        }

        let flushed = self.flush_with_rebase(tab_id).await;
        self.coordinator.release(tab_id).await;
        self.pump();
        self.tabs.remove(tab_id);
        info!("tab {} closed", tab_id);

        flushed.map_err(TabSessionError::from)
    }

    pub fn open_tabs(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tabs.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_open(&self, tab_id: &str) -> bool {
        self.tabs.contains_key(tab_id)
    }

    // --- Snapshot access ---

    /// Read-only view for rendering.
    pub fn get_snapshot(&self, tab_id: &str) -> Option<&GridSnapshot> {
        self.tabs.get(tab_id).map(|t| &t.snapshot)
    }

    /// Replaces the tab's snapshot and notifies the coordinator. The new
    /// snapshot must carry a higher version than the current one and is
    /// marked dirty. It is normalized first, so out-of-bounds rects are
    /// clamped and overlaps pushed down; reconciler output passes through
    /// unchanged.
    pub fn apply_reconciled(&mut self, tab_id: &str, new_snapshot: GridSnapshot) -> Result<(), TabSessionError> {
        let mut new_snapshot = self.reconciler.normalize(&new_snapshot);
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        if new_snapshot.version <= tab.snapshot.version {
            return Err(TabSessionError::StaleSnapshot {
                tab_id: tab_id.to_string(),
                current: tab.snapshot.version,
                offered: new_snapshot.version,
            });
        }
        new_snapshot.tab_id = tab_id.to_string();
        new_snapshot.dirty = true;
        tab.snapshot = new_snapshot;

        let snapshot = &tab.snapshot;
        self.coordinator.notify(snapshot);
        let version = snapshot.version;
        self.emit(EngineEvent::SnapshotChanged {
            tab_id: tab_id.to_string(),
            version,
        });
        Ok(())
    }

    // --- Menu actions ---

    /// Adds a widget and returns its new instance id.
    pub fn add_widget(&mut self, tab_id: &str, widget_kind: &str, placement: Placement) -> Result<String, TabSessionError> {
        self.add_widget_with_props(tab_id, widget_kind, placement, WidgetProps::new())
    }

    pub fn add_widget_with_props(
        &mut self,
        tab_id: &str,
        widget_kind: &str,
        placement: Placement,
        props: WidgetProps,
    ) -> Result<String, TabSessionError> {
        let tab = self.tabs.get(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        let size = self.reconciler.default_size(widget_kind);
        let rect = match placement {
            Placement::Auto => self.reconciler.first_free_position(&tab.snapshot, size),
            Placement::At { x, y } => CellRect::new(x, y, size.w, size.h),
            Placement::Exact(rect) => rect,
        };

        let instance_id = Uuid::new_v4().to_string();
        let mut widget = WidgetInstance::new(instance_id.clone(), widget_kind, rect);
        widget.props = props;

        let (next, result) = self.reconciler.reconcile_insert(&tab.snapshot, widget);
        if let ReconcileResult::Committed { clamp: Some(clamp), .. } = &result {
            debug!("tab {}: new {} clamped from {:?} to {:?}", tab_id, widget_kind, clamp.requested, clamp.applied);
        }
        self.apply_reconciled(tab_id, next)?;
        Ok(instance_id)
    }

    /// Removes a widget, cancelling any gesture in progress on it first.
    /// Returns false when the widget was not on the tab.
    pub fn remove_widget(&mut self, tab_id: &str, instance_id: &str) -> Result<bool, TabSessionError> {
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        if tab.gestures.cancel(instance_id).is_some() {
            debug!("tab {}: cancelled gesture on removed widget {}", tab_id, instance_id);
        }
        let Some(next) = self.reconciler.reconcile_removal(&tab.snapshot, instance_id) else {
            return Ok(false);
        };
        self.apply_reconciled(tab_id, next)?;
        Ok(true)
    }

    // --- Gestures ---

    /// Starts a drag or resize. The snapshot is not touched.
    pub fn begin_gesture(&mut self, tab_id: &str, instance_id: &str, kind: GestureKind) -> Result<(), TabSessionError> {
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        let start_rect = tab
            .snapshot
            .get(instance_id)
            .map(|w| w.rect)
            .ok_or_else(|| GestureError::UnknownInstance(instance_id.to_string()))?;
        tab.gestures.begin(instance_id, kind, start_rect)?;
        Ok(())
    }

    /// Visual-only update. Late events for finished gestures or closed tabs
    /// are ignored and return false.
    pub fn update_gesture(&mut self, tab_id: &str, instance_id: &str, live_rect: CellRect) -> bool {
        self.tabs
            .get_mut(tab_id)
            .map(|tab| tab.gestures.update(instance_id, live_rect))
            .unwrap_or(false)
    }

    /// Ends a gesture and reconciles `final_rect` into the snapshot. The
    /// gesture returns to idle whatever the reconciliation outcome; a widget
    /// deleted mid-gesture yields `StaleInstance` and leaves the snapshot as is,
    /// including when the deletion already cancelled the gesture.
    pub fn commit_gesture(
        &mut self,
        tab_id: &str,
        instance_id: &str,
        final_rect: CellRect,
    ) -> Result<ReconcileResult, TabSessionError> {
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| Self::not_open(tab_id))?;
        if tab.gestures.phase(instance_id) == GesturePhase::Idle && !tab.snapshot.contains(instance_id) {
            debug!("tab {}: commit for removed widget {} dropped", tab_id, instance_id);
            return Ok(ReconcileResult::StaleInstance);
        }
        tab.gestures.commit(instance_id)?;

        let (next, result) = self.reconciler.reconcile(&tab.snapshot, instance_id, final_rect);
        let applied = if result.is_committed() {
            self.apply_reconciled(tab_id, next)
        } else {
            Ok(())
        };

        if let Some(tab) = self.tabs.get_mut(tab_id) {
            tab.gestures.finish(instance_id);
        }
        if let Err(e) = &applied {
            warn!("tab {}: commit of {} not applied: {}", tab_id, instance_id, e);
        }
        applied.map(|()| result)
    }

    /// Drops a gesture without reconciling. Returns false if none was active.
    pub fn cancel_gesture(&mut self, tab_id: &str, instance_id: &str) -> bool {
        self.tabs
            .get_mut(tab_id)
            .and_then(|tab| tab.gestures.cancel(instance_id))
            .is_some()
    }

    pub fn gesture_phase(&self, tab_id: &str, instance_id: &str) -> GesturePhase {
        self.tabs
            .get(tab_id)
            .map(|tab| tab.gestures.phase(instance_id))
            .unwrap_or(GesturePhase::Idle)
    }

    /// Rect to draw for a widget mid-gesture.
    pub fn live_rect(&self, tab_id: &str, instance_id: &str) -> Option<CellRect> {
        self.tabs.get(tab_id).and_then(|tab| tab.gestures.live_rect(instance_id))
    }

    // --- Persistence ---

    /// Saves the tab's latest snapshot immediately and waits for the result.
    pub async fn flush_now(&mut self, tab_id: &str) -> Result<FlushOutcome, TabSessionError> {
        if !self.tabs.contains_key(tab_id) {
            return Err(Self::not_open(tab_id));
        }
        self.flush_with_rebase(tab_id).await.map_err(TabSessionError::from)
    }

    /// Flushes once more after a version conflict, since draining the
    /// conflict rebases the snapshot above the stored version.
    async fn flush_with_rebase(&mut self, tab_id: &str) -> Result<FlushOutcome, PersistenceError> {
        let mut outcome = self.coordinator.flush_now(tab_id).await;
        if matches!(outcome, Err(PersistenceError::VersionConflict { .. })) {
            self.pump();
            outcome = self.coordinator.flush_now(tab_id).await;
        }
        self.pump();
        outcome
    }

    pub fn save_state(&self, tab_id: &str) -> Option<SaveState> {
        self.coordinator.save_state(tab_id)
    }

    /// Applies persistence outcomes: clears `dirty` once the current version
    /// is saved and forwards each outcome to subscribers. Returns the
    /// number of outcomes processed.
    pub fn pump(&mut self) -> usize {
        let events = self.coordinator.drain_events();
        let count = events.len();
        for event in events {
            match event {
                PersistenceEvent::Saved { tab_id, version } => {
                    if let Some(tab) = self.tabs.get_mut(&tab_id) {
                        if tab.snapshot.version == version {
                            tab.snapshot.dirty = false;
                        }
                    }
                    self.emit(EngineEvent::Saved { tab_id, version });
                }
                PersistenceEvent::Degraded { tab_id, version, reason } => {
                    self.emit(EngineEvent::PersistenceDegraded { tab_id, version, reason });
                }
                PersistenceEvent::Conflict { tab_id, stored, .. } => self.rebase(&tab_id, stored),
            }
        }
        count
    }

    /// Moves the tab's version above `stored` so the next save lands. This
    /// happens when the tab opened without reading the stored layout; the
    /// in-memory layout wins.
    fn rebase(&mut self, tab_id: &str, stored: u64) {
        let Some(tab) = self.tabs.get_mut(tab_id) else {
            return;
        };
        if tab.snapshot.version > stored {
            return;
        }
        let from = tab.snapshot.version;
        tab.snapshot.version = stored + 1;
        tab.snapshot.dirty = true;
        self.coordinator.notify(&tab.snapshot);
        let version = tab.snapshot.version;
        info!("tab {}: rebased v{} onto stored v{} as v{}", tab_id, from, stored, version);
        self.emit(EngineEvent::SnapshotChanged {
            tab_id: tab_id.to_string(),
            version,
        });
    }

    /// Flushes and closes every open tab.
    pub async fn shutdown(&mut self) {
        let ids: Vec<String> = self.tabs.keys().cloned().collect();
        for tab_id in ids {
            if let Err(e) = self.close_tab(&tab_id).await {
                warn!("tab {}: final flush failed: {}", tab_id, e);
            }
        }
    }
}
