//! Unit tests for TabSession: tab lifecycle, menu actions, the two-phase
//! gesture protocol, and the hand-off to persistence.
//!
//! Tests that involve the debounce window run on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use tabgrid::managers::tab_session::TabSession;
use tabgrid::services::fallback_store::FallbackLayoutStore;
use tabgrid::services::memory_store::MemoryLayoutStore;
use tabgrid::services::persistence_service::PersistenceService;
use tabgrid::services::reconciler::ReconcileResult;
use tabgrid::services::tab_defaults::StaticTabDefaults;
use tabgrid::services::widget_registry::StaticWidgetRegistry;
use tabgrid::types::errors::{GestureError, TabSessionError};
use tabgrid::types::grid::{CellRect, GridSnapshot, Placement, WidgetInstance};
use tabgrid::types::interaction::{GestureKind, GesturePhase};
use tabgrid::types::persistence::{EngineEvent, FlushOutcome, LoadSource, PersistedRecord, SaveState};
use tabgrid::types::settings::EngineSettings;
use tokio::time::sleep;

fn defaults() -> StaticTabDefaults {
    StaticTabDefaults::new().with_layout(
        "home",
        vec![
            WidgetInstance::new("welcome", "text", CellRect::new(0, 0, 3, 2)),
            WidgetInstance::new("kpi", "metric", CellRect::new(1, 1, 2, 1)),
        ],
    )
}

fn session_with(store: Arc<MemoryLayoutStore>) -> TabSession {
    let settings = EngineSettings::default();
    let registry = Arc::new(StaticWidgetRegistry::from_settings(&settings));
    TabSession::new(&settings, registry, Arc::new(defaults()), store)
}

async fn open(tab_id: &str) -> (TabSession, Arc<MemoryLayoutStore>) {
    let store = Arc::new(MemoryLayoutStore::new());
    let mut session = session_with(store.clone());
    session.load_from_persistence(tab_id).await.unwrap();
    (session, store)
}

fn snapshot<'a>(session: &'a TabSession, tab_id: &str) -> &'a GridSnapshot {
    session.get_snapshot(tab_id).expect("tab is open")
}

// === Tab lifecycle ===

#[tokio::test(start_paused = true)]
async fn test_unknown_tab_opens_empty() {
    let store = Arc::new(MemoryLayoutStore::new());
    let mut session = session_with(store);

    assert_eq!(session.load_from_persistence("T1").await, Ok(LoadSource::Empty));

    let snap = snapshot(&session, "T1");
    assert!(snap.is_empty());
    assert_eq!(snap.version, 0);
    assert!(!snap.dirty);
    assert_eq!(session.open_tabs(), vec!["T1"]);
}

#[tokio::test(start_paused = true)]
async fn test_defaults_are_seeded_and_normalized() {
    let (session, store) = open("home").await;

    let snap = snapshot(&session, "home");
    assert_eq!(snap.len(), 2);
    assert_eq!(snap.version, 0);
    assert!(!snap.dirty, "seeded defaults are not a user change");
    assert_eq!(snap.widgets["kpi"].rect, CellRect::new(1, 2, 2, 1));
    assert!(snap.find_overlap().is_none());

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(store.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persisted_layout_wins_over_defaults() {
    let store = Arc::new(MemoryLayoutStore::new());
    store.insert_record(PersistedRecord {
        tab_id: "home".to_string(),
        version: 7,
        widgets: vec![WidgetInstance::new("saved", "chart", CellRect::new(4, 0, 2, 2))],
        updated_at: 0,
    });
    let mut session = session_with(store);

    assert_eq!(session.load_from_persistence("home").await, Ok(LoadSource::Persisted));

    let snap = snapshot(&session, "home");
    assert_eq!(snap.version, 7);
    assert!(snap.contains("saved"));
    assert!(!snap.contains("welcome"));
    assert_eq!(session.save_state("home"), Some(SaveState::Clean));
}

#[tokio::test(start_paused = true)]
async fn test_open_twice_is_rejected() {
    let (mut session, _) = open("T1").await;
    assert_eq!(
        session.load_from_persistence("T1").await,
        Err(TabSessionError::TabAlreadyOpen("T1".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_load_failure_opens_degraded() {
    let store = Arc::new(MemoryLayoutStore::new());
    store.fail_next_loads(3);
    let mut session = session_with(store);
    let mut events = session.subscribe();

    assert_eq!(session.load_from_persistence("home").await, Ok(LoadSource::Degraded));

    assert_eq!(snapshot(&session, "home").len(), 2, "falls back to defaults");
    match events.try_recv().unwrap() {
        EngineEvent::PersistenceDegraded { tab_id, version, .. } => {
            assert_eq!(tab_id, "home");
            assert_eq!(version, 0);
        }
        other => panic!("expected a degraded event, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_changes() {
    let (mut session, store) = open("T1").await;
    session.add_widget("T1", "chart", Placement::Auto).unwrap();

    assert_eq!(session.close_tab("T1").await, Ok(FlushOutcome::Saved(1)));

    assert!(!session.is_open("T1"));
    assert_eq!(store.saved_versions("T1"), vec![1]);
    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(store.save_count(), 1, "no save after the tab is closed");
}

#[tokio::test(start_paused = true)]
async fn test_close_discards_active_gesture() {
    let (mut session, store) = open("T1").await;
    let id = session
        .add_widget("T1", "chart", Placement::At { x: 0, y: 0 })
        .unwrap();
    session.begin_gesture("T1", &id, GestureKind::Drag).unwrap();
    session.update_gesture("T1", &id, CellRect::new(6, 6, 2, 2));

    session.close_tab("T1").await.unwrap();

    let record = store.record("T1").unwrap();
    assert_eq!(record.widgets[0].rect, CellRect::new(0, 0, 2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_reload_restores_same_widgets() {
    let store = Arc::new(MemoryLayoutStore::new());
    let mut session = session_with(store.clone());
    session.load_from_persistence("T1").await.unwrap();
    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    session.add_widget("T1", "table", Placement::Auto).unwrap();
    let before = snapshot(&session, "T1").clone();
    session.close_tab("T1").await.unwrap();

    assert_eq!(session.load_from_persistence("T1").await, Ok(LoadSource::Persisted));

    let after = snapshot(&session, "T1");
    assert_eq!(after.widgets, before.widgets);
    assert_eq!(after.version, before.version);
    assert!(!after.dirty);
}

#[tokio::test(start_paused = true)]
async fn test_operations_on_closed_tab_fail() {
    let store = Arc::new(MemoryLayoutStore::new());
    let mut session = session_with(store);
    let not_open = TabSessionError::TabNotOpen("T9".to_string());

    assert_eq!(session.add_widget("T9", "chart", Placement::Auto), Err(not_open.clone()));
    assert_eq!(session.remove_widget("T9", "w"), Err(not_open.clone()));
    assert_eq!(session.begin_gesture("T9", "w", GestureKind::Drag), Err(not_open.clone()));
    assert_eq!(session.flush_now("T9").await, Err(not_open.clone()));
    assert_eq!(session.close_tab("T9").await, Err(not_open));
    assert!(!session.update_gesture("T9", "w", CellRect::new(0, 0, 1, 1)));
    assert!(!session.cancel_gesture("T9", "w"));
    assert!(session.get_snapshot("T9").is_none());
}

// === Menu actions ===

#[tokio::test(start_paused = true)]
async fn test_add_widget_placements() {
    let (mut session, _) = open("T1").await;

    let a = session.add_widget("T1", "chart", Placement::Auto).unwrap();
    let b = session.add_widget("T1", "chart", Placement::Auto).unwrap();
    let c = session
        .add_widget("T1", "metric", Placement::Exact(CellRect::new(8, 0, 10, 1)))
        .unwrap();

    let snap = snapshot(&session, "T1");
    assert_eq!(snap.widgets[&a].rect, CellRect::new(0, 0, 2, 2));
    assert_eq!(snap.widgets[&b].rect, CellRect::new(2, 0, 2, 2));
    assert_eq!(snap.widgets[&c].rect, CellRect::new(8, 0, 4, 1), "clamped to metric max width");
    assert_eq!(snap.version, 3);
    assert!(snap.dirty);
}

#[tokio::test(start_paused = true)]
async fn test_add_widget_keeps_props() {
    let (mut session, _) = open("T1").await;
    let mut props = serde_json::Map::new();
    props.insert("metric".to_string(), serde_json::json!("latency_p99"));

    let id = session
        .add_widget_with_props("T1", "metric", Placement::Auto, props.clone())
        .unwrap();

    assert_eq!(snapshot(&session, "T1").widgets[&id].props, props);
}

#[tokio::test(start_paused = true)]
async fn test_remove_widget() {
    let (mut session, _) = open("T1").await;
    let id = session.add_widget("T1", "chart", Placement::Auto).unwrap();

    assert_eq!(session.remove_widget("T1", &id), Ok(true));
    assert_eq!(session.remove_widget("T1", &id), Ok(false));

    let snap = snapshot(&session, "T1");
    assert!(snap.is_empty());
    assert_eq!(snap.version, 2);
}

#[tokio::test(start_paused = true)]
async fn test_remove_cancels_active_gesture() {
    let (mut session, _) = open("T1").await;
    let id = session.add_widget("T1", "chart", Placement::Auto).unwrap();
    session.begin_gesture("T1", &id, GestureKind::Drag).unwrap();

    session.remove_widget("T1", &id).unwrap();

    assert_eq!(session.gesture_phase("T1", &id), GesturePhase::Idle);
    assert_eq!(
        session.commit_gesture("T1", &id, CellRect::new(0, 0, 2, 2)),
        Ok(ReconcileResult::StaleInstance)
    );
    let snap = snapshot(&session, "T1");
    assert!(!snap.contains(&id));
    assert_eq!(snap.version, 2, "a stale commit does not bump the version");
    assert_eq!(session.gesture_phase("T1", &id), GesturePhase::Idle);
}

/// Committing a widget that is still on the tab without a gesture is a
/// protocol error, not a stale commit.
#[tokio::test(start_paused = true)]
async fn test_commit_without_gesture_on_live_widget_is_rejected() {
    let (mut session, _) = open("T1").await;
    let id = session.add_widget("T1", "chart", Placement::Auto).unwrap();

    assert!(matches!(
        session.commit_gesture("T1", &id, CellRect::new(0, 0, 2, 2)),
        Err(TabSessionError::Gesture(GestureError::InvalidState { .. }))
    ));
    assert_eq!(snapshot(&session, "T1").version, 1);
}

// === Gestures ===

/// Empty tab, one chart at (2,2), a five-frame drag to the origin, and a
/// single save of the committed version once the debounce window closes.
#[tokio::test(start_paused = true)]
async fn test_drag_commit_then_single_debounced_save() {
    let (mut session, store) = open("T1").await;

    let id = session
        .add_widget("T1", "chart", Placement::At { x: 2, y: 2 })
        .unwrap();
    assert_eq!(snapshot(&session, "T1").widgets[&id].rect, CellRect::new(2, 2, 2, 2));
    assert_eq!(snapshot(&session, "T1").version, 1);

    session.begin_gesture("T1", &id, GestureKind::Drag).unwrap();
    for step in (0..5u32).rev() {
        assert!(session.update_gesture("T1", &id, CellRect::new(step / 2, step / 2, 2, 2)));
        assert_eq!(snapshot(&session, "T1").version, 1, "updates never touch the snapshot");
        assert_eq!(snapshot(&session, "T1").widgets[&id].rect, CellRect::new(2, 2, 2, 2));
    }
    assert_eq!(session.live_rect("T1", &id), Some(CellRect::new(0, 0, 2, 2)));

    let result = session
        .commit_gesture("T1", &id, CellRect::new(0, 0, 2, 2))
        .unwrap();
    assert!(result.is_committed());
    assert_eq!(session.gesture_phase("T1", &id), GesturePhase::Idle);
    let snap = snapshot(&session, "T1");
    assert_eq!(snap.widgets[&id].rect, CellRect::new(0, 0, 2, 2));
    assert_eq!(snap.version, 2);

    sleep(Duration::from_millis(499)).await;
    assert_eq!(store.save_count(), 0);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(store.saved_versions("T1"), vec![2]);

    assert_eq!(session.pump(), 1);
    assert!(!snapshot(&session, "T1").dirty);
}

#[tokio::test(start_paused = true)]
async fn test_commit_displaces_overlapped_widget() {
    let (mut session, _) = open("T1").await;
    let a = session
        .add_widget("T1", "chart", Placement::Exact(CellRect::new(0, 0, 2, 2)))
        .unwrap();
    let b = session
        .add_widget("T1", "chart", Placement::Exact(CellRect::new(0, 2, 2, 2)))
        .unwrap();

    session.begin_gesture("T1", &a, GestureKind::Resize).unwrap();
    let result = session
        .commit_gesture("T1", &a, CellRect::new(0, 0, 2, 3))
        .unwrap();

    assert_eq!(
        result,
        ReconcileResult::Committed {
            displaced: vec![b.clone()],
            clamp: None,
        }
    );
    assert_eq!(snapshot(&session, "T1").widgets[&b].rect, CellRect::new(0, 3, 2, 2));
}

/// A snapshot replaced mid-gesture without the widget yields `StaleInstance`
/// and never resurrects it.
#[tokio::test(start_paused = true)]
async fn test_commit_after_concurrent_removal_is_stale() {
    let (mut session, _) = open("T1").await;
    let id = session.add_widget("T1", "chart", Placement::Auto).unwrap();
    session.begin_gesture("T1", &id, GestureKind::Drag).unwrap();

    let current = snapshot(&session, "T1").clone();
    let without = session
        .reconciler()
        .reconcile_removal(&current, &id)
        .unwrap();
    session.apply_reconciled("T1", without).unwrap();

    let result = session
        .commit_gesture("T1", &id, CellRect::new(4, 4, 2, 2))
        .unwrap();

    assert_eq!(result, ReconcileResult::StaleInstance);
    let snap = snapshot(&session, "T1");
    assert!(!snap.contains(&id));
    assert_eq!(snap.version, 2);
    assert_eq!(session.gesture_phase("T1", &id), GesturePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_gesture_leaves_snapshot() {
    let (mut session, _) = open("T1").await;
    let id = session.add_widget("T1", "chart", Placement::Auto).unwrap();
    session.begin_gesture("T1", &id, GestureKind::Drag).unwrap();
    session.update_gesture("T1", &id, CellRect::new(5, 5, 2, 2));

    assert!(session.cancel_gesture("T1", &id));
    assert!(!session.cancel_gesture("T1", &id));
    assert!(!session.update_gesture("T1", &id, CellRect::new(6, 6, 2, 2)));

    let snap = snapshot(&session, "T1");
    assert_eq!(snap.version, 1);
    assert_eq!(snap.widgets[&id].rect, CellRect::new(0, 0, 2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_begin_gesture_on_missing_widget() {
    let (mut session, _) = open("T1").await;
    assert_eq!(
        session.begin_gesture("T1", "ghost", GestureKind::Drag),
        Err(TabSessionError::Gesture(GestureError::UnknownInstance("ghost".to_string())))
    );
}

#[tokio::test(start_paused = true)]
async fn test_apply_reconciled_rejects_old_version() {
    let (mut session, _) = open("T1").await;
    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    let stale = snapshot(&session, "T1").clone();

    assert_eq!(
        session.apply_reconciled("T1", stale),
        Err(TabSessionError::StaleSnapshot {
            tab_id: "T1".to_string(),
            current: 1,
            offered: 1,
        })
    );
}

/// Offered layouts are clamped and de-overlapped before they land.
#[tokio::test(start_paused = true)]
async fn test_apply_reconciled_normalizes_layout() {
    let (mut session, _) = open("T1").await;
    let mut offered = snapshot(&session, "T1").clone();
    offered.widgets.insert(
        "a".to_string(),
        WidgetInstance::new("a", "chart", CellRect::new(0, 0, 2, 2)),
    );
    offered.widgets.insert(
        "b".to_string(),
        WidgetInstance::new("b", "chart", CellRect::new(11, 1, 30, 1)),
    );
    offered.version = 1;

    session.apply_reconciled("T1", offered).unwrap();

    let snap = snapshot(&session, "T1");
    assert_eq!(snap.version, 1);
    assert!(snap.dirty);
    assert_eq!(snap.widgets["a"].rect, CellRect::new(0, 0, 2, 2));
    assert_eq!(snap.widgets["b"].rect, CellRect::new(0, 2, 12, 2));
    assert!(snap.find_overlap().is_none());
}

// === Persistence ===

#[tokio::test(start_paused = true)]
async fn test_events_reach_subscribers() {
    let (mut session, _) = open("T1").await;
    let mut events = session.subscribe();

    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    sleep(Duration::from_millis(600)).await;
    session.pump();

    assert_eq!(
        events.try_recv().unwrap(),
        EngineEvent::SnapshotChanged {
            tab_id: "T1".to_string(),
            version: 1,
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        EngineEvent::Saved {
            tab_id: "T1".to_string(),
            version: 1,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_flush_now_and_degraded_save() {
    let (mut session, store) = open("T1").await;
    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    assert_eq!(session.flush_now("T1").await, Ok(FlushOutcome::Saved(1)));
    assert!(!snapshot(&session, "T1").dirty);

    store.set_available(false);
    session.add_widget("T1", "table", Placement::Auto).unwrap();
    let mut events = session.subscribe();
    let result = session.flush_now("T1").await;

    assert!(matches!(result, Err(TabSessionError::Persistence(_))));
    assert!(snapshot(&session, "T1").dirty, "unsaved changes stay dirty");
    assert!(matches!(
        events.try_recv().unwrap(),
        EngineEvent::PersistenceDegraded { version: 2, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_every_tab() {
    let store = Arc::new(MemoryLayoutStore::new());
    let mut session = session_with(store.clone());
    for tab in ["a", "b"] {
        session.load_from_persistence(tab).await.unwrap();
        session.add_widget(tab, "chart", Placement::Auto).unwrap();
    }

    session.shutdown().await;

    assert!(session.open_tabs().is_empty());
    assert_eq!(store.saved_versions("a"), vec![1]);
    assert_eq!(store.saved_versions("b"), vec![1]);
}

fn stored_record(tab_id: &str, version: u64) -> PersistedRecord {
    PersistedRecord {
        tab_id: tab_id.to_string(),
        version,
        widgets: vec![WidgetInstance::new("saved", "chart", CellRect::new(0, 0, 2, 2))],
        updated_at: 0,
    }
}

/// A tab opened degraded starts at v0 while the store holds v5. The first
/// flush conflicts, the tab is rebased above the stored version, and the
/// in-memory layout is written.
#[tokio::test(start_paused = true)]
async fn test_degraded_open_rebases_on_flush() {
    let store = Arc::new(MemoryLayoutStore::new());
    store.insert_record(stored_record("T1", 5));
    store.fail_next_loads(3);
    let mut session = session_with(store.clone());
    assert_eq!(session.load_from_persistence("T1").await, Ok(LoadSource::Degraded));

    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    session.add_widget("T1", "table", Placement::Auto).unwrap();
    assert_eq!(snapshot(&session, "T1").version, 2);

    assert_eq!(session.flush_now("T1").await, Ok(FlushOutcome::Saved(6)));

    let snap = snapshot(&session, "T1");
    assert_eq!(snap.version, 6);
    assert!(!snap.dirty);
    let record = store.record("T1").expect("record stored");
    assert_eq!(record.version, 6);
    assert_eq!(record.widgets.len(), 2);
    assert!(record.widgets.iter().all(|w| w.instance_id != "saved"));
}

/// Same situation through the debounce window instead of an explicit flush.
#[tokio::test(start_paused = true)]
async fn test_degraded_open_rebases_on_debounced_save() {
    let store = Arc::new(MemoryLayoutStore::new());
    store.insert_record(stored_record("T1", 5));
    store.fail_next_loads(3);
    let mut session = session_with(store.clone());
    session.load_from_persistence("T1").await.unwrap();
    let mut events = session.subscribe();

    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    sleep(Duration::from_millis(600)).await;
    session.pump();
    sleep(Duration::from_millis(600)).await;
    session.pump();

    assert_eq!(store.saved_versions("T1"), vec![6]);
    assert!(!snapshot(&session, "T1").dirty);

    let versions: Vec<u64> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            EngineEvent::SnapshotChanged { version, .. } => Some(version),
            _ => None,
        })
        .collect();
    assert_eq!(versions, vec![1, 6]);
}

/// With the durable tier down, a write that only reached the local tier is
/// reported as degraded and the tab stays dirty until the durable tier takes it.
#[tokio::test(start_paused = true)]
async fn test_local_only_save_stays_dirty() {
    let primary = Arc::new(MemoryLayoutStore::new());
    let secondary = Arc::new(MemoryLayoutStore::new());
    let store: Arc<dyn PersistenceService> = Arc::new(FallbackLayoutStore::new(primary.clone(), secondary.clone()));
    let settings = EngineSettings::default();
    let registry = Arc::new(StaticWidgetRegistry::from_settings(&settings));
    let mut session = TabSession::new(&settings, registry, Arc::new(defaults()), store);
    session.load_from_persistence("T1").await.unwrap();

    primary.set_available(false);
    session.add_widget("T1", "chart", Placement::Auto).unwrap();
    let mut events = session.subscribe();
    sleep(Duration::from_millis(2_000)).await;
    session.pump();

    assert!(matches!(
        events.try_recv().unwrap(),
        EngineEvent::PersistenceDegraded { version: 1, .. }
    ));
    assert!(events.try_recv().is_err(), "no saved event for a local-only write");
    assert!(snapshot(&session, "T1").dirty);
    assert_eq!(secondary.saved_versions("T1"), vec![1]);
    assert_eq!(primary.save_count(), 0);

    primary.set_available(true);
    assert_eq!(session.flush_now("T1").await, Ok(FlushOutcome::Saved(1)));
    assert!(!snapshot(&session, "T1").dirty);
    assert_eq!(primary.saved_versions("T1"), vec![1]);
}
