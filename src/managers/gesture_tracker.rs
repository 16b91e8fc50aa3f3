use std::collections::HashMap;

use log::debug;
use tokio::time::Instant;

use crate::types::errors::GestureError;
use crate::types::grid::CellRect;
use crate::types::interaction::{GestureKind, GesturePhase, InteractionSession};

/// Trait defining the per-widget gesture lifecycle.
pub trait GestureTrackerTrait {
    fn begin(&mut self, instance_id: &str, kind: GestureKind, start_rect: CellRect) -> Result<(), GestureError>;
    fn update(&mut self, instance_id: &str, live_rect: CellRect) -> bool;
    fn commit(&mut self, instance_id: &str) -> Result<InteractionSession, GestureError>;
    fn finish(&mut self, instance_id: &str);
    fn cancel(&mut self, instance_id: &str) -> Option<InteractionSession>;
    fn cancel_all(&mut self) -> Vec<InteractionSession>;
    fn phase(&self, instance_id: &str) -> GesturePhase;
    fn live_rect(&self, instance_id: &str) -> Option<CellRect>;
    fn active_count(&self) -> usize;
}

/// Drag/resize state for the widgets of one tab.
///
/// Holds only visual, in-flight state. Nothing here touches the tab's
/// snapshot; the tab session reconciles when a gesture is committed.
#[derive(Default)]
pub struct GestureTracker {
    sessions: HashMap<String, InteractionSession>,
}

impl GestureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalid(&self, instance_id: &str, expected: GesturePhase) -> GestureError {
        GestureError::InvalidState {
            instance_id: instance_id.to_string(),
            expected,
            actual: self.phase(instance_id),
        }
    }
}

impl GestureTrackerTrait for GestureTracker {
    /// Starts a gesture. Fails if one is already in progress for the instance.
    fn begin(&mut self, instance_id: &str, kind: GestureKind, start_rect: CellRect) -> Result<(), GestureError> {
        if self.sessions.contains_key(instance_id) {
            return Err(self.invalid(instance_id, GesturePhase::Idle));
        }
        self.sessions.insert(
            instance_id.to_string(),
            InteractionSession {
                instance_id: instance_id.to_string(),
                kind,
                start_rect,
                live_rect: start_rect,
                started_at: Instant::now(),
                phase: GesturePhase::Active,
                updates: 0,
            },
        );
        debug!("gesture {:?} began for {}", kind, instance_id);
        Ok(())
    }

    /// Records an intermediate rect. Returns false when there is no active
    /// gesture, which is expected for frames that land after commit or cancel.
    fn update(&mut self, instance_id: &str, live_rect: CellRect) -> bool {
        match self.sessions.get_mut(instance_id) {
            Some(session) if session.phase == GesturePhase::Active => {
                session.live_rect = live_rect;
                session.updates += 1;
                true
            }
            _ => false,
        }
    }

    /// Moves an active gesture to `Committing` and returns it. Call
    /// [`finish`](GestureTrackerTrait::finish) once reconciliation is done.
    fn commit(&mut self, instance_id: &str) -> Result<InteractionSession, GestureError> {
        match self.sessions.get_mut(instance_id) {
            Some(session) if session.phase == GesturePhase::Active => {
                session.phase = GesturePhase::Committing;
                Ok(session.clone())
            }
            _ => Err(self.invalid(instance_id, GesturePhase::Active)),
        }
    }

    /// Returns the instance to `Idle` regardless of how reconciliation went.
    fn finish(&mut self, instance_id: &str) {
        if let Some(session) = self.sessions.remove(instance_id) {
            debug!(
                "gesture {:?} finished for {} after {} updates",
                session.kind, instance_id, session.updates
            );
        }
    }

    /// Discards an active gesture without reconciling it.
    fn cancel(&mut self, instance_id: &str) -> Option<InteractionSession> {
        match self.sessions.get(instance_id) {
            Some(session) if session.phase == GesturePhase::Active => {}
            _ => return None,
        }
        let mut session = self.sessions.remove(instance_id)?;
        session.phase = GesturePhase::Cancelled;
        debug!("gesture {:?} cancelled for {}", session.kind, instance_id);
        Some(session)
    }

    fn cancel_all(&mut self) -> Vec<InteractionSession> {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.iter().filter_map(|id| self.cancel(id)).collect()
    }

    fn phase(&self, instance_id: &str) -> GesturePhase {
        self.sessions
            .get(instance_id)
            .map(|s| s.phase)
            .unwrap_or(GesturePhase::Idle)
    }

    fn live_rect(&self, instance_id: &str) -> Option<CellRect> {
        self.sessions.get(instance_id).map(|s| s.live_rect)
    }

    fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
