use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::grid::CellRect;

/// Which kind of pointer gesture is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GestureKind {
    Drag,
    Resize,
}

/// Lifecycle phase of a widget's gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GesturePhase {
    Idle,
    Active,
    Committing,
    Cancelled,
}

/// Ephemeral per-gesture state. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSession {
    pub instance_id: String,
    pub kind: GestureKind,
    pub start_rect: CellRect,
    pub live_rect: CellRect,
    pub started_at: Instant,
    pub phase: GesturePhase,
    /// Intermediate updates received since the gesture began.
    pub updates: u32,
}
