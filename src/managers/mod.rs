// TabGrid state managers
// Managers own in-memory state: per-widget gestures and per-tab snapshots.

pub mod gesture_tracker;
pub mod tab_session;
