use std::fmt;

use super::interaction::GesturePhase;

// === GestureError ===

/// Misuse of the gesture API by the input layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureError {
    /// The instance is not in the phase the call requires.
    InvalidState {
        instance_id: String,
        expected: GesturePhase,
        actual: GesturePhase,
    },
    /// The instance does not exist on the tab.
    UnknownInstance(String),
}

impl fmt::Display for GestureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GestureError::InvalidState {
                instance_id,
                expected,
                actual,
            } => write!(
                f,
                "Invalid gesture state for {}: expected {:?}, found {:?}",
                instance_id, expected, actual
            ),
            GestureError::UnknownInstance(id) => write!(f, "Unknown widget instance: {}", id),
        }
    }
}

impl std::error::Error for GestureError {}

// === PersistenceError ===

/// Failures reported by a persistence backend or the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// The backend could not be reached.
    Unavailable(String),
    /// The stored copy is at or beyond the version being written.
    VersionConflict {
        tab_id: String,
        attempted: u64,
        stored: u64,
    },
    /// Database operation failed.
    DatabaseError(String),
    /// Failed to serialize or deserialize a record.
    SerializationError(String),
    /// The tab's persistence worker has stopped.
    WorkerGone(String),
    /// The durable tier failed and the layout only reached the local,
    /// non-durable tier.
    FallbackOnly(String),
}

impl PersistenceError {
    /// Whether retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Unavailable(_)
                | PersistenceError::DatabaseError(_)
                | PersistenceError::FallbackOnly(_)
        )
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Unavailable(msg) => write!(f, "Persistence unavailable: {}", msg),
            PersistenceError::VersionConflict {
                tab_id,
                attempted,
                stored,
            } => write!(
                f,
                "Version conflict for tab {}: attempted {}, stored {}",
                tab_id, attempted, stored
            ),
            PersistenceError::DatabaseError(msg) => {
                write!(f, "Persistence database error: {}", msg)
            }
            PersistenceError::SerializationError(msg) => {
                write!(f, "Persistence serialization error: {}", msg)
            }
            PersistenceError::WorkerGone(tab_id) => {
                write!(f, "Persistence worker stopped for tab: {}", tab_id)
            }
            PersistenceError::FallbackOnly(msg) => {
                write!(f, "Layout kept in local fallback only: {}", msg)
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

// === TabSessionError ===

/// Errors related to tab session operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TabSessionError {
    /// No open tab with the given ID.
    TabNotOpen(String),
    /// The tab is already open.
    TabAlreadyOpen(String),
    /// A replacement snapshot does not advance the version.
    StaleSnapshot {
        tab_id: String,
        current: u64,
        offered: u64,
    },
    /// Gesture API misuse.
    Gesture(GestureError),
    /// Persistence failed on a call that waits for it.
    Persistence(PersistenceError),
}

impl fmt::Display for TabSessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabSessionError::TabNotOpen(id) => write!(f, "Tab not open: {}", id),
            TabSessionError::TabAlreadyOpen(id) => write!(f, "Tab already open: {}", id),
            TabSessionError::StaleSnapshot {
                tab_id,
                current,
                offered,
            } => write!(
                f,
                "Stale snapshot for tab {}: current v{}, offered v{}",
                tab_id, current, offered
            ),
            TabSessionError::Gesture(e) => write!(f, "Gesture error: {}", e),
            TabSessionError::Persistence(e) => write!(f, "Persistence error: {}", e),
        }
    }
}

impl std::error::Error for TabSessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TabSessionError::Gesture(e) => Some(e),
            TabSessionError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GestureError> for TabSessionError {
    fn from(e: GestureError) -> Self {
        TabSessionError::Gesture(e)
    }
}

impl From<PersistenceError> for TabSessionError {
    fn from(e: PersistenceError) -> Self {
        TabSessionError::Persistence(e)
    }
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    IoError(String),
    /// Failed to serialize or deserialize settings.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided settings value is invalid.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
