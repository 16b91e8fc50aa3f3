use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::errors::SettingsError;
use super::grid::CellSize;
use super::registry::WidgetConstraints;

/// Top-level engine settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    pub grid: GridSettings,
    pub persistence: PersistenceSettings,
    pub widgets: HashMap<String, WidgetConstraints>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            persistence: PersistenceSettings::default(),
            widgets: Self::default_widgets(),
        }
    }
}

impl EngineSettings {
    /// Rejects settings the engine cannot run with. Widget kinds are checked
    /// in name order so the reported error is stable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.grid.columns == 0 {
            return Err(SettingsError::InvalidValue(
                "grid.columns must be at least 1".to_string(),
            ));
        }
        self.persistence.retry.validate()?;

        let mut kinds: Vec<&String> = self.widgets.keys().collect();
        kinds.sort();
        for kind in kinds {
            self.widgets[kind].validate(kind)?;
        }
        Ok(())
    }

    /// Returns the built-in widget kinds and their size bounds.
    pub fn default_widgets() -> HashMap<String, WidgetConstraints> {
        let mut widgets = HashMap::new();
        widgets.insert(
            "chart".to_string(),
            WidgetConstraints {
                min_size: CellSize::new(2, 2),
                max_size: CellSize::new(12, 8),
                default_size: CellSize::new(2, 2),
            },
        );
        widgets.insert(
            "table".to_string(),
            WidgetConstraints {
                min_size: CellSize::new(3, 2),
                max_size: CellSize::new(12, 12),
                default_size: CellSize::new(4, 3),
            },
        );
        widgets.insert(
            "metric".to_string(),
            WidgetConstraints {
                min_size: CellSize::new(1, 1),
                max_size: CellSize::new(4, 2),
                default_size: CellSize::new(2, 1),
            },
        );
        widgets.insert(
            "text".to_string(),
            WidgetConstraints {
                min_size: CellSize::new(1, 1),
                max_size: CellSize::new(12, 6),
                default_size: CellSize::new(3, 2),
            },
        );
        widgets
    }
}

/// Grid geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridSettings {
    pub columns: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self { columns: 12 }
    }
}

/// Debounce and retry timing for the persistence pipeline, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceSettings {
    pub debounce_ms: u64,
    pub retry: RetrySettings,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            retry: RetrySettings::default(),
        }
    }
}

impl PersistenceSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Exponential backoff policy for failed saves and loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            multiplier: 2,
            max_delay_ms: 2_000,
            max_attempts: 3,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "persistence.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.multiplier == 0 {
            return Err(SettingsError::InvalidValue(
                "persistence.retry.multiplier must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "persistence.retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
