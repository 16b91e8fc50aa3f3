use serde::{Deserialize, Serialize};

use super::errors::SettingsError;
use super::grid::CellSize;

/// Size bounds declared by the widget registry for one widget kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetConstraints {
    pub min_size: CellSize,
    pub max_size: CellSize,
    pub default_size: CellSize,
}

impl WidgetConstraints {
    /// Checks that sizes are non-zero and `min <= default <= max` on both axes.
    pub fn validate(&self, widget_kind: &str) -> Result<(), SettingsError> {
        let (min, max, default) = (self.min_size, self.max_size, self.default_size);
        if min.w == 0 || min.h == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "widgets.{}.min_size must be at least 1x1",
                widget_kind
            )));
        }
        if min.w > max.w || min.h > max.h {
            return Err(SettingsError::InvalidValue(format!(
                "widgets.{}: min_size {}x{} exceeds max_size {}x{}",
                widget_kind, min.w, min.h, max.w, max.h
            )));
        }
        if !(min.w..=max.w).contains(&default.w) || !(min.h..=max.h).contains(&default.h) {
            return Err(SettingsError::InvalidValue(format!(
                "widgets.{}.default_size {}x{} is outside its bounds",
                widget_kind, default.w, default.h
            )));
        }
        Ok(())
    }
}

impl Default for WidgetConstraints {
    fn default() -> Self {
        Self {
            min_size: CellSize::new(1, 1),
            max_size: CellSize::new(u32::MAX, 64),
            default_size: CellSize::new(2, 2),
        }
    }
}
