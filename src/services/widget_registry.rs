//! Widget registry: size bounds per widget kind.

use std::collections::HashMap;

use crate::types::registry::WidgetConstraints;
use crate::types::settings::EngineSettings;

/// Lookup of size constraints for a widget kind.
pub trait WidgetRegistry: Send + Sync {
    /// Constraints for `widget_kind`. Unknown kinds get permissive defaults.
    fn get_constraints(&self, widget_kind: &str) -> WidgetConstraints;
    fn is_known(&self, widget_kind: &str) -> bool;
}

/// Registry backed by a fixed table, usually seeded from [`EngineSettings`].
pub struct StaticWidgetRegistry {
    kinds: HashMap<String, WidgetConstraints>,
    fallback: WidgetConstraints,
}

impl StaticWidgetRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            fallback: WidgetConstraints::default(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        let mut fallback = WidgetConstraints::default();
        fallback.max_size.w = settings.grid.columns.max(1);
        Self {
            kinds: settings.widgets.clone(),
            fallback,
        }
    }

    /// Registers or replaces the constraints for a kind.
    pub fn register(&mut self, widget_kind: &str, constraints: WidgetConstraints) {
        self.kinds.insert(widget_kind.to_string(), constraints);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for StaticWidgetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetRegistry for StaticWidgetRegistry {
    fn get_constraints(&self, widget_kind: &str) -> WidgetConstraints {
        self.kinds.get(widget_kind).copied().unwrap_or(self.fallback)
    }

    fn is_known(&self, widget_kind: &str) -> bool {
        self.kinds.contains_key(widget_kind)
    }
}
