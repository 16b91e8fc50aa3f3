//! Static per-tab default layouts, consulted only when nothing was persisted.

use std::collections::HashMap;

use crate::types::grid::WidgetInstance;

/// Source of a tab's declared default layout.
pub trait TabDefaultsProvider: Send + Sync {
    fn get_default_layout(&self, tab_id: &str) -> Vec<WidgetInstance>;
}

/// Defaults held in memory, keyed by tab id.
#[derive(Default)]
pub struct StaticTabDefaults {
    layouts: HashMap<String, Vec<WidgetInstance>>,
}

impl StaticTabDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(mut self, tab_id: &str, widgets: Vec<WidgetInstance>) -> Self {
        self.layouts.insert(tab_id.to_string(), widgets);
        self
    }
}

impl TabDefaultsProvider for StaticTabDefaults {
    fn get_default_layout(&self, tab_id: &str) -> Vec<WidgetInstance> {
        self.layouts.get(tab_id).cloned().unwrap_or_default()
    }
}
