// TabGrid services
// Services provide the engine's behavior: reconciliation, persistence pipeline, backends, registry, settings.

pub mod fallback_store;
pub mod layout_store;
pub mod memory_store;
pub mod persistence_coordinator;
pub mod persistence_service;
pub mod reconciler;
pub mod retry;
pub mod settings_engine;
pub mod tab_defaults;
pub mod widget_registry;
