//! App Core for TabGrid.
//!
//! Central struct wiring settings, storage, and the tab session together.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::database::connection::Database;
use crate::managers::tab_session::TabSession;
use crate::services::fallback_store::FallbackLayoutStore;
use crate::services::layout_store::SqliteLayoutStore;
use crate::services::memory_store::MemoryLayoutStore;
use crate::services::persistence_service::PersistenceService;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::services::tab_defaults::TabDefaultsProvider;
use crate::services::widget_registry::StaticWidgetRegistry;
use crate::types::settings::EngineSettings;

/// Central application struct.
pub struct App {
    pub db: Arc<Database>,
    pub settings_engine: SettingsEngine,
    pub session: TabSession,
}

impl App {
    /// Opens the SQLite store at `db_path`, loads settings, applies
    /// `overrides` (saved back to the settings file), and builds the tab
    /// session. Layouts fall back to an in-process store when SQLite writes
    /// fail.
    pub fn new(
        db_path: &str,
        settings_path: Option<PathBuf>,
        overrides: &[(String, Value)],
        defaults: Arc<dyn TabDefaultsProvider>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(Database::open(db_path)?);

        let mut settings_engine = SettingsEngine::new(settings_path);
        settings_engine.load()?;
        settings_engine.apply_overrides(overrides)?;

        let session = Self::build_session(settings_engine.get_settings(), db.clone(), defaults);
        info!(
            "app started with database {} and settings {}",
            db_path,
            settings_engine.get_config_path().display()
        );

        Ok(Self {
            db,
            settings_engine,
            session,
        })
    }

    /// Same wiring over an in-memory database and default settings.
    pub fn in_memory(defaults: Arc<dyn TabDefaultsProvider>) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(Database::open_in_memory()?);
        let settings_engine = SettingsEngine::new(None);
        let session = Self::build_session(settings_engine.get_settings(), db.clone(), defaults);
        Ok(Self {
            db,
            settings_engine,
            session,
        })
    }

    fn build_session(settings: &EngineSettings, db: Arc<Database>, defaults: Arc<dyn TabDefaultsProvider>) -> TabSession {
        let registry = Arc::new(StaticWidgetRegistry::from_settings(settings));
        let store: Arc<dyn PersistenceService> = Arc::new(FallbackLayoutStore::new(
            Arc::new(SqliteLayoutStore::new(db)),
            Arc::new(MemoryLayoutStore::new()),
        ));
        TabSession::new(settings, registry, defaults, store)
    }

    /// Shutdown sequence: flush and close every open tab.
    pub async fn shutdown(&mut self) {
        self.session.shutdown().await;
        info!("app shut down");
    }
}
