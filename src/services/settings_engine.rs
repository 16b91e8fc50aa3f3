//! Engine settings backed by a JSON file.
//!
//! Individual values are addressed with dotted keys such as
//! `persistence.debounce_ms` or `widgets.chart.max_size`. Every change is
//! validated as a whole before it replaces the in-memory copy or the file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;

use crate::types::errors::SettingsError;
use crate::types::settings::EngineSettings;

pub const DEFAULT_SETTINGS_FILE: &str = "tabgrid.json";

/// Load, edit, and persist [`EngineSettings`].
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<EngineSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &EngineSettings;
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &Path;
}

pub struct SettingsEngine {
    path: PathBuf,
    settings: EngineSettings,
}

impl SettingsEngine {
    /// Uses `path` when given, [`DEFAULT_SETTINGS_FILE`] otherwise. Nothing is
    /// read until [`load`](SettingsEngineTrait::load).
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            settings: EngineSettings::default(),
        }
    }

    /// Applies `(key, value)` pairs in order. Stops at the first rejected
    /// pair; earlier pairs stay applied.
    pub fn apply_overrides(&mut self, overrides: &[(String, Value)]) -> Result<(), SettingsError> {
        for (key, value) in overrides {
            self.set_value(key, value.clone())?;
            info!("settings: {} = {}", key, value);
        }
        Ok(())
    }

    /// `a.b.c` becomes the JSON pointer `/a/b/c`.
    fn pointer(key: &str) -> Result<String, SettingsError> {
        let malformed = key.split('.').any(|part| part.is_empty() || part.contains(&['/', '~'][..]));
        if malformed {
            return Err(SettingsError::InvalidKey(format!("'{}' is not a dotted key", key)));
        }
        Ok(format!("/{}", key.replace('.', "/")))
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> SettingsError {
        SettingsError::IoError(format!("{} {}: {}", action, self.path.display(), e))
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// A missing file yields the defaults. A file that does not parse or
    /// does not validate is an error and leaves the current settings alone.
    fn load(&mut self) -> Result<EngineSettings, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no settings file at {}, using defaults", self.path.display());
                self.settings = EngineSettings::default();
                return Ok(self.settings.clone());
            }
            Err(e) => return Err(self.io_error("cannot read", e)),
        };

        let settings: EngineSettings = serde_json::from_str(&raw).map_err(|e| {
            SettingsError::SerializationError(format!("{}: {}", self.path.display(), e))
        })?;
        settings.validate()?;

        self.settings = settings;
        Ok(self.settings.clone())
    }

    fn save(&self) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error("cannot create directory for", e))?;
        }
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| SettingsError::SerializationError(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| self.io_error("cannot write", e))
    }

    fn get_settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Replaces the value at an existing key and saves. New keys cannot be
    /// introduced, including new widget kinds.
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        let pointer = Self::pointer(key)?;
        let mut tree = serde_json::to_value(&self.settings)
            .map_err(|e| SettingsError::SerializationError(e.to_string()))?;

        let slot = tree
            .pointer_mut(&pointer)
            .ok_or_else(|| SettingsError::InvalidKey(format!("'{}' not found in settings", key)))?;
        *slot = value;

        let next: EngineSettings = serde_json::from_value(tree)
            .map_err(|e| SettingsError::InvalidValue(format!("{}: {}", key, e)))?;
        next.validate()?;

        self.settings = next;
        self.save()
    }

    fn reset(&mut self) -> Result<(), SettingsError> {
        self.settings = EngineSettings::default();
        self.save()
    }

    fn get_config_path(&self) -> &Path {
        &self.path
    }
}
