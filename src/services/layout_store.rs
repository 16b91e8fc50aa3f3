//! SQLite-backed layout store.
//!
//! Keeps the latest [`PersistedRecord`] per tab in the `tab_layouts` table.
//! Writes are guarded by the snapshot version: a save only lands when it is
//! newer than the stored row, otherwise it fails with `VersionConflict`.

use std::sync::Arc;

use log::debug;
use rusqlite::{params, OptionalExtension};

use crate::database::connection::Database;
use crate::services::persistence_service::{now_secs, PersistFuture, PersistenceService};
use crate::types::errors::PersistenceError;
use crate::types::grid::{GridSnapshot, WidgetInstance};
use crate::types::persistence::PersistedRecord;

pub struct SqliteLayoutStore {
    db: Arc<Database>,
}

impl SqliteLayoutStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Writes `record` if its version is newer than what is stored.
    pub fn save_record(&self, record: &PersistedRecord) -> Result<(), PersistenceError> {
        write_record(&self.db, record)
    }

    /// Reads the stored record for `tab_id`.
    pub fn load_record(&self, tab_id: &str) -> Result<Option<PersistedRecord>, PersistenceError> {
        read_record(&self.db, tab_id)
    }

    /// Removes the stored layout for `tab_id`. Returns whether a row existed.
    pub fn delete(&self, tab_id: &str) -> Result<bool, PersistenceError> {
        let changed = self
            .db
            .connection()
            .execute("DELETE FROM tab_layouts WHERE tab_id = ?1", params![tab_id])
            .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Tab ids with a stored layout, most recently updated first.
    pub fn list_tabs(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare("SELECT tab_id FROM tab_layouts ORDER BY updated_at DESC, tab_id ASC")
            .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| PersistenceError::DatabaseError(e.to_string()))?);
        }
        Ok(result)
    }
}

impl PersistenceService for SqliteLayoutStore {
    fn save<'a>(&'a self, tab_id: &'a str, snapshot: &'a GridSnapshot) -> PersistFuture<'a, ()> {
        let mut record = PersistedRecord::from_snapshot(snapshot, now_secs());
        record.tab_id = tab_id.to_string();
        let db = self.db.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || write_record(&db, &record))
                .await
                .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
        })
    }

    fn load<'a>(&'a self, tab_id: &'a str) -> PersistFuture<'a, Option<PersistedRecord>> {
        let tab_id = tab_id.to_string();
        let db = self.db.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || read_record(&db, &tab_id))
                .await
                .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
        })
    }
}

fn write_record(db: &Database, record: &PersistedRecord) -> Result<(), PersistenceError> {
    let widgets_json = serde_json::to_string(&record.widgets)
        .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
    let version = to_sql_version(record.version)?;

    let conn = db.connection();
    let changed = conn
        .execute(
            "INSERT INTO tab_layouts (tab_id, version, widgets_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tab_id) DO UPDATE SET
                 version = excluded.version,
                 widgets_json = excluded.widgets_json,
                 updated_at = excluded.updated_at
             WHERE excluded.version > tab_layouts.version",
            params![record.tab_id, version, widgets_json, record.updated_at],
        )
        .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;

    if changed == 0 {
        let stored: i64 = conn
            .query_row(
                "SELECT version FROM tab_layouts WHERE tab_id = ?1",
                params![record.tab_id],
                |row| row.get(0),
            )
            .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;
        return Err(PersistenceError::VersionConflict {
            tab_id: record.tab_id.clone(),
            attempted: record.version,
            stored: stored.max(0) as u64,
        });
    }

    debug!("stored layout for tab {} at v{}", record.tab_id, record.version);
    Ok(())
}

fn read_record(db: &Database, tab_id: &str) -> Result<Option<PersistedRecord>, PersistenceError> {
    let row = db
        .connection()
        .query_row(
            "SELECT version, widgets_json, updated_at FROM tab_layouts WHERE tab_id = ?1",
            params![tab_id],
            |row| {
                let version: i64 = row.get(0)?;
                let widgets_json: String = row.get(1)?;
                let updated_at: i64 = row.get(2)?;
                Ok((version, widgets_json, updated_at))
            },
        )
        .optional()
        .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;

    let Some((version, widgets_json, updated_at)) = row else {
        return Ok(None);
    };
    let widgets: Vec<WidgetInstance> = serde_json::from_str(&widgets_json)
        .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;

    Ok(Some(PersistedRecord {
        tab_id: tab_id.to_string(),
        version: version.max(0) as u64,
        widgets,
        updated_at,
    }))
}

fn to_sql_version(version: u64) -> Result<i64, PersistenceError> {
    i64::try_from(version)
        .map_err(|_| PersistenceError::SerializationError(format!("version {} out of range", version)))
}
