//! SQLite metadata store for images, properties and aliases.

mod aliases;
mod images;
mod schema;

pub use images::{ImageRecord, NewImage};
pub use schema::SCHEMA_VERSION;

use depot_core::error::{DepotError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::storage::SettingStore;

/// Metadata store.
///
/// One connection behind a mutex; every multi-statement change runs in a
/// transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Map a SQLite error to the depot taxonomy.
pub(crate) fn map_db_error(e: rusqlite::Error, what: &str) -> DepotError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => DepotError::NotFound(what.to_string()),
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DepotError::Conflict(format!("{} already exists", what))
        }
        other => DepotError::Database(format!("{}: {}", what, other)),
    }
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DepotError::Database(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            DepotError::Database(format!("cannot open database {}: {}", path.display(), e))
        })?;
        conn.pragma_update(None, "journal_mode", "wal")
            .map_err(|e| DepotError::Database(format!("cannot set WAL mode: {}", e)))?;

        let db = Self::init(conn)?;
        tracing::debug!(path = %path.display(), "Opened metadata store");
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DepotError::Database(format!("cannot open database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| DepotError::Database(format!("cannot enable foreign keys: {}", e)))?;

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| map_db_error(e, "schema version"))?;
        if version > SCHEMA_VERSION {
            return Err(DepotError::Database(format!(
                "database schema version {} is newer than supported {}",
                version, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(|e| DepotError::Database(format!("cannot create schema: {}", e)))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| map_db_error(e, "schema version"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SettingStore for Database {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()
        .map(Option::flatten)
        .map_err(|e| map_db_error(e, "setting"))
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .map_err(|e| map_db_error(e, "setting"))?;
        Ok(())
    }
}
