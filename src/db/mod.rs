mod schema;
pub mod embeddings;
pub mod exif;
pub mod faces;
pub mod photos;
pub mod search;
pub mod settings;
pub mod thumbs;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use embeddings::{bytes_to_vector, cosine_similarity, vector_to_bytes, EmbeddingRecord};
pub use exif::ExifRecord;
pub use faces::{BoundingBox, FaceRecord, Person};
pub use photos::{Descriptor, PhotoRecord, PhotoUpsert};
pub use schema::{INDEX_VERSION, MIGRATIONS, SCHEMA_VERSION};
pub use search::{SearchFilters, TextHit};
pub use settings::DriveAlias;
pub use thumbs::ThumbnailRecord;

/// Embedded relational store. All access goes through a single
/// connection behind a mutex: writes serialize, and WAL keeps readers
/// from blocking the writer at the file level.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at `path`, verify integrity, and run
    /// pending migrations. Refuses to open a database written by a
    /// newer binary, and refuses a corrupt file outright.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Corruption check before touching anything. A bad file is a
        // fatal startup error, never a silent recreate.
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(Error::corruption(format!(
                "database corruption detected in {}: {check}",
                path.display()
            )));
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate_to(SCHEMA_VERSION)?;
        Ok(db)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate_to(SCHEMA_VERSION)?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply migrations up to `target`, each in its own transaction.
    pub fn migrate_to(&self, target: i64) -> Result<()> {
        let mut conn = self.conn();

        let current = current_schema_version(&conn)?;
        if current > target {
            return Err(Error::migration_refused(format!(
                "database schema version {current} is newer than supported version {target}"
            )));
        }

        for (version, sql) in MIGRATIONS {
            if *version <= current || *version > target {
                continue;
            }
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO settings (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = ?1",
                [version.to_string()],
            )?;
            tx.commit()?;
            tracing::info!(version, "Applied schema migration");
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn())
    }

    /// Row counts per table, for `/index/stats`.
    pub fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut counts = Vec::new();
        for table in ["photos", "exif", "embeddings", "thumbnails", "faces", "people"] {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            counts.push((table.to_string(), count));
        }
        Ok(counts)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let has_settings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'settings'",
        [],
        |row| row.get(0),
    )?;
    if has_settings == 0 {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT value FROM settings WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    );
    match version {
        Ok(v) => v
            .parse()
            .map_err(|_| Error::corruption(format!("unreadable schema_version: {v}"))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Current UTC timestamp in the ISO-8601 form stored throughout the db.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
