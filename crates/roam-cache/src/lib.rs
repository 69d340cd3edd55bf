pub mod migrations;
pub mod models;
pub mod queries;
pub mod retention;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use retention::{PurgeReport, run_retention_loop};

/// Device-local message cache. Every row is keyed by the owning identity so
/// two accounts on one device never see each other's buckets.
pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let cache = Self::init(conn)?;

        info!("Local cache opened at {}", path.display());
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache lock poisoned: {}", e))?;
        f(&conn)
    }
}
