//! SQLite evidence store: schema migrations plus readers and writers for
//! controls, chunks and relevance labels.

use crate::error::{HarnessError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tokio::task;

pub mod evidence;
pub mod migrate;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY;";

/// Database connection wrapper
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection with pragmas applied and the schema migrated.
    pub fn open_connection(&self) -> Result<Connection> {
        let mut conn = Connection::open(&self.path).map_err(HarnessError::Database)?;
        conn.execute_batch(PRAGMAS)?;
        migrate::run_migrations(&mut conn)?;
        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Db::new(&self.path);
        task::spawn_blocking(move || {
            let mut conn = db.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| HarnessError::Io(std::io::Error::other(e)))?
    }
}
