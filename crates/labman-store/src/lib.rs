//! A schema-versioned SQL store for scalar logs, block datasets, single-value
//! parameters and metadata, and live-plot figure registrations.
//!
//! The store is a thin, typed wrapper around a single `rusqlite` connection
//! guarded by a mutex (writers across tasks serialize at the connection;
//! readers observe committed transactions once WAL mode is enabled). When
//! `delay_save` is requested, the guarded connection is an in-memory shadow
//! database instead of the on-disk file; the shadow is canonical for the
//! life of the session and is copied back to disk on [`Store::flush_to_disk`]
//! or [`Store::close`].

mod dataset;
mod error;
mod figure;
mod log;
mod params;
mod schema;

pub use dataset::DatasetRow;
pub use error::{Result, StoreError};
pub use figure::{FigureSpec, YScale};
pub use log::LogSample;
pub use schema::LATEST_VERSION;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

/// How a [`Store`] should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The file must already exist; no writes are permitted.
    ReadOnly,
    /// The file must already exist; writes are permitted.
    ReadWrite,
    /// Create the file (and its tables) if it does not already exist.
    CreateIfMissing,
}

/// A schema-versioned, optionally delay-saved, SQL-backed store.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    mode: OpenMode,
    delay_save: bool,
    version: f64,
    closed: bool,
}

impl Store {
    /// Open (or create) a store.
    ///
    /// If `path` is `None`, the store lives only in memory regardless of
    /// `delay_save` (there is nothing to flush to).
    ///
    /// If `delay_save` is set and `path` exists, its contents are copied
    /// into a fresh in-memory shadow database under a single transaction
    /// before this call returns; all subsequent reads/writes in this
    /// session hit the shadow.
    pub fn open(path: Option<&Path>, mode: OpenMode, delay_save: bool) -> Result<Self> {
        let read_only = mode == OpenMode::ReadOnly;

        let (conn, version) = match path {
            None => {
                let conn = Connection::open_in_memory()?;
                enable_wal_best_effort(&conn);
                let version = schema::read_version(&conn);
                let version = match version {
                    Some(v) => v,
                    None => {
                        let now = wall_now();
                        schema::create_latest(&conn, now)?;
                        schema::LATEST_VERSION
                    }
                };
                (conn, version)
            }
            Some(path) => {
                let exists = path.exists();
                if !exists && matches!(mode, OpenMode::ReadOnly | OpenMode::ReadWrite) {
                    return Err(StoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("store file not found: {}", path.display()),
                    )));
                }

                if delay_save {
                    let shadow = Connection::open_in_memory()?;
                    enable_wal_best_effort(&shadow);
                    let version = if exists {
                        copy_disk_into_shadow(&shadow, path)?;
                        schema::read_version(&shadow)
                    } else {
                        None
                    };
                    let version = match version {
                        Some(v) => v,
                        None => {
                            let now = wall_now();
                            schema::create_latest(&shadow, now)?;
                            schema::LATEST_VERSION
                        }
                    };
                    (shadow, version)
                } else {
                    let conn = Connection::open(path)?;
                    enable_wal_best_effort(&conn);
                    let version = schema::read_version(&conn);
                    let version = match version {
                        Some(v) => v,
                        None => {
                            let now = wall_now();
                            schema::create_latest(&conn, now)?;
                            schema::LATEST_VERSION
                        }
                    };
                    (conn, version)
                }
            }
        };

        if !schema::is_known_version(version) {
            if read_only {
                return Err(StoreError::Schema { version });
            }
            tracing::warn!(version, "opening store with an unrecognized schema version");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.map(PathBuf::from),
            mode,
            delay_save,
            version,
            closed: false,
        })
    }

    pub fn version(&self) -> f64 {
        self.version
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    pub fn is_delay_save(&self) -> bool {
        self.delay_save
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    pub(crate) fn version_checked(&self) -> f64 {
        self.version
    }

    /// Write the in-memory shadow back to the on-disk path. Only
    /// meaningful when the session was opened with `delay_save`; a no-op
    /// (but not an error) otherwise, matching the spec's "only meaningful
    /// with delay-save" wording.
    pub fn flush_to_disk(&self) -> Result<()> {
        if !self.delay_save {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };

        let guard = self.conn.lock();
        guard.execute(
            "ATTACH DATABASE ?1 AS diskdb",
            rusqlite::params![path.to_string_lossy()],
        )?;

        let result = (|| -> Result<()> {
            guard.execute_batch("BEGIN")?;
            for table in schema::all_table_names() {
                let create_like: String = guard.query_row(
                    "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )?;
                guard.execute(&create_like.replacen(&format!("{table}"), &format!("diskdb.{table}"), 1), [])?;
                guard.execute(&format!("DELETE FROM diskdb.{table}"), [])?;
                guard.execute(
                    &format!("INSERT INTO diskdb.{table} SELECT * FROM main.{table}"),
                    [],
                )?;
            }
            guard.execute_batch("COMMIT")?;
            Ok(())
        })();

        guard.execute("DETACH DATABASE diskdb", [])?;
        result
    }

    /// Release the store. If delay-save, flushes the shadow to disk first.
    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.delay_save && !self.is_read_only() {
            self.flush_to_disk()?;
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "error while closing store on drop");
        }
    }
}

fn wall_now() -> f64 {
    labman_clock::Clock::now_wall(&labman_clock::SystemClock::new())
}

fn enable_wal_best_effort(conn: &Connection) {
    // WAL lets readers (HTTP handlers, live-plot) proceed without blocking
    // on writers (the logging task, dataset ingestion). Best-effort: some
    // filesystems (network mounts, `:memory:`) don't support WAL and sqlite
    // silently falls back, which is fine for a single-process store.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
}

/// Copy every row of every known table from the on-disk file at `path`
/// into the (empty) shadow connection, including the CREATE TABLE
/// statements themselves, under a single transaction.
fn copy_disk_into_shadow(shadow: &Connection, path: &Path) -> Result<()> {
    shadow.execute(
        "ATTACH DATABASE ?1 AS diskdb",
        rusqlite::params![path.to_string_lossy()],
    )?;

    let result = (|| -> Result<()> {
        shadow.execute_batch("BEGIN")?;
        let mut table_ddls: Vec<(String, String)> = Vec::new();
        {
            let mut stmt = shadow.prepare(
                "SELECT name, sql FROM diskdb.sqlite_master WHERE type='table' AND sql IS NOT NULL",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let sql: String = row.get(1)?;
                table_ddls.push((name, sql));
            }
        }
        for (name, ddl) in &table_ddls {
            shadow.execute(ddl, [])?;
            shadow.execute(&format!("INSERT INTO main.{name} SELECT * FROM diskdb.{name}"), [])?;
        }
        shadow.execute_batch("COMMIT")?;
        Ok(())
    })();

    shadow.execute("DETACH DATABASE diskdb", [])?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_memory_store_is_latest_version() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        assert_eq!(store.version(), LATEST_VERSION);
        assert!(!store.is_read_only());
    }

    #[test]
    fn opening_missing_file_read_only_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.db");
        let err = Store::open(Some(&path), OpenMode::ReadOnly, false).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn create_if_missing_creates_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        {
            let _store = Store::open(Some(&path), OpenMode::CreateIfMissing, false).unwrap();
        }
        assert!(path.exists());
        let store = Store::open(Some(&path), OpenMode::ReadOnly, false).unwrap();
        assert_eq!(store.version(), LATEST_VERSION);
    }

    #[test]
    fn legacy_v1_schema_has_no_metadata_but_logs_work() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_for_version(&conn, 1.0).unwrap();
        conn.execute(
            "INSERT INTO log_names (name) VALUES ('a')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO log (ts, name, value) VALUES (1.0, 'a', 42.0)",
            [],
        )
        .unwrap();
        drop(conn);
    }
}
