use rusqlite::Connection;

use crate::error::Result;

/// The schema version a freshly created session is always stamped with.
pub const LATEST_VERSION: f64 = 4.1;

/// Reserved parameter names (§6 of the spec: these live in `parameters`,
/// never in user-visible `parameters()`/`metadatas()` listings that filter
/// underscore-prefixed names).
pub const DATABASE_VERSION_KEY: &str = "_database_version";
pub const SESSION_CREATION_TIMESTAMP_KEY: &str = "_session_creation_timestamp";
pub const EMAIL_LAST_SENT_KEY: &str = "email_lastSent";

/// Tables present at schema v1/v3/v3.1 (no metadata, no figures).
const BASE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS log_names (name TEXT PRIMARY KEY)",
    "CREATE TABLE IF NOT EXISTS log (
        rowid INTEGER PRIMARY KEY AUTOINCREMENT,
        ts REAL NOT NULL,
        name TEXT NOT NULL REFERENCES log_names(name),
        value REAL NOT NULL,
        UNIQUE(name, ts)
    )",
    "CREATE TABLE IF NOT EXISTS dataset_names (name TEXT PRIMARY KEY)",
    "CREATE TABLE IF NOT EXISTS dataset (
        rowid INTEGER PRIMARY KEY AUTOINCREMENT,
        ts REAL NOT NULL,
        name TEXT NOT NULL REFERENCES dataset_names(name),
        data BLOB NOT NULL,
        UNIQUE(name, ts)
    )",
    "CREATE TABLE IF NOT EXISTS parameters (name TEXT PRIMARY KEY, value REAL NOT NULL)",
];

/// Tables added at schema v4 (metadata).
const V4_TABLES: &[&str] =
    &["CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT NOT NULL)"];

/// Tables added at schema v4.1 (live-plot figure registry).
const V4_1_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS figure (
        fignum INTEGER PRIMARY KEY,
        maxvalues INTEGER NOT NULL,
        yscale TEXT NOT NULL,
        ymin REAL,
        ymax REAL
    )",
    "CREATE TABLE IF NOT EXISTS figure_variable (
        varnum INTEGER PRIMARY KEY AUTOINCREMENT,
        fignum INTEGER NOT NULL REFERENCES figure(fignum),
        name TEXT NOT NULL
    )",
];

pub fn all_table_names() -> Vec<&'static str> {
    vec![
        "log_names",
        "log",
        "dataset_names",
        "dataset",
        "parameters",
        "metadata",
        "figure",
        "figure_variable",
    ]
}

/// Create every table for the latest schema and stamp `_database_version`
/// and `_session_creation_timestamp`. Used only when opening a brand new
/// session (no existing on-disk file, or an in-memory-only session).
pub fn create_latest(conn: &Connection, creation_timestamp: f64) -> Result<()> {
    for stmt in BASE_TABLES.iter().chain(V4_TABLES).chain(V4_1_TABLES) {
        conn.execute(stmt, [])?;
    }
    conn.execute(
        "INSERT INTO parameters (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        rusqlite::params![DATABASE_VERSION_KEY, LATEST_VERSION],
    )?;
    conn.execute(
        "INSERT INTO parameters (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        rusqlite::params![SESSION_CREATION_TIMESTAMP_KEY, creation_timestamp],
    )?;
    Ok(())
}

/// Ensure that the tables for `version` exist (used when the caller asked
/// for `CreateIfMissing` against a path with no file yet, but also wants to
/// pin a version for tests). Production code paths always call
/// [`create_latest`]; this exists for store-internal migration tests.
#[cfg(test)]
pub fn create_for_version(conn: &Connection, version: f64) -> Result<()> {
    for stmt in BASE_TABLES {
        conn.execute(stmt, [])?;
    }
    if version >= 4.0 {
        for stmt in V4_TABLES {
            conn.execute(stmt, [])?;
        }
    }
    if version >= 4.1 {
        for stmt in V4_1_TABLES {
            conn.execute(stmt, [])?;
        }
    }
    conn.execute(
        "INSERT INTO parameters (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        rusqlite::params![DATABASE_VERSION_KEY, version],
    )?;
    Ok(())
}

/// Read `_database_version` from an already-open connection. Returns
/// `None` if the `parameters` table doesn't even exist yet (brand new
/// database) or the key is absent (legacy schema v1, which predates the
/// reserved-parameter convention itself).
pub fn read_version(conn: &Connection) -> Option<f64> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='parameters'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false);
    if !table_exists {
        return None;
    }
    conn.query_row(
        "SELECT value FROM parameters WHERE name = ?1",
        [DATABASE_VERSION_KEY],
        |row| row.get::<_, f64>(0),
    )
    .ok()
}

pub fn is_known_version(version: f64) -> bool {
    matches!(version, 1.0 | 3.0 | 3.1 | 4.0 | 4.1)
}

pub fn supports_metadata(version: f64) -> bool {
    version >= 4.0
}

pub fn supports_figures(version: f64) -> bool {
    version >= 4.1
}
