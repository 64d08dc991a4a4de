//! Single-value parameters (floats, always present) and metadata (strings,
//! schema v4+ only).

use rusqlite::OptionalExtension;

use crate::error::{Result, StoreError};
use crate::schema::{self, DATABASE_VERSION_KEY, EMAIL_LAST_SENT_KEY, SESSION_CREATION_TIMESTAMP_KEY};
use crate::Store;

fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}

impl Store {
    /// Set (or replace) a scalar parameter.
    pub fn upsert_parameter(&self, name: &str, value: f64) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn();
        let guard = conn.lock();
        guard.execute(
            "INSERT INTO parameters (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            rusqlite::params![name, value],
        )?;
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> Result<Option<f64>> {
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT value FROM parameters WHERE name = ?1",
                [name],
                |row| row.get::<_, f64>(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Every non-reserved parameter as `(name, value)` pairs. The session
    /// creation timestamp and schema version are internal bookkeeping, not
    /// user data, and are filtered out here.
    pub fn all_parameters(&self) -> Result<Vec<(String, f64)>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare("SELECT name, value FROM parameters ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter(|(name, _)| !is_reserved(name)).collect())
    }

    /// The timestamp of the last successful email report, or `None` if one
    /// has never been sent. Stored as an ordinary (reserved-named)
    /// parameter so it survives on pre-v4 schemas too.
    pub fn email_last_sent(&self) -> Result<Option<f64>> {
        self.get_parameter(EMAIL_LAST_SENT_KEY)
    }

    pub fn set_email_last_sent(&self, ts: f64) -> Result<()> {
        self.upsert_parameter(EMAIL_LAST_SENT_KEY, ts)
    }

    pub fn session_creation_timestamp(&self) -> Result<Option<f64>> {
        self.get_parameter(SESSION_CREATION_TIMESTAMP_KEY)
    }

    pub fn database_version_parameter(&self) -> Result<Option<f64>> {
        self.get_parameter(DATABASE_VERSION_KEY)
    }

    /// Set (or replace) a string metadata value. Requires schema v4+.
    pub fn upsert_metadata(&self, name: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let version = self.version_checked();
        if !schema::supports_metadata(version) {
            return Err(StoreError::MetadataUnsupported { version });
        }
        let conn = self.conn();
        let guard = conn.lock();
        guard.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            rusqlite::params![name, value],
        )?;
        Ok(())
    }

    /// Looks up one metadata value. A pre-v4 schema simply has none, so
    /// this reports absence rather than erroring.
    pub fn get_metadata(&self, name: &str) -> Result<Option<String>> {
        let version = self.version_checked();
        if !schema::supports_metadata(version) {
            return Ok(None);
        }
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                [name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Every metadata `(name, value)` pair. A pre-v4 schema has no
    /// metadata table at all, so this degrades to empty rather than
    /// erroring.
    pub fn all_metadatas(&self) -> Result<Vec<(String, String)>> {
        let version = self.version_checked();
        if !schema::supports_metadata(version) {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare("SELECT name, value FROM metadata ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::{OpenMode, Store, StoreError};

    #[test]
    fn parameter_upsert_is_idempotent_under_repeat() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.upsert_parameter("gain", 1.5).unwrap();
        store.upsert_parameter("gain", 1.5).unwrap();
        store.upsert_parameter("gain", 2.0).unwrap();
        assert_eq!(store.get_parameter("gain").unwrap(), Some(2.0));
    }

    #[test]
    fn reserved_parameters_are_hidden_from_all_parameters() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.upsert_parameter("visible", 1.0).unwrap();
        let all = store.all_parameters().unwrap();
        assert!(all.iter().any(|(n, _)| n == "visible"));
        assert!(!all.iter().any(|(n, _)| n.starts_with('_')));
    }

    #[test]
    fn email_last_sent_round_trips() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        assert_eq!(store.email_last_sent().unwrap(), None);
        store.set_email_last_sent(123.0).unwrap();
        assert_eq!(store.email_last_sent().unwrap(), Some(123.0));
    }

    #[test]
    fn metadata_requires_v4_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            crate::schema::create_for_version(&conn, 3.1).unwrap();
        }
        let store = Store::open(Some(&path), OpenMode::ReadWrite, false).unwrap();
        let err = store.upsert_metadata("note", "hi").unwrap_err();
        assert!(matches!(err, StoreError::MetadataUnsupported { version } if version == 3.1));
    }
}
