//! Scalar time-series logging: `add_entry`/`logged_last_values` land here.

use rusqlite::OptionalExtension;

use crate::error::{Result, StoreError};
use crate::Store;

/// One sample of a named scalar series.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSample {
    pub ts: f64,
    pub value: f64,
}

impl Store {
    /// Insert one `(name, value)` sample at `ts`.
    ///
    /// `log` has a `UNIQUE(name, ts)` constraint: two samples of the same
    /// name can't share a timestamp. Under a fast writer (a camera-framerate
    /// poll loop, a busy sweep), repeated calls can legitimately land on the
    /// same floating-point `ts`. Rather than reject the second sample, we
    /// nudge it forward by a microsecond and retry, repeating until we find
    /// a free slot. This preserves insertion order (nudged timestamps sort
    /// after the sample they collided with) without losing samples.
    pub fn insert_log(&self, name: &str, ts: f64, value: f64) -> Result<f64> {
        self.check_writable()?;
        let conn = self.conn();
        let guard = conn.lock();

        guard.execute(
            "INSERT INTO log_names (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            [name],
        )?;

        let mut ts = ts;
        loop {
            let inserted = guard.execute(
                "INSERT INTO log (ts, name, value) VALUES (?1, ?2, ?3)",
                rusqlite::params![ts, name, value],
            );
            match inserted {
                Ok(_) => return Ok(ts),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ts += 1e-6;
                }
                Err(e) => return Err(StoreError::Sqlite(e)),
            }
        }
    }

    /// All distinct log series names, in no particular order.
    pub fn log_names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare("SELECT name FROM log_names ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// All samples for `name`, ordered by timestamp ascending.
    pub fn query_log(&self, name: &str) -> Result<Vec<LogSample>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt =
            guard.prepare("SELECT ts, value FROM log WHERE name = ?1 ORDER BY ts ASC")?;
        let rows = stmt
            .query_map([name], |row| {
                Ok(LogSample {
                    ts: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Samples for `name` with `ts > since`, ordered by timestamp ascending.
    /// Backs the HTTP surface's incremental polling endpoint.
    pub fn query_log_since(&self, name: &str, since: f64) -> Result<Vec<LogSample>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare(
            "SELECT ts, value FROM log WHERE name = ?1 AND ts > ?2 ORDER BY ts ASC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![name, since], |row| {
                Ok(LogSample {
                    ts: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The earliest sample recorded for `name`, if any.
    pub fn first_log(&self, name: &str) -> Result<Option<LogSample>> {
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT ts, value FROM log WHERE name = ?1 ORDER BY ts ASC LIMIT 1",
                [name],
                |row| {
                    Ok(LogSample {
                        ts: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// The most recent sample recorded for `name`, if any.
    pub fn last_log(&self, name: &str) -> Result<Option<LogSample>> {
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT ts, value FROM log WHERE name = ?1 ORDER BY ts DESC LIMIT 1",
                [name],
                |row| {
                    Ok(LogSample {
                        ts: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// The most recent sample across every series, keyed by name. Backs
    /// `logged_last_values` / the HTTP `/api/logged_last_values` route.
    pub fn logged_last_values(&self) -> Result<Vec<(String, LogSample)>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare(
            "SELECT l.name, l.ts, l.value
             FROM log l
             INNER JOIN (
                 SELECT name, MAX(ts) AS ts FROM log GROUP BY name
             ) latest ON latest.name = l.name AND latest.ts = l.ts
             ORDER BY l.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    LogSample {
                        ts: row.get(1)?,
                        value: row.get(2)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::{OpenMode, Store};

    #[test]
    fn insert_and_query_round_trips() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.insert_log("temperature", 1.0, 20.0).unwrap();
        store.insert_log("temperature", 2.0, 21.5).unwrap();
        let samples = store.query_log("temperature").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 20.0);
        assert_eq!(samples[1].value, 21.5);
    }

    #[test]
    fn colliding_timestamps_are_nudged_forward_and_kept_in_order() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        let t1 = store.insert_log("fast", 5.0, 1.0).unwrap();
        let t2 = store.insert_log("fast", 5.0, 2.0).unwrap();
        assert_eq!(t1, 5.0);
        assert!(t2 > t1);
        let samples = store.query_log("fast").unwrap();
        assert_eq!(samples.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn last_values_reports_most_recent_per_series() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.insert_log("a", 1.0, 10.0).unwrap();
        store.insert_log("a", 2.0, 11.0).unwrap();
        store.insert_log("b", 1.0, 99.0).unwrap();
        let last = store.logged_last_values().unwrap();
        assert_eq!(last.len(), 2);
        let a = last.iter().find(|(n, _)| n == "a").unwrap();
        assert_eq!(a.1.value, 11.0);
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.db");
        {
            let _s = Store::open(Some(&path), OpenMode::CreateIfMissing, false).unwrap();
        }
        let store = Store::open(Some(&path), OpenMode::ReadOnly, false).unwrap();
        let err = store.insert_log("x", 1.0, 1.0).unwrap_err();
        assert!(matches!(err, crate::StoreError::ReadOnly));
    }
}
