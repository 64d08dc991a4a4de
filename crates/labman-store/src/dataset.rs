//! Block/dataset capture: opaque CBOR-encoded blobs addressed by name and
//! timestamp, for payloads that don't fit the scalar log model (camera
//! frames, spectra, anything array-shaped).

use rusqlite::OptionalExtension;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::Store;

/// One recorded dataset row, still CBOR-encoded.
#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub ts: f64,
    pub data: Vec<u8>,
}

impl DatasetRow {
    /// Decode the payload as `T`. Datasets are heterogeneous by name only
    /// by convention — the caller is expected to know what type a given
    /// dataset name holds.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_cbor::from_slice(&self.data)?)
    }
}

impl Store {
    /// Append one entry to dataset `name` at `ts`, CBOR-encoding `value`.
    ///
    /// Unlike `log`, repeated names with the same timestamp are not
    /// deduplicated or nudged: datasets are append-only, and a caller that
    /// wants distinguishable entries supplies distinguishable timestamps.
    /// Matches the resolved policy of never silently overwriting a prior
    /// dataset entry by name.
    pub fn insert_dataset<T: Serialize>(&self, name: &str, ts: f64, value: &T) -> Result<()> {
        self.check_writable()?;
        let data = serde_cbor::to_vec(value)?;
        let conn = self.conn();
        let guard = conn.lock();
        guard.execute(
            "INSERT INTO dataset_names (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            [name],
        )?;
        let mut ts = ts;
        loop {
            let inserted = guard.execute(
                "INSERT INTO dataset (ts, name, data) VALUES (?1, ?2, ?3)",
                rusqlite::params![ts, name, data],
            );
            match inserted {
                Ok(_) => return Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ts += 1e-6;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn dataset_names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare("SELECT name FROM dataset_names ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Every recorded timestamp for dataset `name`, ascending.
    pub fn dataset_timestamps(&self, name: &str) -> Result<Vec<f64>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt =
            guard.prepare("SELECT ts FROM dataset WHERE name = ?1 ORDER BY ts ASC")?;
        let rows = stmt
            .query_map([name], |row| row.get::<_, f64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All rows for dataset `name`, ordered by timestamp ascending. Eager
    /// rather than a lazy cursor: datasets are expected to be modest in row
    /// count (camera frames go through the video pipeline, not here).
    pub fn query_dataset(&self, name: &str) -> Result<Vec<DatasetRow>> {
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt =
            guard.prepare("SELECT ts, data FROM dataset WHERE name = ?1 ORDER BY ts ASC")?;
        let rows = stmt
            .query_map([name], |row| {
                Ok(DatasetRow {
                    ts: row.get(0)?,
                    data: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The `index`-th recorded entry (0-based, insertion/timestamp order)
    /// for dataset `name`.
    pub fn dataset_by_index(&self, name: &str, index: usize) -> Result<Option<DatasetRow>> {
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT ts, data FROM dataset WHERE name = ?1 ORDER BY ts ASC LIMIT 1 OFFSET ?2",
                rusqlite::params![name, index as i64],
                |row| {
                    Ok(DatasetRow {
                        ts: row.get(0)?,
                        data: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// The entry for dataset `name` recorded at exactly `ts`.
    pub fn dataset_by_timestamp(&self, name: &str, ts: f64) -> Result<Option<DatasetRow>> {
        let conn = self.conn();
        let guard = conn.lock();
        guard
            .query_row(
                "SELECT ts, data FROM dataset WHERE name = ?1 AND ts = ?2",
                rusqlite::params![name, ts],
                |row| {
                    Ok(DatasetRow {
                        ts: row.get(0)?,
                        data: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::{OpenMode, Store};

    #[test]
    fn round_trips_structured_payloads() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.insert_dataset("frame", 1.0, &vec![1u8, 2, 3]).unwrap();
        store.insert_dataset("frame", 2.0, &vec![4u8, 5, 6]).unwrap();
        let rows = store.query_dataset("frame").unwrap();
        assert_eq!(rows.len(), 2);
        let decoded: Vec<u8> = rows[0].decode().unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn repeated_name_appends_rather_than_overwrites() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.insert_dataset("d", 1.0, &1u32).unwrap();
        store.insert_dataset("d", 1.0, &2u32).unwrap();
        let rows = store.query_dataset("d").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn by_index_and_by_timestamp_agree() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store.insert_dataset("d", 10.0, &"a").unwrap();
        store.insert_dataset("d", 20.0, &"b").unwrap();
        let by_idx = store.dataset_by_index("d", 1).unwrap().unwrap();
        let by_ts = store.dataset_by_timestamp("d", by_idx.ts).unwrap().unwrap();
        assert_eq!(by_idx.data, by_ts.data);
    }
}
