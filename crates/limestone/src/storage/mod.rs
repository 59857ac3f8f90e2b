//! Storage layer for limestone.
//!
//! This module provides `SQLite`-based persistent storage for raw
//! measurements and the last-update marker. Ingest and reset are
//! transactional: either every row plus the marker change applies, or none.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::measurement::RawMeasurement;

/// Metadata key holding the most recent ingest time.
const LAST_UPDATE_KEY: &str = "last_update";

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Format a timestamp the way it is stored: fixed-width RFC 3339 in UTC.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// # Errors
///
/// Returns an error if the value is not valid RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::corrupt("timestamp", value))
}

/// Summed count for one (node, label) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTotal {
    /// Reporting node.
    pub node: String,
    /// Size label exactly as reported.
    pub size_label: String,
    /// Sum of all counts for the pair.
    pub total: u64,
}

/// Measurement store backed by `SQLite`.
///
/// A `Storage` owns one connection. The server opens one per request with
/// [`Storage::connect`] and drops it when the request finishes.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// and initializes or migrates the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let storage = Self::connect(&path)?;

        // WAL lets readers proceed while an ingest transaction is open
        storage
            .conn
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&storage.conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(storage)
    }

    /// Open a connection to an already-initialized database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a single measurement without touching the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the count does not fit the store or the insert fails.
    pub fn insert(&self, measurement: &RawMeasurement) -> Result<i64> {
        insert_row(&self.conn, measurement)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write a node report: every measurement plus the last-update marker,
    /// in one transaction.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; nothing is committed in that case.
    pub fn record_report(
        &mut self,
        measurements: &[RawMeasurement],
        marker: DateTime<Utc>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        for measurement in measurements {
            insert_row(&tx, measurement)?;
        }
        set_last_update(&tx, marker)?;
        tx.commit()?;

        debug!(
            rows = measurements.len(),
            marker = %format_timestamp(marker),
            "Recorded report"
        );
        Ok(measurements.len())
    }

    /// Measurements with `since <= timestamp < until`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn measurements_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawMeasurement>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, node, status, size_label, count, timestamp
            FROM measurements WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY timestamp ASC, id ASC
            ",
        )?;

        let rows = stmt
            .query_map(
                params![format_timestamp(since), format_timestamp(until)],
                Self::row_to_measurement,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Measurements with `timestamp >= since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn measurements_since(&self, since: DateTime<Utc>) -> Result<Vec<RawMeasurement>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, node, status, size_label, count, timestamp
            FROM measurements WHERE timestamp >= ?1
            ORDER BY timestamp ASC, id ASC
            ",
        )?;

        let rows = stmt
            .query_map([format_timestamp(since)], Self::row_to_measurement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Summed counts grouped by node and raw label, ordered by node.
    ///
    /// Sums saturate at `u64::MAX`; `SQLite`'s `SUM` would fail on overflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn label_totals_by_node(&self) -> Result<Vec<LabelTotal>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT node, size_label, count
            FROM measurements ORDER BY node, size_label
            ",
        )?;
        let mut rows = stmt.query([])?;

        let mut totals: Vec<LabelTotal> = Vec::new();
        while let Some(row) = rows.next()? {
            let node: String = row.get(0)?;
            let size_label: String = row.get(1)?;
            let count = read_count(row, 2)?;

            match totals.last_mut() {
                Some(last) if last.node == node && last.size_label == size_label => {
                    last.total = last.total.saturating_add(count);
                }
                _ => totals.push(LabelTotal {
                    node,
                    size_label,
                    total: count,
                }),
            }
        }
        Ok(totals)
    }

    /// The last-update marker, if any ingest happened since the last reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the marker is corrupt.
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [LAST_UPDATE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        value.as_deref().map(parse_timestamp).transpose()
    }

    /// Run several reads against one snapshot of the database.
    ///
    /// The reads share a deferred transaction, so a concurrent ingest is
    /// either wholly visible to all of them or to none.
    ///
    /// # Errors
    ///
    /// Returns the first error from `read`, or an error if the transaction
    /// cannot be opened.
    pub fn snapshot<T>(&self, read: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = read(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Delete every measurement and the marker, in one transaction.
    ///
    /// Returns the number of measurements deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is deleted in that case.
    pub fn reset(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM measurements", [])?;
        tx.execute("DELETE FROM metadata WHERE key = ?1", [LAST_UPDATE_KEY])?;
        tx.commit()?;

        info!(deleted, "Cleared all measurements");
        Ok(deleted)
    }

    /// Count stored measurements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_measurements = self.count()?;

        let nodes: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT node) FROM measurements",
            [],
            |row| row.get(0),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM measurements",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_measurements,
            nodes,
            oldest_measurement: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest_measurement: newest.as_deref().map(parse_timestamp).transpose()?,
            last_update: self.last_update()?,
            db_size_bytes,
        })
    }

    fn row_to_measurement(row: &rusqlite::Row) -> rusqlite::Result<RawMeasurement> {
        let timestamp_str: String = row.get(5)?;
        let timestamp = parse_timestamp(&timestamp_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(RawMeasurement {
            id: Some(row.get(0)?),
            node: row.get(1)?,
            status: row.get(2)?,
            size_label: row.get(3)?,
            count: read_count(row, 4)?,
            timestamp,
        })
    }
}

fn insert_row(conn: &Connection, measurement: &RawMeasurement) -> Result<()> {
    let count = i64::try_from(measurement.count).map_err(|_| {
        Error::internal(format!("count {} exceeds storable range", measurement.count))
    })?;

    conn.execute(
        r"
        INSERT INTO measurements (node, status, size_label, count, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            measurement.node,
            measurement.status,
            measurement.size_label,
            count,
            format_timestamp(measurement.timestamp),
        ],
    )?;
    Ok(())
}

fn set_last_update(conn: &Connection, marker: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (LAST_UPDATE_KEY, format_timestamp(marker)),
    )?;
    Ok(())
}

fn read_count(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of measurement rows stored.
    pub total_measurements: i64,
    /// Number of distinct reporting nodes.
    pub nodes: i64,
    /// Timestamp of the oldest measurement.
    pub oldest_measurement: Option<DateTime<Utc>>,
    /// Timestamp of the newest measurement.
    pub newest_measurement: Option<DateTime<Utc>>,
    /// The last-update marker.
    pub last_update: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    fn measurement(node: &str, label: &str, count: u64, ts: DateTime<Utc>) -> RawMeasurement {
        RawMeasurement::new(node, label, count, ts)
    }

    #[test]
    fn test_open_in_memory() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width_and_sortable() {
        let a = format_timestamp(at(9, 5, 0));
        let b = format_timestamp(at(10, 0, 0) + TimeDelta::microseconds(1));
        assert_eq!(a, "2026-03-02T09:05:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_timestamp(&a).unwrap(), at(9, 5, 0));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("not a time").unwrap_err();
        assert!(matches!(err, Error::CorruptValue { .. }));
    }

    #[test]
    fn test_insert_and_read_back() {
        let storage = create_test_storage();
        let m = measurement("crusher-1", "30-50mm", 7, at(8, 0, 0)).with_status("running");

        let id = storage.insert(&m).unwrap();
        let rows = storage.measurements_since(at(0, 0, 0)).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, Some(id));
        assert_eq!(rows[0].node, "crusher-1");
        assert_eq!(rows[0].status.as_deref(), Some("running"));
        assert_eq!(rows[0].size_label, "30-50mm");
        assert_eq!(rows[0].count, 7);
        assert_eq!(rows[0].timestamp, at(8, 0, 0));
    }

    #[test]
    fn test_insert_rejects_oversized_count() {
        let storage = create_test_storage();
        let m = measurement("n", "<30mm", u64::MAX, at(8, 0, 0));
        assert!(storage.insert(&m).is_err());
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_record_report_writes_rows_and_marker() {
        let mut storage = create_test_storage();
        let rows = vec![
            measurement("n1", "<30mm", 3, at(8, 0, 0)),
            measurement("n1", "30-50mm", 4, at(8, 0, 0)),
        ];

        assert_eq!(storage.record_report(&rows, at(8, 0, 0)).unwrap(), 2);
        assert_eq!(storage.count().unwrap(), 2);
        assert_eq!(storage.last_update().unwrap(), Some(at(8, 0, 0)));
    }

    #[test]
    fn test_record_report_is_all_or_nothing() {
        let mut storage = create_test_storage();
        let rows = vec![
            measurement("n1", "<30mm", 3, at(8, 0, 0)),
            measurement("n1", "30-50mm", u64::MAX, at(8, 0, 0)),
        ];

        assert!(storage.record_report(&rows, at(8, 0, 0)).is_err());
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.last_update().unwrap(), None);
    }

    #[test]
    fn test_record_empty_report_moves_marker() {
        let mut storage = create_test_storage();
        storage.record_report(&[], at(9, 0, 0)).unwrap();
        assert_eq!(storage.last_update().unwrap(), Some(at(9, 0, 0)));

        storage.record_report(&[], at(10, 0, 0)).unwrap();
        assert_eq!(storage.last_update().unwrap(), Some(at(10, 0, 0)));
    }

    #[test]
    fn test_measurements_between_is_half_open() {
        let storage = create_test_storage();
        storage.insert(&measurement("n", "<30mm", 1, at(7, 59, 59))).unwrap();
        storage.insert(&measurement("n", "<30mm", 2, at(8, 0, 0))).unwrap();
        storage.insert(&measurement("n", "<30mm", 3, at(8, 30, 0))).unwrap();
        storage.insert(&measurement("n", "<30mm", 4, at(9, 0, 0))).unwrap();

        let rows = storage.measurements_between(at(8, 0, 0), at(9, 0, 0)).unwrap();
        let counts: Vec<u64> = rows.iter().map(|m| m.count).collect();
        assert_eq!(counts, vec![2, 3]);
    }

    #[test]
    fn test_measurements_are_ordered_by_time() {
        let storage = create_test_storage();
        storage.insert(&measurement("n", "<30mm", 2, at(9, 0, 0))).unwrap();
        storage.insert(&measurement("n", "<30mm", 1, at(8, 0, 0))).unwrap();

        let rows = storage.measurements_since(at(0, 0, 0)).unwrap();
        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[1].count, 2);
    }

    #[test]
    fn test_label_totals_by_node() {
        let storage = create_test_storage();
        storage.insert(&measurement("b", "<30mm", 1, at(8, 0, 0))).unwrap();
        storage.insert(&measurement("a", "<30mm", 2, at(8, 0, 0))).unwrap();
        storage.insert(&measurement("a", "<30mm", 5, at(9, 0, 0))).unwrap();
        storage.insert(&measurement("a", "fines", 9, at(9, 0, 0))).unwrap();

        let totals = storage.label_totals_by_node().unwrap();
        assert_eq!(
            totals,
            vec![
                LabelTotal {
                    node: "a".into(),
                    size_label: "<30mm".into(),
                    total: 7
                },
                LabelTotal {
                    node: "a".into(),
                    size_label: "fines".into(),
                    total: 9
                },
                LabelTotal {
                    node: "b".into(),
                    size_label: "<30mm".into(),
                    total: 1
                },
            ]
        );
    }

    #[test]
    fn test_label_totals_saturate_instead_of_failing() {
        let half = u64::try_from(i64::MAX / 2).unwrap() + 1;
        let mut storage = create_test_storage();
        storage
            .record_report(&[measurement("a", "<30mm", half, at(8, 0, 0))], at(8, 0, 0))
            .unwrap();
        storage
            .record_report(&[measurement("a", "<30mm", half, at(9, 0, 0))], at(9, 0, 0))
            .unwrap();

        let totals = storage.label_totals_by_node().unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].total, half * 2);

        storage
            .record_report(&[measurement("a", "<30mm", half, at(10, 0, 0))], at(10, 0, 0))
            .unwrap();
        storage
            .record_report(&[measurement("a", "<30mm", half, at(11, 0, 0))], at(11, 0, 0))
            .unwrap();
        assert_eq!(storage.label_totals_by_node().unwrap()[0].total, u64::MAX);
    }

    #[test]
    fn test_snapshot_does_not_see_concurrent_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("limestone.db");
        let reader = Storage::open(&db_path).unwrap();
        let mut writer = Storage::connect(&db_path).unwrap();
        writer
            .record_report(&[measurement("n", "<30mm", 1, at(8, 0, 0))], at(8, 0, 0))
            .unwrap();

        let (marker, rows) = reader
            .snapshot(|storage| {
                let marker = storage.last_update()?;
                writer.record_report(&[measurement("n", "<30mm", 1, at(9, 0, 0))], at(9, 0, 0))?;
                Ok((marker, storage.count()?))
            })
            .unwrap();

        assert_eq!(marker, Some(at(8, 0, 0)));
        assert_eq!(rows, 1);
        assert_eq!(reader.count().unwrap(), 2);
        assert_eq!(reader.last_update().unwrap(), Some(at(9, 0, 0)));
    }

    #[test]
    fn test_reset_clears_rows_and_marker() {
        let mut storage = create_test_storage();
        storage
            .record_report(&[measurement("n", "<30mm", 1, at(8, 0, 0))], at(8, 0, 0))
            .unwrap();

        assert_eq!(storage.reset().unwrap(), 1);
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.last_update().unwrap(), None);
        assert!(storage.label_totals_by_node().unwrap().is_empty());
    }

    #[test]
    fn test_reset_keeps_schema_version() {
        let mut storage = create_test_storage();
        storage.reset().unwrap();
        // Reopening the schema must not re-run migrations or fail
        migrations::initialize_schema(&storage.conn).unwrap();
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.total_measurements, 0);
        assert_eq!(stats.nodes, 0);
        assert!(stats.oldest_measurement.is_none());
        assert!(stats.newest_measurement.is_none());
        assert!(stats.last_update.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let mut storage = create_test_storage();
        storage
            .record_report(
                &[
                    measurement("n1", "<30mm", 1, at(8, 0, 0)),
                    measurement("n2", "<30mm", 1, at(9, 0, 0)),
                ],
                at(9, 0, 0),
            )
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_measurements, 2);
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.oldest_measurement, Some(at(8, 0, 0)));
        assert_eq!(stats.newest_measurement, Some(at(9, 0, 0)));
        assert_eq!(stats.last_update, Some(at(9, 0, 0)));
    }

    #[test]
    fn test_open_file_based_and_connect() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("limestone.db");

        {
            let storage = Storage::open(&db_path).unwrap();
            storage.insert(&measurement("n", "<30mm", 1, at(8, 0, 0))).unwrap();
            assert_eq!(storage.path(), db_path);
        }

        let storage = Storage::connect(&db_path).unwrap();
        assert_eq!(storage.count().unwrap(), 1);
        assert!(storage.stats().unwrap().db_size_bytes > 0);
    }
}
