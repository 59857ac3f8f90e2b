//! `SQLite` schema definitions for limestone.
//!
//! This module contains the SQL statements for creating the measurement store.

/// SQL statement to create the measurements table.
///
/// `timestamp` holds fixed-width RFC 3339 UTC text, so lexical order is
/// chronological order.
pub const CREATE_MEASUREMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node TEXT NOT NULL,
    status TEXT,
    size_label TEXT NOT NULL,
    count INTEGER NOT NULL CHECK (count >= 0),
    timestamp TEXT NOT NULL
)
";

/// SQL statement to create an index on timestamp for window queries.
pub const CREATE_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_measurements_timestamp ON measurements(timestamp)
";

/// SQL statement to create an index on node for per-node totals.
pub const CREATE_NODE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_measurements_node ON measurements(node, size_label)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_MEASUREMENTS_TABLE,
    CREATE_TIMESTAMP_INDEX,
    CREATE_NODE_INDEX,
    CREATE_METADATA_TABLE,
];
