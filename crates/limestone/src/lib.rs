//! `limestone` - Sizing-measurement dashboard for distributed rock-crushing nodes
//!
//! Nodes post counts per free-text size label. This library stores them,
//! classifies each label into a fixed size taxonomy, buckets measurements by
//! local calendar day or UTC minute, and serves percentage views over HTTP.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aggregate;
pub mod bucket;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod server;
pub mod snapshot;
pub mod storage;

pub use classify::classify;
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use measurement::{RawMeasurement, SizeCategory};
pub use snapshot::TrendCache;
pub use storage::{Storage, StorageStats};
