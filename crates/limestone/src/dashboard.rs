//! Dashboard reports built from stored measurements.
//!
//! Each function here reads what it needs from one [`Storage`] snapshot and
//! returns a serializable report. They are synchronous; the HTTP layer runs
//! them on the blocking pool.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{aggregate_daily, aggregate_minutes, node_totals, MinuteAggregate};
use crate::bucket::{DailyWindow, MinuteWindow};
use crate::config::Config;
use crate::error::Result;
use crate::measurement::{RawMeasurement, SizeCategory};
use crate::snapshot::TrendCache;
use crate::storage::Storage;

/// Window parameters for the reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSettings {
    /// Timezone for daily buckets.
    pub timezone: Tz,
    /// Number of days in the history view.
    pub history_days: u32,
    /// Lookback of the trend view.
    pub trend_lookback: TimeDelta,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            history_days: 7,
            trend_lookback: TimeDelta::hours(24),
        }
    }
}

impl ReportSettings {
    /// Settings from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured timezone is unknown.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            timezone: config.timezone()?,
            history_days: config.dashboard.history_days,
            trend_lookback: config.trend_lookback(),
        })
    }
}

/// A report posted by a node to `/update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Reporting node.
    pub node: String,
    /// Node status, stored verbatim.
    #[serde(default)]
    pub status: Option<String>,
    /// Counts per free-text size label.
    #[serde(default)]
    pub rock_stats: BTreeMap<String, u64>,
}

impl NodeReport {
    /// One measurement per label, all stamped `received_at`.
    #[must_use]
    pub fn measurements(&self, received_at: DateTime<Utc>) -> Vec<RawMeasurement> {
        self.rock_stats
            .iter()
            .map(|(label, count)| RawMeasurement {
                id: None,
                node: self.node.clone(),
                status: self.status.clone(),
                size_label: label.clone(),
                count: *count,
                timestamp: received_at,
            })
            .collect()
    }
}

/// Store a node report stamped `received_at` and move the last-update marker
/// to one storage tick after it.
///
/// The trend window ends before the marker, so the offset keeps the newest
/// report inside it.
///
/// # Errors
///
/// Returns an error if the write fails; nothing is stored in that case.
pub fn ingest(
    storage: &mut Storage,
    report: &NodeReport,
    received_at: DateTime<Utc>,
) -> Result<usize> {
    storage.record_report(&report.measurements(received_at), marker_after(received_at))
}

/// The marker written for a report received at `received_at`.
#[must_use]
pub fn marker_after(received_at: DateTime<Utc>) -> DateTime<Utc> {
    received_at + TimeDelta::microseconds(1)
}

/// `/dashboard-data` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    /// Classified all-time totals per node.
    pub totals: BTreeMap<String, BTreeMap<SizeCategory, u64>>,
    /// The last-update marker.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Build the per-node totals view.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn dashboard_data(storage: &Storage) -> Result<DashboardData> {
    storage.snapshot(|storage| {
        Ok(DashboardData {
            totals: node_totals(&storage.label_totals_by_node()?),
            last_updated: storage.last_update()?,
        })
    })
}

/// `/api/history` body: one entry per day, plus a percentage array per
/// category keyed by its label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    /// Dates as `dd/mm/yy`, oldest first.
    pub dates: Vec<String>,
    /// The last-update marker.
    pub last_updated: Option<DateTime<Utc>>,
    /// Percentages per category, aligned with `dates`.
    #[serde(flatten)]
    pub series: BTreeMap<SizeCategory, Vec<f64>>,
}

/// Build the daily history ending at the local date of `now`.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn history(
    storage: &Storage,
    settings: &ReportSettings,
    now: DateTime<Utc>,
) -> Result<HistoryReport> {
    let window = DailyWindow::for_now(now, settings.history_days, settings.timezone);
    let (rows, last_updated) = storage.snapshot(|storage| {
        Ok((
            storage.measurements_since(window.start_instant())?,
            storage.last_update()?,
        ))
    })?;
    let aggregate = aggregate_daily(&window, &rows);

    debug!(
        rows = rows.len(),
        first = %window.first(),
        timezone = %settings.timezone,
        "Built history"
    );

    Ok(HistoryReport {
        dates: aggregate.date_labels(),
        last_updated,
        series: aggregate.percentage_series(),
    })
}

/// One chart line of the trend view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendDataset {
    /// Category this line shows.
    pub label: SizeCategory,
    /// Percentages aligned with the payload timestamps.
    pub values: Vec<f64>,
    /// Chart colour.
    pub color: &'static str,
}

/// The hashed part of the trend view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPayload {
    /// Minute buckets as RFC 3339 UTC, ascending.
    pub timestamps: Vec<String>,
    /// One dataset per category, in category order.
    pub datasets: Vec<TrendDataset>,
}

impl TrendPayload {
    /// Build the payload from minute totals.
    #[must_use]
    pub fn from_aggregate(aggregate: &MinuteAggregate) -> Self {
        let mut series = aggregate.percentage_series();
        Self {
            timestamps: aggregate.keys().map(|minute| minute.to_rfc3339()).collect(),
            datasets: SizeCategory::ALL
                .into_iter()
                .map(|category| TrendDataset {
                    label: category,
                    values: series.remove(&category).unwrap_or_default(),
                    color: category.color(),
                })
                .collect(),
        }
    }
}

/// `/api/daily-trend` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    /// Timestamps and datasets.
    #[serde(flatten)]
    pub payload: TrendPayload,
    /// Window end at the time the payload last changed.
    pub last_updated: DateTime<Utc>,
    /// Content hash of the payload.
    pub data_hash: String,
}

/// Build the per-minute trend ending at the marker (or `now` without one),
/// and run it through the change-detection cache.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn daily_trend(
    storage: &Storage,
    settings: &ReportSettings,
    cache: &TrendCache,
    now: DateTime<Utc>,
) -> Result<TrendReport> {
    let (end, window, rows) = storage.snapshot(|storage| {
        let end = storage.last_update()?.unwrap_or(now);
        let window = MinuteWindow::ending(end, settings.trend_lookback);
        let rows = storage.measurements_between(window.start(), window.end())?;
        Ok((end, window, rows))
    })?;
    let payload = TrendPayload::from_aggregate(&aggregate_minutes(&window, &rows));
    let observation = cache.observe(&payload, end)?;

    debug!(
        rows = rows.len(),
        buckets = payload.timestamps.len(),
        changed = observation.changed,
        "Built trend"
    );

    Ok(TrendReport {
        payload,
        last_updated: observation.last_changed,
        data_hash: observation.hash,
    })
}
