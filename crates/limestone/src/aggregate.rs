//! Aggregation of raw measurements into per-bucket category totals.
//!
//! Rows are classified with [`crate::classify::classify`], assigned a bucket by
//! a [`Bucketer`], and summed into one [`CategoryTotals`] per bucket. Rows
//! whose label is unclassifiable or whose timestamp falls outside the window
//! are dropped. Percentages are derived per bucket and rounded to two
//! decimals.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::bucket::{Bucketer, DailyWindow, MinuteWindow};
use crate::classify::classify;
use crate::measurement::{RawMeasurement, SizeCategory};
use crate::storage::LabelTotal;

/// Format used for daily bucket labels.
pub const DATE_LABEL_FORMAT: &str = "%d/%m/%y";

/// Counts per category, indexed by [`SizeCategory::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTotals([u64; 5]);

impl CategoryTotals {
    /// Add `count` to `category`, saturating.
    pub fn add(&mut self, category: SizeCategory, count: u64) {
        let slot = &mut self.0[category.index()];
        *slot = slot.saturating_add(count);
    }

    /// Count for one category.
    #[must_use]
    pub fn get(&self, category: SizeCategory) -> u64 {
        self.0[category.index()]
    }

    /// Sum over all categories.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().fold(0, |acc, n| acc.saturating_add(*n))
    }

    /// Share of each category in percent, rounded to two decimals.
    ///
    /// All zeros when the bucket is empty.
    #[must_use]
    pub fn percentages(&self) -> [f64; 5] {
        let total = self.total();
        let mut out = [0.0; 5];
        if total == 0 {
            return out;
        }
        for category in SizeCategory::ALL {
            out[category.index()] = round2(percent(self.get(category), total));
        }
        out
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    part as f64 / total as f64 * 100.0
}

/// Round to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One (bucket, category) sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateRow<K> {
    /// Bucket key.
    pub bucket: K,
    /// Size category.
    pub category: SizeCategory,
    /// Sum of raw counts.
    pub total_count: u64,
}

/// Per-bucket totals, ascending by bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate<K: Ord> {
    buckets: BTreeMap<K, CategoryTotals>,
}

impl<K: Ord + Copy> Aggregate<K> {
    /// Sum `(bucket, label, count)` rows, seeding `seed` buckets with zeros.
    pub fn from_rows<'a>(
        seed: impl IntoIterator<Item = K>,
        rows: impl IntoIterator<Item = (K, &'a str, u64)>,
    ) -> Self {
        let mut buckets: BTreeMap<K, CategoryTotals> = seed
            .into_iter()
            .map(|key| (key, CategoryTotals::default()))
            .collect();

        for (bucket, label, count) in rows {
            if let Some(category) = classify(label) {
                buckets.entry(bucket).or_default().add(category, count);
            }
        }

        Self { buckets }
    }

    /// Sum measurements over a window. Rows outside it are dropped.
    pub fn over<'a, B>(bucketer: &B, rows: impl IntoIterator<Item = &'a RawMeasurement>) -> Self
    where
        B: Bucketer<Key = K>,
    {
        Self::from_rows(
            bucketer.seed_keys(),
            rows.into_iter().filter_map(|m| {
                bucketer
                    .bucket_of(m.timestamp)
                    .map(|key| (key, m.size_label.as_str(), m.count))
            }),
        )
    }

    /// Bucket keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.buckets.keys().copied()
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether there are no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Totals for one bucket.
    #[must_use]
    pub fn totals(&self, bucket: &K) -> Option<&CategoryTotals> {
        self.buckets.get(bucket)
    }

    /// Flattened `(bucket, category, total)` rows, every category per bucket.
    #[must_use]
    pub fn rows(&self) -> Vec<AggregateRow<K>> {
        self.buckets
            .iter()
            .flat_map(|(bucket, totals)| {
                SizeCategory::ALL.into_iter().map(|category| AggregateRow {
                    bucket: *bucket,
                    category,
                    total_count: totals.get(category),
                })
            })
            .collect()
    }

    /// Percentage series per category, aligned with [`Aggregate::keys`].
    #[must_use]
    pub fn percentage_series(&self) -> BTreeMap<SizeCategory, Vec<f64>> {
        let mut series: BTreeMap<SizeCategory, Vec<f64>> = SizeCategory::ALL
            .into_iter()
            .map(|category| (category, Vec::with_capacity(self.buckets.len())))
            .collect();

        for totals in self.buckets.values() {
            let percentages = totals.percentages();
            for (category, values) in &mut series {
                values.push(percentages[category.index()]);
            }
        }
        series
    }
}

/// Daily totals over a [`DailyWindow`]; every date is present.
pub type DailyAggregate = Aggregate<NaiveDate>;

/// Minute totals over a [`MinuteWindow`]; only minutes with data are present.
pub type MinuteAggregate = Aggregate<DateTime<Utc>>;

/// Aggregate measurements into the daily window.
pub fn aggregate_daily<'a>(
    window: &DailyWindow,
    rows: impl IntoIterator<Item = &'a RawMeasurement>,
) -> DailyAggregate {
    Aggregate::over(window, rows)
}

/// Aggregate measurements into per-minute buckets.
pub fn aggregate_minutes<'a>(
    window: &MinuteWindow,
    rows: impl IntoIterator<Item = &'a RawMeasurement>,
) -> MinuteAggregate {
    Aggregate::over(window, rows)
}

impl DailyAggregate {
    /// Date labels in `dd/mm/yy` form, aligned with the keys.
    #[must_use]
    pub fn date_labels(&self) -> Vec<String> {
        self.keys()
            .map(|date| date.format(DATE_LABEL_FORMAT).to_string())
            .collect()
    }
}

/// Per-node classified totals for the dashboard.
///
/// Every node appears, even if none of its labels classify.
#[must_use]
pub fn node_totals(
    label_totals: &[LabelTotal],
) -> BTreeMap<String, BTreeMap<SizeCategory, u64>> {
    let mut out: BTreeMap<String, BTreeMap<SizeCategory, u64>> = BTreeMap::new();
    for entry in label_totals {
        let node = out.entry(entry.node.clone()).or_default();
        if let Some(category) = classify(&entry.size_label) {
            let slot = node.entry(category).or_insert(0);
            *slot = slot.saturating_add(entry.total);
        }
    }
    out
}
