//! Core measurement types for limestone.
//!
//! A node reports how many pieces it sized into each free-text size range.
//! Each (node, label, count) triple is stored as one [`RawMeasurement`]; the
//! label is mapped onto the fixed [`SizeCategory`] taxonomy only at read time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed, ordered size taxonomy every label is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeCategory {
    /// Pieces under 30 mm.
    #[serde(rename = "<30mm")]
    Under30,
    /// Pieces between 30 and 50 mm.
    #[serde(rename = "30-50mm")]
    From30To50,
    /// Pieces between 50 and 80 mm.
    #[serde(rename = "50-80mm")]
    From50To80,
    /// Pieces between 80 and 150 mm.
    #[serde(rename = "80-150mm")]
    From80To150,
    /// Pieces over 150 mm.
    #[serde(rename = ">150mm")]
    Over150,
}

impl SizeCategory {
    /// All categories in display order.
    pub const ALL: [Self; 5] = [
        Self::Under30,
        Self::From30To50,
        Self::From50To80,
        Self::From80To150,
        Self::Over150,
    ];

    /// The canonical label, as used in JSON payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Under30 => "<30mm",
            Self::From30To50 => "30-50mm",
            Self::From50To80 => "50-80mm",
            Self::From80To150 => "80-150mm",
            Self::Over150 => ">150mm",
        }
    }

    /// Chart colour used by the trend endpoint.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Under30 => "#1f77b4",
            Self::From30To50 => "#ff7f0e",
            Self::From50To80 => "#2ca02c",
            Self::From80To150 => "#d62728",
            Self::Over150 => "#9467bd",
        }
    }

    /// Position of this category in [`SizeCategory::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown size category: {s}"))
    }
}

/// One stored measurement: a count reported by a node for a size label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMeasurement {
    /// Row identifier (assigned by storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Reporting node.
    pub node: String,

    /// Node status string sent alongside the report, stored verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Free-text size range as reported, e.g. `"30-50 mm"`.
    pub size_label: String,

    /// Number of pieces counted in this range.
    pub count: u64,

    /// When the report was received.
    pub timestamp: DateTime<Utc>,
}

impl RawMeasurement {
    /// Create a measurement stamped with the given time.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        size_label: impl Into<String>,
        count: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            node: node.into(),
            status: None,
            size_label: size_label.into(),
            count,
            timestamp,
        }
    }

    /// Attach a node status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_labels_round_trip_through_from_str() {
        for category in SizeCategory::ALL {
            assert_eq!(category.as_str().parse::<SizeCategory>(), Ok(category));
        }
        assert!("<31mm".parse::<SizeCategory>().is_err());
    }

    #[test]
    fn test_category_order_matches_all() {
        let mut sorted = SizeCategory::ALL;
        sorted.sort();
        assert_eq!(sorted, SizeCategory::ALL);
        for (i, category) in SizeCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_category_serializes_as_label() {
        let json = serde_json::to_string(&SizeCategory::From80To150).unwrap();
        assert_eq!(json, "\"80-150mm\"");

        let parsed: SizeCategory = serde_json::from_str("\">150mm\"").unwrap();
        assert_eq!(parsed, SizeCategory::Over150);
    }

    #[test]
    fn test_category_as_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(SizeCategory::Under30, 3_u64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"<30mm":3}"#);
    }

    #[test]
    fn test_colors_are_distinct() {
        let colors: std::collections::HashSet<_> =
            SizeCategory::ALL.iter().map(|c| c.color()).collect();
        assert_eq!(colors.len(), 5);
    }

    #[test]
    fn test_measurement_new() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let m = RawMeasurement::new("crusher-1", "30-50mm", 12, ts).with_status("running");

        assert!(m.id.is_none());
        assert_eq!(m.node, "crusher-1");
        assert_eq!(m.status.as_deref(), Some("running"));
        assert_eq!(m.count, 12);
        assert_eq!(m.timestamp, ts);
    }

    #[test]
    fn test_measurement_serialization_skips_missing_fields() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let m = RawMeasurement::new("n", "<30mm", 1, ts);
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"status\""));
    }
}
