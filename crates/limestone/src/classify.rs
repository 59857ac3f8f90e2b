//! Size-range label classification.
//!
//! Nodes report free-text labels such as `"30 - 50mm"`, `"< 30 mm"` or
//! `"150-300"`. [`classify`] maps them onto [`SizeCategory`]:
//!
//! - a single bound is accepted only for the two open-ended ranges,
//!   `<30` and `>150`;
//! - a range is classified by its upper bound against [`THRESHOLDS`];
//! - anything else is unclassifiable and yields `None`.
//!
//! Labels with more than two numbers are classified best-effort from the
//! first two.

use std::sync::LazyLock;

use regex::Regex;

use crate::measurement::SizeCategory;

/// Upper-bound thresholds, ascending. A range whose upper bound is at most
/// the threshold falls into the paired category.
pub const THRESHOLDS: &[(u64, SizeCategory)] = &[
    (30, SizeCategory::Under30),
    (50, SizeCategory::From30To50),
    (80, SizeCategory::From50To80),
    (150, SizeCategory::From80To150),
];

/// Category for upper bounds above every threshold.
pub const OVERFLOW: SizeCategory = SizeCategory::Over150;

/// Single-bound label `<N` is only accepted for this `N`.
const LOWER_OPEN_BOUND: u64 = 30;

/// Single-bound label `>N` is only accepted for this `N`.
const UPPER_OPEN_BOUND: u64 = 150;

/// First code point (digit zero) of each non-ASCII decimal digit block that
/// labels are known to use. Each block holds ten consecutive digits.
const DIGIT_ZEROS: &[u32] = &[
    0x0660, // Arabic-Indic
    0x06F0, // Extended Arabic-Indic (Persian, Urdu)
    0x07C0, // NKo
    0x0966, // Devanagari
    0x09E6, // Bengali
    0x0A66, // Gurmukhi
    0x0AE6, // Gujarati
    0x0B66, // Oriya
    0x0BE6, // Tamil
    0x0C66, // Telugu
    0x0CE6, // Kannada
    0x0D66, // Malayalam
    0x0E50, // Thai
    0x0ED0, // Lao
    0x0F20, // Tibetan
    0x1040, // Myanmar
    0x17E0, // Khmer
    0x1810, // Mongolian
    0xFF10, // Fullwidth
];

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("integer pattern is valid"));

/// Normalize a label: lower-case with all whitespace removed.
#[must_use]
pub fn normalize(raw_label: &str) -> String {
    raw_label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Value of a decimal digit in any supported script.
fn digit_value(c: char) -> Option<u64> {
    if let Some(digit) = c.to_digit(10) {
        return Some(u64::from(digit));
    }
    let code = u32::from(c);
    DIGIT_ZEROS
        .iter()
        .find(|&&zero| (zero..zero + 10).contains(&code))
        .map(|&zero| u64::from(code - zero))
}

/// Parse one run of decimal digits, mixing scripts freely.
fn parse_integer(run: &str) -> Option<u64> {
    run.chars()
        .try_fold(0_u64, |acc, c| acc.checked_mul(10)?.checked_add(digit_value(c)?))
}

/// Extract every integer in the label, in order of appearance.
///
/// Returns `None` if any digit run does not fit in a `u64` or uses a digit
/// script outside [`DIGIT_ZEROS`].
fn integers(label: &str) -> Option<Vec<u64>> {
    INTEGER
        .find_iter(label)
        .map(|m| parse_integer(m.as_str()))
        .collect()
}

/// Classify a range by its upper bound.
#[must_use]
pub fn by_upper_bound(high: u64) -> SizeCategory {
    THRESHOLDS
        .iter()
        .find(|(limit, _)| high <= *limit)
        .map_or(OVERFLOW, |(_, category)| *category)
}

/// Classify a free-text size label. Never fails; unrecognized labels are `None`.
#[must_use]
pub fn classify(raw_label: &str) -> Option<SizeCategory> {
    let label = normalize(raw_label);
    let numbers = integers(&label)?;

    match numbers.as_slice() {
        [] => None,
        [value] => {
            if label.contains('<') {
                (*value == LOWER_OPEN_BOUND).then_some(SizeCategory::Under30)
            } else if label.contains('>') {
                (*value == UPPER_OPEN_BOUND).then_some(SizeCategory::Over150)
            } else {
                None
            }
        }
        [_low, high, ..] => Some(by_upper_bound(*high)),
    }
}
