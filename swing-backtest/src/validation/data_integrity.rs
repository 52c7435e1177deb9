//! Data integrity validation for OHLC bar series.
//!
//! Validates:
//! - Timestamp ordering (non-decreasing)
//! - Duplicate timestamps
//! - OHLC consistency (high/low bracket open and close)
//! - Price validity (finite, positive)
//! - Interval regularity (gaps vs. the most common bar spacing)
//!
//! Purely informational: nothing here mutates or resamples the bars.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::data::Bar;

/// Share of intervals allowed to be gaps before the regularity check fails.
const MAX_GAP_SHARE_PCT: f64 = 1.0;

/// Number of offending bars listed in a check's details.
const MAX_LISTED: usize = 5;

/// Result of a single validation check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn fail(name: &str, message: &str, details: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.to_string(),
            details,
        }
    }
}

/// Complete integrity report for one bar series.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub bar_count: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// Most common spacing between consecutive bars, in seconds.
    pub interval_secs: Option<i64>,
    pub checks: Vec<CheckResult>,
}

impl IntegrityReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let total = self.checks.len();
        let range = match (self.first, self.last) {
            (Some(first), Some(last)) => format!("{} to {}", first, last),
            _ => "empty".to_string(),
        };
        format!(
            "{} bars ({}): {}/{} checks passed",
            self.bar_count, range, passed, total
        )
    }
}

/// Validator for bar series integrity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarIntegrityValidator;

impl BarIntegrityValidator {
    /// Run all validation checks.
    pub fn validate(bars: &[Bar]) -> IntegrityReport {
        let interval = modal_interval(bars);

        let checks = vec![
            Self::check_ordering(bars),
            Self::check_duplicates(bars),
            Self::check_ohlc_consistency(bars),
            Self::check_price_validity(bars),
            Self::check_interval_regularity(bars, interval),
        ];

        IntegrityReport {
            bar_count: bars.len(),
            first: bars.first().map(|b| b.timestamp),
            last: bars.last().map(|b| b.timestamp),
            interval_secs: interval.map(|d| d.num_seconds()),
            checks,
        }
    }

    fn check_ordering(bars: &[Bar]) -> CheckResult {
        let out_of_order: Vec<usize> = bars
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[1].timestamp < w[0].timestamp)
            .map(|(i, _)| i + 1)
            .collect();

        if out_of_order.is_empty() {
            CheckResult::pass("timestamp_ordering", "Timestamps non-decreasing")
        } else {
            CheckResult::fail(
                "timestamp_ordering",
                &format!("{} bars earlier than their predecessor", out_of_order.len()),
                Some(list_indices(&out_of_order)),
            )
        }
    }

    fn check_duplicates(bars: &[Bar]) -> CheckResult {
        let mut seen: HashMap<DateTime<Utc>, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        for (i, bar) in bars.iter().enumerate() {
            if seen.insert(bar.timestamp, i).is_some() {
                duplicates.push(i);
            }
        }

        if duplicates.is_empty() {
            CheckResult::pass("duplicate_timestamps", "No duplicate timestamps")
        } else {
            CheckResult::fail(
                "duplicate_timestamps",
                &format!("{} duplicate timestamps", duplicates.len()),
                Some(list_indices(&duplicates)),
            )
        }
    }

    /// high >= max(open, close) and low <= min(open, close).
    fn check_ohlc_consistency(bars: &[Bar]) -> CheckResult {
        let inconsistent: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, b)| b.high < b.open.max(b.close) || b.low > b.open.min(b.close))
            .map(|(i, _)| i)
            .collect();

        if inconsistent.is_empty() {
            CheckResult::pass("ohlc_consistency", "High/low bracket open and close")
        } else {
            CheckResult::fail(
                "ohlc_consistency",
                &format!("{} bars with inconsistent OHLC", inconsistent.len()),
                Some(list_indices(&inconsistent)),
            )
        }
    }

    fn check_price_validity(bars: &[Bar]) -> CheckResult {
        let invalid: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                [b.open, b.high, b.low, b.close]
                    .iter()
                    .any(|p| !p.is_finite() || *p <= 0.0)
            })
            .map(|(i, _)| i)
            .collect();

        if invalid.is_empty() {
            CheckResult::pass("price_validity", "All prices finite and positive")
        } else {
            CheckResult::fail(
                "price_validity",
                &format!("{} bars with non-positive or non-finite prices", invalid.len()),
                Some(list_indices(&invalid)),
            )
        }
    }

    /// Gaps are intervals longer than twice the modal spacing.
    fn check_interval_regularity(bars: &[Bar], interval: Option<Duration>) -> CheckResult {
        let Some(interval) = interval else {
            return CheckResult::pass("interval_regularity", "Too few bars to measure spacing");
        };

        let gaps: Vec<String> = bars
            .windows(2)
            .filter(|w| w[1].timestamp - w[0].timestamp > interval * 2)
            .map(|w| {
                format!(
                    "{} to {} ({}s)",
                    w[0].timestamp,
                    w[1].timestamp,
                    (w[1].timestamp - w[0].timestamp).num_seconds()
                )
            })
            .collect();

        if gaps.is_empty() {
            return CheckResult::pass(
                "interval_regularity",
                &format!("Regular {}s spacing, no gaps", interval.num_seconds()),
            );
        }

        let pct = gaps.len() as f64 / (bars.len() - 1) as f64 * 100.0;
        if pct <= MAX_GAP_SHARE_PCT {
            // Occasional gaps (exchange maintenance, holidays) are expected.
            CheckResult::pass(
                "interval_regularity",
                &format!("{} minor gaps ({:.2}% of intervals)", gaps.len(), pct),
            )
        } else {
            CheckResult::fail(
                "interval_regularity",
                &format!("{} gaps ({:.2}% of intervals)", gaps.len(), pct),
                Some(gaps.into_iter().take(MAX_LISTED).collect::<Vec<_>>().join(", ")),
            )
        }
    }
}

/// Most common positive spacing; ties resolve to the shorter spacing.
fn modal_interval(bars: &[Bar]) -> Option<Duration> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for w in bars.windows(2) {
        let secs = (w[1].timestamp - w[0].timestamp).num_seconds();
        if secs > 0 {
            *counts.entry(secs).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(secs, _)| Duration::seconds(secs))
}

fn list_indices(indices: &[usize]) -> String {
    let shown: Vec<String> = indices
        .iter()
        .take(MAX_LISTED)
        .map(|i| format!("bar {}", i))
        .collect();
    if indices.len() > MAX_LISTED {
        format!("{}, ...", shown.join(", "))
    } else {
        shown.join(", ")
    }
}
