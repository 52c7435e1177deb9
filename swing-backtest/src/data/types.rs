//! Core data types for bar-based analysis.
//!
//! A `Bar` is one fully closed OHLC period. `BarSeries` is the ordered
//! sequence both the swing detector and the backtest engine consume.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// A single OHLC bar.
///
/// Bars are expected to be closed. The analysis code never assumes the
/// final bar of a series is complete, so feeds that include the bar still
/// forming should drop it before building a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Traded volume (ignored by the analysis core).
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

}

/// Time range selection over a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    /// Whole series.
    All,
    /// Trailing window ending at the last bar.
    LastDays(i64),
    /// Inclusive custom range.
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Time-ordered bar sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series, rejecting timestamps that go backwards.
    ///
    /// Equal consecutive timestamps are accepted; the series is not
    /// deduplicated or resampled.
    pub fn new(bars: Vec<Bar>) -> AnalysisResult<Self> {
        if let Some(pos) = bars
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(AnalysisError::invalid(
                "bars",
                format!(
                    "timestamps must be non-decreasing: bar {} ({}) precedes bar {} ({})",
                    pos + 1,
                    bars[pos + 1].timestamp,
                    pos,
                    bars[pos].timestamp
                ),
            ));
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Bars with `start <= timestamp <= end`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AnalysisResult<Self> {
        if start > end {
            return Err(AnalysisError::invalid(
                "time_window",
                format!("start {} is later than end {}", start, end),
            ));
        }
        let bars = self
            .bars
            .iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect();
        Ok(Self { bars })
    }

    /// Apply a time window selection.
    pub fn select(&self, window: TimeWindow) -> AnalysisResult<Self> {
        match window {
            TimeWindow::All => Ok(self.clone()),
            TimeWindow::LastDays(days) => {
                if days <= 0 {
                    return Err(AnalysisError::invalid(
                        "time_window",
                        format!("trailing day count must be positive, got {}", days),
                    ));
                }
                let Some(last) = self.last() else {
                    return Ok(Self::default());
                };
                let end = last.timestamp;
                self.between(end - Duration::days(days), end)
            }
            TimeWindow::Custom { start, end } => self.between(start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let price = 100.0 + i as f64;
                Bar::new(start + Duration::hours(i as i64), price, price, price, price)
            })
            .collect()
    }

    #[test]
    fn test_series_rejects_backwards_timestamps() {
        let mut bars = hourly(3);
        bars.swap(1, 2);
        let err = BarSeries::new(bars).unwrap_err();
        assert!(err.is_invalid_parameter());
    }

    #[test]
    fn test_series_accepts_equal_timestamps() {
        let mut bars = hourly(2);
        bars[1].timestamp = bars[0].timestamp;
        assert_eq!(BarSeries::new(bars).unwrap().len(), 2);
    }

    #[test]
    fn test_last_days_window() {
        let series = BarSeries::new(hourly(24 * 10)).unwrap();
        let window = series.select(TimeWindow::LastDays(7)).unwrap();
        // 7 days of hourly bars plus the inclusive start bar
        assert_eq!(window.len(), 24 * 7 + 1);
        assert_eq!(window.last(), series.last());
    }

    #[test]
    fn test_custom_window_rejects_inverted_range() {
        let series = BarSeries::new(hourly(10)).unwrap();
        let start = series.last().unwrap().timestamp;
        let end = series.first().unwrap().timestamp;
        assert!(series.select(TimeWindow::Custom { start, end }).is_err());
    }

    #[test]
    fn test_custom_window_is_inclusive() {
        let series = BarSeries::new(hourly(10)).unwrap();
        let start = series.bars()[2].timestamp;
        let end = series.bars()[5].timestamp;
        let window = series.select(TimeWindow::Custom { start, end }).unwrap();
        assert_eq!(window.len(), 4);
    }
}
