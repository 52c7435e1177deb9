//! Legs between consecutive swing points and their statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Bar;

use super::detector::SwingPoint;

/// Direction of a leg. A zero price difference counts as `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentDirection {
    Up,
    Down,
}

impl SegmentDirection {
    pub fn from_diff(price_diff: f64) -> Self {
        if price_diff > 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// A leg between two consecutive swing points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub direction: SegmentDirection,
    /// End price minus start price.
    pub price_diff: f64,
    /// Price difference relative to the start price, in percent.
    pub pct_change: f64,
    /// Sequence number within `direction`, starting at 1.
    pub segment_number: u32,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Segment {
    /// Bars spanned by the leg.
    pub fn bar_count(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn describe(&self) -> String {
        format!(
            "#{} | diff: {:.2} | change: {:.2}%",
            self.segment_number, self.price_diff, self.pct_change
        )
    }
}

pub(crate) fn build_segments(bars: &[Bar], points: &[SwingPoint]) -> Vec<Segment> {
    points
        .windows(2)
        .map(|pair| {
            let (prev, curr) = (&pair[0], &pair[1]);
            let price_diff = curr.price - prev.price;
            Segment {
                direction: SegmentDirection::from_diff(price_diff),
                price_diff,
                pct_change: price_diff / prev.price * 100.0,
                // Every point after the first carries a number.
                segment_number: curr.segment_number.unwrap_or_default(),
                start_index: prev.bar_index,
                end_index: curr.bar_index,
                start_time: bars[prev.bar_index].timestamp,
                end_time: bars[curr.bar_index].timestamp,
            }
        })
        .collect()
}

/// Largest and smallest legs of one direction by `pct_change`.
///
/// Ties resolve to the first leg encountered. `None` when the direction has
/// no legs at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionExtremes {
    pub largest: Option<Segment>,
    pub smallest: Option<Segment>,
}

impl DirectionExtremes {
    pub fn from_segments(segments: &[Segment], direction: SegmentDirection) -> Self {
        let mut largest: Option<&Segment> = None;
        let mut smallest: Option<&Segment> = None;

        for seg in segments.iter().filter(|s| s.direction == direction) {
            if largest.map_or(true, |l| seg.pct_change > l.pct_change) {
                largest = Some(seg);
            }
            if smallest.map_or(true, |s| seg.pct_change < s.pct_change) {
                smallest = Some(seg);
            }
        }

        Self {
            largest: largest.cloned(),
            smallest: smallest.cloned(),
        }
    }

    pub fn describe_largest(&self) -> String {
        describe_or_none(self.largest.as_ref())
    }

    pub fn describe_smallest(&self) -> String {
        describe_or_none(self.smallest.as_ref())
    }
}

fn describe_or_none(seg: Option<&Segment>) -> String {
    seg.map(Segment::describe)
        .unwrap_or_else(|| "none".to_string())
}

/// Legs of one direction ordered by magnitude: largest rise first for `Up`,
/// deepest drop first for `Down`.
pub fn ranked(segments: &[Segment], direction: SegmentDirection) -> Vec<&Segment> {
    let mut legs: Vec<&Segment> = segments
        .iter()
        .filter(|s| s.direction == direction)
        .collect();
    match direction {
        SegmentDirection::Up => legs.sort_by(|a, b| b.pct_change.total_cmp(&a.pct_change)),
        SegmentDirection::Down => legs.sort_by(|a, b| a.pct_change.total_cmp(&b.pct_change)),
    }
    legs
}

/// Distribution of leg sizes for one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub direction: SegmentDirection,
    pub count: usize,
    pub mean_pct: f64,
    /// 5th percentile of `pct_change`.
    pub band_low_pct: f64,
    /// 85th percentile of `pct_change`.
    pub band_high_pct: f64,
}

impl SegmentStats {
    pub const BAND_LOW_QUANTILE: f64 = 0.05;
    pub const BAND_HIGH_QUANTILE: f64 = 0.85;

    pub fn for_direction(segments: &[Segment], direction: SegmentDirection) -> Option<Self> {
        let mut pcts: Vec<f64> = segments
            .iter()
            .filter(|s| s.direction == direction)
            .map(|s| s.pct_change)
            .collect();
        if pcts.is_empty() {
            return None;
        }
        pcts.sort_by(f64::total_cmp);

        let count = pcts.len();
        let mean_pct = pcts.iter().sum::<f64>() / count as f64;

        Some(Self {
            direction,
            count,
            mean_pct,
            band_low_pct: quantile(&pcts, Self::BAND_LOW_QUANTILE),
            band_high_pct: quantile(&pcts, Self::BAND_HIGH_QUANTILE),
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "{} legs: {} (mean {:.2}%), 80% band {:.2}% ~ {:.2}%",
            self.direction.as_str(),
            self.count,
            self.mean_pct,
            self.band_low_pct,
            self.band_high_pct
        )
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
