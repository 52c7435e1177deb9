//! ZigZag swing detection.
//!
//! Scans bars for pivot candidates (a bar whose high/low is the extreme of
//! the symmetric `[i - depth, i + depth]` window) and keeps an alternating
//! sequence of swing extremes, each at least `deviation_pct` away from the
//! previous one. While a leg is still extending, the trailing point is
//! replaced rather than appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::Bar;
use crate::error::{ensure_non_negative, AnalysisError, AnalysisResult};

use super::segment::{build_segments, DirectionExtremes, Segment, SegmentDirection};

/// Swing detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Minimum move between consecutive swing points, in percent.
    pub deviation_pct: f64,
    /// Bars on each side a pivot must dominate.
    pub depth: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            deviation_pct: 5.0,
            depth: 10,
        }
    }
}

impl SwingConfig {
    pub fn validate(&self, bar_count: usize) -> AnalysisResult<()> {
        ensure_non_negative("deviation_pct", self.deviation_pct)?;
        if self.depth < 1 {
            return Err(AnalysisError::invalid("depth", "must be at least 1"));
        }
        let required = self.window_len();
        if required > bar_count {
            return Err(AnalysisError::InsufficientData {
                required,
                available: bar_count,
            });
        }
        Ok(())
    }

    /// Bars needed for a single pivot window.
    pub fn window_len(&self) -> usize {
        self.depth.saturating_mul(2).saturating_add(1)
    }
}

/// Kind of swing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    /// First point of the sequence.
    Initial,
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelColor {
    Red,
    LimeGreen,
    DodgerBlue,
}

impl LabelColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::LimeGreen => "limegreen",
            Self::DodgerBlue => "dodgerblue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelPosition {
    TopCenter,
    BottomCenter,
}

impl LabelPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopCenter => "top center",
            Self::BottomCenter => "bottom center",
        }
    }
}

/// Text styling hints for chart annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStyle {
    pub color: LabelColor,
    pub position: LabelPosition,
}

impl TextStyle {
    pub fn for_kind(kind: SwingKind) -> Self {
        match kind {
            SwingKind::High => Self {
                color: LabelColor::Red,
                position: LabelPosition::TopCenter,
            },
            SwingKind::Low => Self {
                color: LabelColor::LimeGreen,
                position: LabelPosition::BottomCenter,
            },
            SwingKind::Initial => Self {
                color: LabelColor::DodgerBlue,
                position: LabelPosition::TopCenter,
            },
        }
    }
}

/// A swing extreme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    /// Index into the analysed bar slice.
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    /// Bar high for highs, bar low for lows, close for the initial point.
    pub price: f64,
    pub kind: SwingKind,
    /// Display label, e.g. `High 3 (+12.40)`.
    pub label: String,
    /// Sequence number within the leg direction; `None` for the first point.
    pub segment_number: Option<u32>,
    pub style: TextStyle,
    /// True for the trailing point, whose extreme may still extend.
    pub provisional: bool,
}

/// Result of a swing detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingAnalysis {
    pub points: Vec<SwingPoint>,
    pub segments: Vec<Segment>,
    /// Largest/smallest upward legs.
    pub up: DirectionExtremes,
    /// Largest/smallest downward legs.
    pub down: DirectionExtremes,
}

impl SwingAnalysis {
    /// Confirmed reversals after the initial point. The provisional
    /// trailing point is not counted.
    pub fn reversal_count(&self) -> usize {
        self.points.len().saturating_sub(2)
    }

    pub fn segments_in(&self, direction: SegmentDirection) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| s.direction == direction)
    }

    /// Swing points falling inside an inclusive time range.
    pub fn points_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&SwingPoint> {
        self.points
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Swing Analysis: {} points, {} segments\n\
             ----------------------------------------\n\
             Up   largest:  {}\n\
             Up   smallest: {}\n\
             Down largest:  {}\n\
             Down smallest: {}",
            self.points.len(),
            self.segments.len(),
            self.up.describe_largest(),
            self.up.describe_smallest(),
            self.down.describe_largest(),
            self.down.describe_smallest(),
        )
    }
}

/// Which reversal the detector waits for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    Undetermined,
    /// Last committed extreme was a low; waiting for a high far enough above it.
    SeekingHigh,
    /// Last committed extreme was a high; waiting for a low far enough below it.
    SeekingLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PivotSide {
    Seed,
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
struct Pivot {
    bar_index: usize,
    price: f64,
    side: PivotSide,
}

/// Accumulates committed extremes plus one trailing point that is either
/// replaced (leg extends) or committed (reversal confirmed).
#[derive(Debug)]
struct SwingBuilder {
    state: LegState,
    committed: Vec<Pivot>,
    trailing: Pivot,
}

impl SwingBuilder {
    fn new(seed: Pivot) -> Self {
        Self {
            state: LegState::Undetermined,
            committed: Vec::new(),
            trailing: seed,
        }
    }

    fn last_price(&self) -> f64 {
        self.trailing.price
    }

    /// Replace the trailing point in place.
    fn extend(&mut self, pivot: Pivot) {
        self.trailing = pivot;
    }

    /// Commit the trailing point and start a new leg.
    fn reverse(&mut self, pivot: Pivot) {
        self.committed.push(self.trailing);
        self.trailing = pivot;
    }

    fn observe(&mut self, i: usize, bar: &Bar, is_high: bool, is_low: bool, deviation_pct: f64) {
        let high = Pivot {
            bar_index: i,
            price: bar.high,
            side: PivotSide::High,
        };
        let low = Pivot {
            bar_index: i,
            price: bar.low,
            side: PivotSide::Low,
        };

        match self.state {
            LegState::Undetermined => {
                // The first candidate takes over the seed slot.
                if is_high {
                    self.extend(high);
                    self.state = LegState::SeekingLow;
                } else if is_low {
                    self.extend(low);
                    self.state = LegState::SeekingHigh;
                }
            }
            LegState::SeekingHigh => {
                if is_high {
                    let last = self.last_price();
                    let change = (bar.high - last) / last * 100.0;
                    if change >= deviation_pct {
                        self.reverse(high);
                        self.state = LegState::SeekingLow;
                    }
                } else if is_low && bar.low < self.last_price() {
                    self.extend(low);
                }
            }
            LegState::SeekingLow => {
                if is_low {
                    let last = self.last_price();
                    let change = (last - bar.low) / last * 100.0;
                    if change >= deviation_pct {
                        self.reverse(low);
                        self.state = LegState::SeekingHigh;
                    }
                } else if is_high && bar.high > self.last_price() {
                    self.extend(high);
                }
            }
        }
    }

    /// Committed points followed by the trailing one.
    fn finish(mut self) -> Vec<Pivot> {
        self.committed.push(self.trailing);
        self.committed
    }
}

/// ZigZag swing detector.
#[derive(Debug, Clone, Default)]
pub struct SwingDetector {
    config: SwingConfig,
}

impl SwingDetector {
    pub fn new(config: SwingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SwingConfig {
        &self.config
    }

    /// Detect swing points and legs over `bars`.
    pub fn detect(&self, bars: &[Bar]) -> AnalysisResult<SwingAnalysis> {
        self.config.validate(bars.len())?;

        let pivots = self.scan(bars);
        let points = label_points(bars, &pivots);
        let segments = build_segments(bars, &points);
        let up = DirectionExtremes::from_segments(&segments, SegmentDirection::Up);
        let down = DirectionExtremes::from_segments(&segments, SegmentDirection::Down);

        debug!(
            "Swing detection over {} bars: {} points, {} segments",
            bars.len(),
            points.len(),
            segments.len()
        );

        Ok(SwingAnalysis {
            points,
            segments,
            up,
            down,
        })
    }

    /// Alternating pivots in bar order. Expects a validated window.
    fn scan(&self, bars: &[Bar]) -> Vec<Pivot> {
        let depth = self.config.depth;

        // Until a candidate shows up the series is anchored at the first
        // bar with a full left window.
        let mut builder = SwingBuilder::new(Pivot {
            bar_index: depth,
            price: bars[depth].close,
            side: PivotSide::Seed,
        });

        for i in depth..bars.len() - depth {
            let window = &bars[i - depth..=i + depth];
            let is_high = window.iter().all(|b| b.high <= bars[i].high);
            let is_low = window.iter().all(|b| b.low >= bars[i].low);
            builder.observe(i, &bars[i], is_high, is_low, self.config.deviation_pct);
        }

        let pivots = builder.finish();
        debug_assert!(pivots.windows(2).all(|w| w[0].side != w[1].side));
        pivots
    }
}

/// Detect swings with explicit parameters.
pub fn detect(bars: &[Bar], deviation_pct: f64, depth: usize) -> AnalysisResult<SwingAnalysis> {
    SwingDetector::new(SwingConfig {
        deviation_pct,
        depth,
    })
    .detect(bars)
}

/// Kind and price follow the close of each pivot bar against the previous
/// one: a higher close marks a High at the bar high, otherwise a Low at the
/// bar low. The first point sits at its close.
fn label_points(bars: &[Bar], pivots: &[Pivot]) -> Vec<SwingPoint> {
    let mut up_no: u32 = 1;
    let mut down_no: u32 = 1;
    let last_idx = pivots.len().saturating_sub(1);
    let mut points: Vec<SwingPoint> = Vec::with_capacity(pivots.len());

    for (n, pivot) in pivots.iter().enumerate() {
        let bar = &bars[pivot.bar_index];

        let (kind, price, label, segment_number) = match points.last() {
            None => (SwingKind::Initial, bar.close, "initial".to_string(), None),
            Some(prev) => {
                let (kind, price) = if bar.close > bars[prev.bar_index].close {
                    (SwingKind::High, bar.high)
                } else {
                    (SwingKind::Low, bar.low)
                };
                let diff = price - prev.price;
                let sign = if diff >= 0.0 { '+' } else { '-' };
                let number = if diff > 0.0 {
                    up_no += 1;
                    up_no - 1
                } else {
                    down_no += 1;
                    down_no - 1
                };
                let word = if kind == SwingKind::High { "High" } else { "Low" };
                (
                    kind,
                    price,
                    format!("{} {} ({}{:.2})", word, number, sign, diff.abs()),
                    Some(number),
                )
            }
        };

        points.push(SwingPoint {
            bar_index: pivot.bar_index,
            timestamp: bar.timestamp,
            price,
            kind,
            label,
            segment_number,
            style: TextStyle::for_kind(kind),
            provisional: n == last_idx,
        });
    }

    points
}
