//! Swing (ZigZag) analysis.
//!
//! - Pivot candidate detection over a symmetric `depth` window
//! - Alternating swing extremes filtered by a minimum percentage deviation
//! - Leg (segment) extraction, per-direction extremes and distribution stats

pub mod detector;
pub mod segment;

pub use detector::{
    detect, LabelColor, LabelPosition, SwingAnalysis, SwingConfig, SwingDetector, SwingKind,
    SwingPoint, TextStyle,
};
pub use segment::{ranked, DirectionExtremes, Segment, SegmentDirection, SegmentStats};
