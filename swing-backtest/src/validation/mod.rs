//! Validation module for bar data.
//!
//! Integrity checks run before analysis: ordering, duplicates, OHLC
//! consistency, price validity and interval regularity.

pub mod data_integrity;

pub use data_integrity::{BarIntegrityValidator, CheckResult, IntegrityReport};
