//! Performance metrics module.
//!
//! Cycle-level statistics derived from a backtest trade log:
//! - Win rate, profit factor
//! - Averaging exposure (adds, committed margin)
//! - Maximum drawdown of the realized balance
//! - Monthly realized P&L

pub mod calculator;

pub use calculator::{MetricsCalculator, MonthlyPnl, PerformanceMetrics};
