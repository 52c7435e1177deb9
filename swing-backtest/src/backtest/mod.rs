//! Backtesting engine for the position-averaging (martingale) strategy.
//!
//! This module provides:
//! - Strategy parameters and validation
//! - Trade log and position lifecycle (open, add, close)
//! - A two-state (flat / in position) simulation over bars
//! - Per-run cycle summary

pub mod engine;
pub mod trade;

pub use engine::{run, run_both, BacktestEngine, BacktestResult, StrategyParameters, Summary};
pub use trade::{ExitReason, Position, Trade, TradeAction, TradeDirection};
