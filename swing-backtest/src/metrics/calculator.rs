//! Performance metrics calculator.
//!
//! Derives cycle-level statistics from a backtest trade log.

use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestResult, ExitReason, Trade, TradeAction};

/// Performance metrics for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Cycle statistics
    pub total_cycles: usize,
    pub closed_cycles: usize,
    pub winning_cycles: usize,
    pub losing_cycles: usize,
    pub win_rate: f64,

    // P&L metrics
    pub net_profit: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub profit_factor: f64,
    pub avg_cycle_pnl: Decimal,
    pub largest_winner: Decimal,
    pub largest_loser: Decimal,

    // Return metrics
    pub final_balance: Decimal,
    pub total_return_pct: f64,

    // Averaging exposure
    pub max_adds_in_cycle: u32,
    pub avg_adds_per_cycle: f64,
    pub peak_margin_committed: Decimal,

    // Risk metrics (realized balance after each close)
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,

    // Time metrics
    pub avg_bars_in_cycle: f64,
    pub avg_bars_to_take_profit: f64,
    pub avg_bars_to_stop_loss: f64,

    /// A cycle was still open when the data ended.
    pub has_unclosed_cycle: bool,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_cycles: 0,
            closed_cycles: 0,
            winning_cycles: 0,
            losing_cycles: 0,
            win_rate: 0.0,
            net_profit: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            profit_factor: 0.0,
            avg_cycle_pnl: Decimal::ZERO,
            largest_winner: Decimal::ZERO,
            largest_loser: Decimal::ZERO,
            final_balance: Decimal::ZERO,
            total_return_pct: 0.0,
            max_adds_in_cycle: 0,
            avg_adds_per_cycle: 0.0,
            peak_margin_committed: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: 0.0,
            avg_bars_in_cycle: 0.0,
            avg_bars_to_take_profit: 0.0,
            avg_bars_to_stop_loss: 0.0,
            has_unclosed_cycle: false,
        }
    }
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Cycles: {} opened, {} closed (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             \n\
             Net Profit: {:.2}\n\
             Avg Cycle: {:.2}\n\
             Largest Win: {:.2}\n\
             Largest Loss: {:.2}\n\
             \n\
             Final Balance: {:.2}\n\
             Total Return: {:.2}%\n\
             Max Drawdown: {:.2} ({:.2}%)\n\
             \n\
             Max Adds: {}\n\
             Avg Adds: {:.2}\n\
             Peak Margin: {:.2}\n\
             Avg Bars in Cycle: {:.1}",
            self.total_cycles,
            self.closed_cycles,
            self.winning_cycles,
            self.losing_cycles,
            self.win_rate * 100.0,
            self.profit_factor,
            self.net_profit,
            self.avg_cycle_pnl,
            self.largest_winner,
            self.largest_loser,
            self.final_balance,
            self.total_return_pct,
            self.max_drawdown,
            self.max_drawdown_pct,
            self.max_adds_in_cycle,
            self.avg_adds_per_cycle,
            self.peak_margin_committed,
            self.avg_bars_in_cycle,
        )
    }
}

/// Realized P&L grouped by calendar month of the close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPnl {
    pub year: i32,
    pub month: u32,
    pub pnl: Decimal,
    pub closed_cycles: usize,
    pub win_rate: f64,
}

/// One open-to-close cycle reconstructed from the trade log.
#[derive(Debug, Clone)]
struct CycleRecord {
    adds: u32,
    bars_held: usize,
    pnl: Decimal,
    exit_reason: Option<ExitReason>,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from a backtest result.
    pub fn calculate(result: &BacktestResult) -> PerformanceMetrics {
        let summary = &result.summary;
        let (cycles, peak_margin) = Self::reconstruct_cycles(result);

        let closed = cycles.len();
        let pnls: Vec<Decimal> = cycles.iter().map(|c| c.pnl).collect();
        let largest_winner = pnls
            .iter()
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_loser = pnls
            .iter()
            .copied()
            .filter(|p| *p < Decimal::ZERO)
            .min()
            .unwrap_or(Decimal::ZERO);

        let avg_cycle_pnl = if closed == 0 {
            Decimal::ZERO
        } else {
            summary.net_profit() / Decimal::from(closed as i64)
        };

        let mut max_adds = result
            .open_position
            .as_ref()
            .map(|p| p.add_count)
            .unwrap_or(0);
        max_adds = cycles.iter().map(|c| c.adds).fold(max_adds, u32::max);

        let avg_adds = if closed == 0 {
            0.0
        } else {
            cycles.iter().map(|c| c.adds as f64).sum::<f64>() / closed as f64
        };

        let (max_drawdown, max_drawdown_pct) = Self::analyze_drawdown(result);

        PerformanceMetrics {
            total_cycles: summary.total_open_cycles,
            closed_cycles: closed,
            winning_cycles: summary.take_profit_count,
            losing_cycles: summary.stop_loss_count,
            win_rate: summary.win_rate(),
            net_profit: summary.net_profit(),
            gross_profit: summary.total_take_profit_amount,
            gross_loss: summary.total_stop_loss_amount,
            profit_factor: Self::calculate_profit_factor(
                summary.total_take_profit_amount,
                summary.total_stop_loss_amount,
                closed,
            ),
            avg_cycle_pnl,
            largest_winner,
            largest_loser,
            final_balance: result.final_balance,
            total_return_pct: result.return_pct(),
            max_adds_in_cycle: max_adds,
            avg_adds_per_cycle: avg_adds,
            peak_margin_committed: peak_margin,
            max_drawdown,
            max_drawdown_pct,
            avg_bars_in_cycle: Self::avg_bars(&cycles, None),
            avg_bars_to_take_profit: Self::avg_bars(&cycles, Some(ExitReason::TakeProfit)),
            avg_bars_to_stop_loss: Self::avg_bars(&cycles, Some(ExitReason::StopLoss)),
            has_unclosed_cycle: result.open_position.is_some(),
        }
    }

    /// Closed cycles plus the largest margin committed at once.
    fn reconstruct_cycles(result: &BacktestResult) -> (Vec<CycleRecord>, Decimal) {
        let mut cycles = Vec::new();
        let mut peak_margin = Decimal::ZERO;
        let mut balance_before_open = result.params.initial_balance;
        let mut previous_balance = result.params.initial_balance;
        let mut open_index = 0usize;
        let mut adds = 0u32;

        for trade in &result.trades {
            match trade.action {
                TradeAction::Open => {
                    balance_before_open = previous_balance;
                    open_index = trade.bar_index;
                    adds = 0;
                }
                TradeAction::Add => adds += 1,
                TradeAction::Close => cycles.push(CycleRecord {
                    adds,
                    bars_held: trade.bar_index - open_index,
                    pnl: trade.realized_pnl.unwrap_or(Decimal::ZERO),
                    exit_reason: trade.exit_reason,
                }),
            }
            if trade.action != TradeAction::Close {
                peak_margin = peak_margin.max(balance_before_open - trade.balance_after);
            }
            previous_balance = trade.balance_after;
        }

        (cycles, peak_margin)
    }

    /// Calculate profit factor.
    fn calculate_profit_factor(gross_profit: Decimal, gross_loss: Decimal, closed: usize) -> f64 {
        if closed == 0 {
            return 0.0;
        }
        let loss: f64 = gross_loss.abs().try_into().unwrap_or(0.0);
        if loss == 0.0 {
            return f64::INFINITY;
        }
        let profit: f64 = gross_profit.try_into().unwrap_or(0.0);
        profit / loss
    }

    /// Max drawdown of the balance sampled after each close.
    fn analyze_drawdown(result: &BacktestResult) -> (Decimal, f64) {
        let mut peak = result.params.initial_balance;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_pct = 0.0;

        for trade in result.closes() {
            let balance = trade.balance_after;
            if balance > peak {
                peak = balance;
                continue;
            }
            let drawdown = peak - balance;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                max_drawdown_pct = if peak.is_zero() {
                    0.0
                } else {
                    let dd: f64 = drawdown.try_into().unwrap_or(0.0);
                    let pk: f64 = peak.try_into().unwrap_or(1.0);
                    dd / pk * 100.0
                };
            }
        }

        (max_drawdown, max_drawdown_pct)
    }

    /// Average bars held, optionally by exit reason.
    fn avg_bars(cycles: &[CycleRecord], reason: Option<ExitReason>) -> f64 {
        let matching: Vec<_> = cycles
            .iter()
            .filter(|c| reason.is_none() || c.exit_reason == reason)
            .collect();

        if matching.is_empty() {
            return 0.0;
        }

        matching.iter().map(|c| c.bars_held as f64).sum::<f64>() / matching.len() as f64
    }

    /// Realized P&L per calendar month.
    pub fn monthly_pnl(result: &BacktestResult) -> Vec<MonthlyPnl> {
        let mut monthly: BTreeMap<(i32, u32), Vec<&Trade>> = BTreeMap::new();
        for trade in result.closes() {
            monthly
                .entry((trade.timestamp.year(), trade.timestamp.month()))
                .or_default()
                .push(trade);
        }

        monthly
            .into_iter()
            .map(|((year, month), closes)| {
                let pnls: Vec<Decimal> = closes
                    .iter()
                    .map(|t| t.realized_pnl.unwrap_or(Decimal::ZERO))
                    .collect();
                let wins = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
                MonthlyPnl {
                    year,
                    month,
                    pnl: pnls.iter().copied().sum(),
                    closed_cycles: pnls.len(),
                    win_rate: wins as f64 / pnls.len() as f64,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{run, StrategyParameters, TradeDirection};
    use crate::data::Bar;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bars(closes: &[(f64, f64, f64)], step: Duration) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &(h, l, c))| Bar::new(start + step * i as i32, c, h, l, c))
            .collect()
    }

    fn params() -> StrategyParameters {
        StrategyParameters {
            take_profit_pct: 2.0,
            stop_loss_pct: 10.0,
            ..StrategyParameters::default()
        }
    }

    #[test]
    fn test_profit_factor() {
        assert_eq!(
            MetricsCalculator::calculate_profit_factor(dec!(15000), dec!(-5000), 3),
            3.0
        );
        assert_eq!(
            MetricsCalculator::calculate_profit_factor(dec!(10), Decimal::ZERO, 1),
            f64::INFINITY
        );
        assert_eq!(
            MetricsCalculator::calculate_profit_factor(Decimal::ZERO, Decimal::ZERO, 0),
            0.0
        );
    }

    #[test]
    fn test_performance_metrics_default() {
        let metrics = PerformanceMetrics::default();
        assert_eq!(metrics.total_cycles, 0);
        assert_eq!(metrics.net_profit, Decimal::ZERO);
    }

    #[test]
    fn test_metrics_from_win_and_loss() {
        let mut p = params();
        p.max_add_times = 1;
        // Both cycles open at 100 and add at 97; the first takes profit,
        // the second stops out once the add budget is spent.
        let data = bars(
            &[
                (100.0, 100.0, 100.0),
                (99.0, 97.0, 98.0),
                (101.0, 98.0, 100.5),
                (100.0, 100.0, 100.0),
                (98.0, 97.0, 97.0),
                (97.0, 85.0, 86.0),
            ],
            Duration::hours(1),
        );
        let result = run(&data, TradeDirection::Long, &p).unwrap();
        let metrics = MetricsCalculator::calculate(&result);

        assert_eq!(metrics.total_cycles, 2);
        assert_eq!(metrics.closed_cycles, 2);
        assert_eq!(metrics.winning_cycles, 1);
        assert_eq!(metrics.losing_cycles, 1);
        assert_eq!(metrics.max_adds_in_cycle, 1);
        assert_eq!(metrics.avg_adds_per_cycle, 1.0);
        assert_eq!(metrics.peak_margin_committed, dec!(150));
        assert!(metrics.largest_winner > Decimal::ZERO);
        assert!(metrics.largest_loser < Decimal::ZERO);
        assert_eq!(metrics.net_profit, metrics.gross_profit + metrics.gross_loss);
        assert_eq!(metrics.final_balance, dec!(1000) + metrics.net_profit);
        assert!(metrics.max_drawdown > Decimal::ZERO);
        assert_eq!(metrics.avg_bars_to_take_profit, 2.0);
        assert_eq!(metrics.avg_bars_to_stop_loss, 2.0);
        assert_eq!(metrics.avg_bars_in_cycle, 2.0);
        assert!(!metrics.has_unclosed_cycle);
    }

    #[test]
    fn test_monthly_pnl_groups_by_close_month() {
        let data = bars(
            &[
                (100.0, 100.0, 100.0),
                (103.0, 100.0, 102.0),
                (102.0, 102.0, 102.0),
                (105.0, 102.0, 104.0),
            ],
            Duration::days(1),
        );
        let result = run(&data, TradeDirection::Long, &params()).unwrap();
        let monthly = MetricsCalculator::monthly_pnl(&result);

        // Closes on Feb 1 and Feb 3
        assert_eq!(monthly.len(), 1);
        assert_eq!((monthly[0].year, monthly[0].month), (2024, 2));
        assert_eq!(monthly[0].closed_cycles, 2);
        assert_eq!(monthly[0].win_rate, 1.0);
    }
}
