//! Position-averaging backtest engine.
//!
//! Runs a two-state machine over the bars, one bar at a time:
//! 1. Flat: open at the bar close with half the base amount
//! 2. In position: add once if the adverse move from the last fill reaches
//!    the (geometrically growing) trigger, then check take-profit before
//!    stop-loss against the bar's high/low
//! 3. On close, credit margin plus realized P&L and go flat; the next bar
//!    opens a new cycle
//!
//! A cycle still open when the data ends is reported but never force-closed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::data::Bar;
use crate::error::{ensure_non_negative, ensure_positive, AnalysisError, AnalysisResult};

use super::trade::{ExitReason, Position, Trade, TradeAction, TradeDirection};

/// Strategy parameters for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParameters {
    /// Starting account balance.
    pub initial_balance: Decimal,

    /// Leverage applied to every margin amount.
    pub leverage: u32,

    /// Adverse move (percent) from the last fill that triggers the first add.
    pub add_pct: f64,

    /// Growth factor of the add trigger per add already made.
    pub add_multiple: f64,

    /// Maximum number of adds per cycle.
    pub max_add_times: u32,

    /// Margin of the first add. The entry uses half of it.
    pub base_add_amount: Decimal,

    /// Growth factor of the add margin per add already made.
    pub add_amount_multiple: f64,

    /// Take-profit distance from the average price, in percent.
    pub take_profit_pct: f64,

    /// Stop-loss distance from the average price, in percent.
    pub stop_loss_pct: f64,

    pub direction: TradeDirection,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(1000),
            leverage: 10,
            add_pct: 2.0,
            add_multiple: 1.0,
            max_add_times: 7,
            base_add_amount: Decimal::from(100),
            add_amount_multiple: 2.0,
            take_profit_pct: 1.0,
            stop_loss_pct: 10.0,
            direction: TradeDirection::Long,
        }
    }
}

impl StrategyParameters {
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.leverage == 0 {
            return Err(AnalysisError::invalid("leverage", "must be at least 1"));
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(AnalysisError::invalid(
                "initial_balance",
                format!("must be > 0, got {}", self.initial_balance),
            ));
        }
        if self.base_add_amount <= Decimal::ZERO {
            return Err(AnalysisError::invalid(
                "base_add_amount",
                format!("must be > 0, got {}", self.base_add_amount),
            ));
        }
        ensure_non_negative("add_pct", self.add_pct)?;
        ensure_non_negative("take_profit_pct", self.take_profit_pct)?;
        ensure_non_negative("stop_loss_pct", self.stop_loss_pct)?;
        ensure_positive("add_multiple", self.add_multiple)?;
        if !self.add_amount_multiple.is_finite() || self.add_amount_multiple < 1.0 {
            return Err(AnalysisError::invalid(
                "add_amount_multiple",
                format!("must be >= 1, got {}", self.add_amount_multiple),
            ));
        }

        // Every margin a cycle can commit, and its leveraged notional, must be
        // representable before the first bar is processed.
        let cycle_margin = self.max_cycle_margin()?;
        cycle_margin
            .checked_mul(Decimal::from(self.leverage))
            .ok_or_else(|| {
                AnalysisError::invalid(
                    "leverage",
                    format!("{}x on {} margin overflows", self.leverage, cycle_margin),
                )
            })?;
        Ok(())
    }

    pub fn with_direction(mut self, direction: TradeDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Margin committed by the opening entry.
    pub fn entry_margin(&self) -> Decimal {
        self.base_add_amount / Decimal::TWO
    }

    /// Adverse move needed for the next add after `add_count` adds.
    pub fn add_trigger_pct(&self, add_count: u32) -> f64 {
        self.add_pct * self.add_multiple.powi(add_count as i32)
    }

    /// Margin of the next add after `add_count` adds.
    pub fn add_margin(&self, add_count: u32) -> AnalysisResult<Decimal> {
        let exponent = i32::try_from(add_count).unwrap_or(i32::MAX);
        let scale = self.add_amount_multiple.powi(exponent);
        Decimal::try_from(scale)
            .ok()
            .and_then(|scale| self.base_add_amount.checked_mul(scale))
            .ok_or_else(|| {
                AnalysisError::invalid(
                    "add_amount_multiple",
                    format!(
                        "margin of add {} overflows ({} x {}^{})",
                        add_count + 1,
                        self.base_add_amount,
                        self.add_amount_multiple,
                        add_count
                    ),
                )
            })
    }

    /// Margin committed by a cycle that uses every add.
    pub fn max_cycle_margin(&self) -> AnalysisResult<Decimal> {
        let overflow = || AnalysisError::invalid("max_add_times", "total margin per cycle overflows");
        if self.add_amount_multiple == 1.0 {
            return self
                .base_add_amount
                .checked_mul(Decimal::from(self.max_add_times))
                .and_then(|adds| adds.checked_add(self.entry_margin()))
                .ok_or_else(overflow);
        }
        (0..self.max_add_times).try_fold(self.entry_margin(), |total, add_count| {
            total
                .checked_add(self.add_margin(add_count)?)
                .ok_or_else(overflow)
        })
    }
}

/// Checked balance arithmetic; overflow is reported against the margin settings.
fn checked_sum(total: Decimal, amount: Decimal) -> AnalysisResult<Decimal> {
    total.checked_add(amount).ok_or_else(|| {
        AnalysisError::invalid(
            "base_add_amount",
            format!("balance overflows adding {} to {}", amount, total),
        )
    })
}

/// Per-run cycle statistics.
///
/// Closed cycles are classified by the sign of their P&L, not by which
/// threshold fired: a take-profit exit with zero P&L counts as a stop-loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_open_cycles: usize,
    pub take_profit_count: usize,
    pub stop_loss_count: usize,
    /// Sum of positive realized P&L.
    pub total_take_profit_amount: Decimal,
    /// Sum of non-positive realized P&L (zero or negative).
    pub total_stop_loss_amount: Decimal,
}

impl Summary {
    /// Net realized profit across closed cycles.
    pub fn net_profit(&self) -> Decimal {
        self.total_take_profit_amount + self.total_stop_loss_amount
    }

    pub fn closed_cycles(&self) -> usize {
        self.take_profit_count + self.stop_loss_count
    }

    pub fn win_rate(&self) -> f64 {
        let closed = self.closed_cycles();
        if closed == 0 {
            return 0.0;
        }
        self.take_profit_count as f64 / closed as f64
    }

    fn record_close(&mut self, raw_pnl: f64, realized: Decimal) -> AnalysisResult<()> {
        if raw_pnl > 0.0 {
            self.take_profit_count += 1;
            self.total_take_profit_amount = checked_sum(self.total_take_profit_amount, realized)?;
        } else {
            self.stop_loss_count += 1;
            self.total_stop_loss_amount = checked_sum(self.total_stop_loss_amount, realized)?;
        }
        Ok(())
    }
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Parameters used.
    pub params: StrategyParameters,

    /// Trade log in bar order.
    pub trades: Vec<Trade>,

    pub summary: Summary,

    /// Balance after the last trade. Margin of an unclosed cycle stays committed.
    pub final_balance: Decimal,

    /// Cycle still open when the data ended.
    pub open_position: Option<Position>,

    pub bars_processed: usize,
}

impl BacktestResult {
    pub fn direction(&self) -> TradeDirection {
        self.params.direction
    }

    pub fn closes(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| t.is_close())
    }

    /// Balance change relative to the starting balance, in percent.
    pub fn return_pct(&self) -> f64 {
        let initial: f64 = self.params.initial_balance.try_into().unwrap_or(1.0);
        let final_balance: f64 = self.final_balance.try_into().unwrap_or(initial);
        (final_balance - initial) / initial * 100.0
    }

    /// Generate report string.
    pub fn report(&self) -> String {
        format!(
            "Backtest Results ({}, {} bars)\n\
             ----------------------------------------\n\
             Open Cycles: {}\n\
             Take Profit: {} (total {:.2})\n\
             Stop Loss: {} (total {:.2})\n\
             Net Profit: {:.2}\n\
             Final Balance: {:.2}\n\
             Unclosed Cycle: {}",
            self.direction().as_str(),
            self.bars_processed,
            self.summary.total_open_cycles,
            self.summary.take_profit_count,
            self.summary.total_take_profit_amount,
            self.summary.stop_loss_count,
            self.summary.total_stop_loss_amount,
            self.summary.net_profit(),
            self.final_balance,
            if self.open_position.is_some() { "yes" } else { "no" },
        )
    }
}

/// Engine state between bars.
#[derive(Debug)]
enum CycleState {
    Flat,
    InPosition(Position),
}

/// Mutable bookkeeping owned by one run.
struct Ledger<'a> {
    params: &'a StrategyParameters,
    balance: Decimal,
    trades: Vec<Trade>,
    summary: Summary,
}

impl<'a> Ledger<'a> {
    fn new(params: &'a StrategyParameters) -> Self {
        Self {
            params,
            balance: params.initial_balance,
            trades: Vec::new(),
            summary: Summary::default(),
        }
    }

    fn open(&mut self, index: usize, bar: &Bar) -> AnalysisResult<Position> {
        let margin = self.params.entry_margin();
        let position = Position::open(
            self.params.direction,
            index,
            bar.close,
            margin,
            self.params.leverage,
        );
        self.balance = checked_sum(self.balance, -margin)?;
        self.summary.total_open_cycles += 1;
        self.log(index, bar, TradeAction::Open, bar.close, position.total_size);
        Ok(position)
    }

    /// Apply at most one add, then evaluate the exits.
    fn step(
        &mut self,
        mut position: Position,
        index: usize,
        bar: &Bar,
    ) -> AnalysisResult<CycleState> {
        let trigger = match position.direction {
            TradeDirection::Long => bar.low,
            TradeDirection::Short => bar.high,
        };
        if position.add_count < self.params.max_add_times
            && position.adverse_move_pct(trigger) >= self.params.add_trigger_pct(position.add_count)
        {
            let margin = self.params.add_margin(position.add_count)?;
            position.add(trigger, margin, self.params.leverage);
            self.balance = checked_sum(self.balance, -margin)?;
            self.log(index, bar, TradeAction::Add, trigger, position.total_size);
        }

        let pnl_pct_high = position.pnl_pct_at(bar.high);
        let pnl_pct_low = position.pnl_pct_at(bar.low);
        let (reason, exit_price) = if pnl_pct_high >= self.params.take_profit_pct {
            (
                ExitReason::TakeProfit,
                position.price_at_pct(self.params.take_profit_pct),
            )
        } else if pnl_pct_low <= -self.params.stop_loss_pct {
            (
                ExitReason::StopLoss,
                position.price_at_pct(-self.params.stop_loss_pct),
            )
        } else {
            return Ok(CycleState::InPosition(position));
        };

        self.close(position, index, bar, reason, exit_price)?;
        Ok(CycleState::Flat)
    }

    fn close(
        &mut self,
        position: Position,
        index: usize,
        bar: &Bar,
        reason: ExitReason,
        exit_price: f64,
    ) -> AnalysisResult<()> {
        let raw_pnl = position.pnl_at(exit_price);
        let threshold = match reason {
            ExitReason::TakeProfit => "take_profit_pct",
            ExitReason::StopLoss => "stop_loss_pct",
        };
        let realized = Decimal::try_from(raw_pnl)
            .map_err(|_| {
                AnalysisError::invalid(threshold, format!("realized P&L {} is out of range", raw_pnl))
            })?
            .round_dp(2);

        let released = checked_sum(position.margin_committed, realized)?;
        self.balance = checked_sum(self.balance, released)?;
        self.summary.record_close(raw_pnl, realized)?;

        trace!(
            "Closed cycle opened at bar {} on bar {} ({:?}): pnl {}",
            position.entry_index,
            index,
            reason,
            realized
        );

        self.trades.push(Trade {
            timestamp: bar.timestamp,
            bar_index: index,
            action: TradeAction::Close,
            price: exit_price,
            position_size: 0.0,
            balance_after: self.balance,
            realized_pnl: Some(realized),
            realized_pnl_pct: Some(position.pnl_pct_at(exit_price)),
            exit_reason: Some(reason),
        });
        Ok(())
    }

    fn log(&mut self, index: usize, bar: &Bar, action: TradeAction, price: f64, size: f64) {
        self.trades.push(Trade {
            timestamp: bar.timestamp,
            bar_index: index,
            action,
            price,
            position_size: size,
            balance_after: self.balance,
            realized_pnl: None,
            realized_pnl_pct: None,
            exit_reason: None,
        });
    }
}

/// The position-averaging backtest engine.
///
/// Holds only immutable parameters; every `run` owns its own position and
/// trade log, so one engine can be shared across threads.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    params: StrategyParameters,
}

impl BacktestEngine {
    /// Create an engine, validating the parameters up front.
    pub fn new(params: StrategyParameters) -> AnalysisResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &StrategyParameters {
        &self.params
    }

    /// Simulate the strategy over `bars`.
    ///
    /// Fails only when balance arithmetic leaves the `Decimal` range, which
    /// takes extreme prices or exit thresholds on top of validated parameters.
    pub fn run(&self, bars: &[Bar]) -> AnalysisResult<BacktestResult> {
        let mut ledger = Ledger::new(&self.params);
        let mut state = CycleState::Flat;

        for (index, bar) in bars.iter().enumerate() {
            state = match state {
                CycleState::Flat => CycleState::InPosition(ledger.open(index, bar)?),
                CycleState::InPosition(position) => ledger.step(position, index, bar)?,
            };
        }

        let open_position = match state {
            CycleState::InPosition(position) => Some(position),
            CycleState::Flat => None,
        };

        debug!(
            "Backtest {} over {} bars: {} cycles, {} closed, net {}",
            self.params.direction.as_str(),
            bars.len(),
            ledger.summary.total_open_cycles,
            ledger.summary.closed_cycles(),
            ledger.summary.net_profit()
        );

        Ok(BacktestResult {
            params: self.params.clone(),
            trades: ledger.trades,
            summary: ledger.summary,
            final_balance: ledger.balance,
            open_position,
            bars_processed: bars.len(),
        })
    }
}

/// Run one backtest in `direction`, overriding `params.direction`.
pub fn run(
    bars: &[Bar],
    direction: TradeDirection,
    params: &StrategyParameters,
) -> AnalysisResult<BacktestResult> {
    let engine = BacktestEngine::new(params.clone().with_direction(direction))?;
    engine.run(bars)
}

/// Run the long and short variants of `params` side by side.
pub fn run_both(
    bars: &[Bar],
    params: &StrategyParameters,
) -> AnalysisResult<(BacktestResult, BacktestResult)> {
    let long = BacktestEngine::new(params.clone().with_direction(TradeDirection::Long))?;
    let short = BacktestEngine::new(params.clone().with_direction(TradeDirection::Short))?;
    let (long, short) = rayon::join(|| long.run(bars), || short.run(bars));
    Ok((long?, short?))
}
