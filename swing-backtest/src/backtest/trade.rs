//! Trade log and position state for the position-averaging strategy.
//!
//! Handles one open-to-close cycle:
//! - Entry (position creation at half the base amount)
//! - Averaging adds after adverse moves
//! - Exit at the take-profit or stop-loss level implied by the average price

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Direction of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl TryFrom<i32> for TradeDirection {
    type Error = AnalysisError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Long),
            -1 => Ok(Self::Short),
            other => Err(AnalysisError::invalid(
                "direction",
                format!("must be +1 or -1, got {}", other),
            )),
        }
    }
}

/// What a trade log entry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Add,
    Close,
}

/// Which threshold closed the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

/// One entry of the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub bar_index: usize,
    pub action: TradeAction,
    /// Fill price (entry close, add trigger, or theoretical exit level).
    pub price: f64,
    /// Position size after this entry; 0 after a close.
    pub position_size: f64,
    /// Account balance after this entry.
    pub balance_after: Decimal,
    /// Realized P&L, rounded to cents. Only set on `Close`.
    pub realized_pnl: Option<Decimal>,
    /// Realized move relative to the average price, in percent. Only set on `Close`.
    pub realized_pnl_pct: Option<f64>,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    pub fn is_close(&self) -> bool {
        self.action == TradeAction::Close
    }
}

/// An open averaging position. Lives for one open-to-close cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: TradeDirection,
    pub entry_index: usize,
    pub entry_price: f64,
    /// Size-weighted mean fill price.
    pub average_price: f64,
    pub total_size: f64,
    /// Margin taken from the balance by the entry and every add.
    pub margin_committed: Decimal,
    pub add_count: u32,
    /// Price of the most recent fill (entry or add).
    pub last_add_price: f64,
}

impl Position {
    /// Open at `price` committing `margin` at `leverage`.
    pub fn open(
        direction: TradeDirection,
        entry_index: usize,
        price: f64,
        margin: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            direction,
            entry_index,
            entry_price: price,
            average_price: price,
            total_size: notional_size(margin, leverage, price),
            margin_committed: margin,
            add_count: 0,
            last_add_price: price,
        }
    }

    /// Adverse move from the last fill to `price`, in percent (positive = against us).
    pub fn adverse_move_pct(&self, price: f64) -> f64 {
        (price - self.last_add_price) / self.last_add_price * 100.0 * self.direction.sign() * -1.0
    }

    /// Unrealized P&L at `price` relative to the average price, in percent.
    pub fn pnl_pct_at(&self, price: f64) -> f64 {
        (price - self.average_price) / self.average_price * 100.0 * self.direction.sign()
    }

    /// Average into the position at `price` with `margin`.
    pub fn add(&mut self, price: f64, margin: Decimal, leverage: u32) {
        let qty = notional_size(margin, leverage, price);
        self.average_price =
            (self.average_price * self.total_size + price * qty) / (self.total_size + qty);
        self.total_size += qty;
        self.margin_committed += margin;
        self.add_count += 1;
        self.last_add_price = price;
    }

    /// Price `pct` percent from the average in the trade's favour (negative = against).
    pub fn price_at_pct(&self, pct: f64) -> f64 {
        self.average_price * (1.0 + pct / 100.0 * self.direction.sign())
    }

    /// P&L of closing the whole position at `exit_price`.
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        self.total_size * (exit_price - self.average_price) * self.direction.sign()
    }
}

/// Units bought with `margin` at `leverage` and `price`.
fn notional_size(margin: Decimal, leverage: u32, price: f64) -> f64 {
    let margin: f64 = margin.try_into().unwrap_or(0.0);
    margin * leverage as f64 / price
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_from_sign() {
        assert_eq!(TradeDirection::try_from(1).unwrap(), TradeDirection::Long);
        assert_eq!(TradeDirection::try_from(-1).unwrap(), TradeDirection::Short);
        assert!(TradeDirection::try_from(0).is_err());
    }

    #[test]
    fn test_open_size() {
        let pos = Position::open(TradeDirection::Long, 0, 100.0, dec!(50), 10);
        assert_relative_eq!(pos.total_size, 5.0);
        assert_eq!(pos.average_price, 100.0);
        assert_eq!(pos.add_count, 0);
    }

    #[test]
    fn test_add_recomputes_average() {
        let mut pos = Position::open(TradeDirection::Long, 0, 100.0, dec!(50), 10);
        // 100 margin * 10 / 80 = 12.5 units
        pos.add(80.0, dec!(100), 10);
        assert_relative_eq!(pos.total_size, 17.5);
        assert_relative_eq!(pos.average_price, (500.0 + 1000.0) / 17.5, epsilon = 1e-12);
        assert_eq!(pos.margin_committed, dec!(150));
        assert_eq!(pos.add_count, 1);
        assert_eq!(pos.last_add_price, 80.0);
    }

    #[test]
    fn test_adverse_move_sign() {
        let long = Position::open(TradeDirection::Long, 0, 100.0, dec!(50), 10);
        assert_relative_eq!(long.adverse_move_pct(98.0), 2.0, epsilon = 1e-12);
        let short = Position::open(TradeDirection::Short, 0, 100.0, dec!(50), 10);
        assert_relative_eq!(short.adverse_move_pct(103.0), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_short_exit_levels() {
        let short = Position::open(TradeDirection::Short, 0, 200.0, dec!(50), 10);
        assert_relative_eq!(short.price_at_pct(2.0), 196.0, epsilon = 1e-9);
        assert_relative_eq!(short.price_at_pct(-5.0), 210.0, epsilon = 1e-9);
        assert!(short.pnl_at(196.0) > 0.0);
    }
}
