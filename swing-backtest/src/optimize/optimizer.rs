//! Brute-force parameter search.
//!
//! Sweeps `add_pct`, `take_profit_pct` and `stop_loss_pct` over a Cartesian
//! grid with every other parameter held fixed, and keeps the combination with
//! the greatest net profit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::{BacktestEngine, StrategyParameters};
use crate::data::Bar;
use crate::error::AnalysisResult;

/// Parameter values to sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterGrid {
    /// Add trigger percentages.
    pub add_pct: Vec<f64>,
    /// Take-profit percentages.
    pub take_profit_pct: Vec<f64>,
    /// Stop-loss percentages.
    pub stop_loss_pct: Vec<f64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            add_pct: float_range(1.0, 4.0, 0.1),
            take_profit_pct: float_range(1.0, 4.0, 0.1),
            stop_loss_pct: float_range(1.0, 10.0, 1.0),
        }
    }
}

impl ParameterGrid {
    /// Calculate total number of parameter combinations.
    pub fn total_combinations(&self) -> usize {
        self.add_pct.len() * self.take_profit_pct.len() * self.stop_loss_pct.len()
    }

    /// Generate all parameter combinations: `add_pct` outer, `take_profit_pct`
    /// middle, `stop_loss_pct` inner.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        let mut combos = Vec::with_capacity(self.total_combinations());

        for &add_pct in &self.add_pct {
            for &take_profit_pct in &self.take_profit_pct {
                for &stop_loss_pct in &self.stop_loss_pct {
                    combos.push(ParameterSet {
                        add_pct,
                        take_profit_pct,
                        stop_loss_pct,
                    });
                }
            }
        }

        combos
    }
}

/// Inclusive range `start..=end` by `step`, rounded to 6 decimals so that
/// accumulated float error does not leak into the grid values.
///
/// Empty when `step` is not positive or `end < start`.
pub fn float_range(start: f64, end: f64, step: f64) -> Vec<f64> {
    if !step.is_finite() || step <= 0.0 || !start.is_finite() || !end.is_finite() || end < start {
        return Vec::new();
    }
    let steps = ((end - start) / step + 1e-9).floor() as usize;
    (0..=steps)
        .map(|i| ((start + step * i as f64) * 1e6).round() / 1e6)
        .collect()
}

/// A single grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub add_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl ParameterSet {
    /// Overlay this grid point on `base`.
    pub fn apply_to(&self, base: &StrategyParameters) -> StrategyParameters {
        StrategyParameters {
            add_pct: self.add_pct,
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
            ..base.clone()
        }
    }

    /// Create a unique key for this parameter set.
    pub fn key(&self) -> String {
        format!(
            "add{:.2}_tp{:.2}_sl{:.2}",
            self.add_pct, self.take_profit_pct, self.stop_loss_pct
        )
    }
}

/// Outcome of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Position in enumeration order.
    pub index: usize,
    pub set: ParameterSet,
    pub net_profit: Decimal,
    pub closed_cycles: usize,
    pub win_rate: f64,
}

impl Evaluation {
    /// Greater net profit wins; exact ties go to the earlier enumeration index.
    fn better<'a>(a: &'a Evaluation, b: &'a Evaluation) -> &'a Evaluation {
        match a.net_profit.cmp(&b.net_profit) {
            std::cmp::Ordering::Greater => a,
            std::cmp::Ordering::Less => b,
            std::cmp::Ordering::Equal => {
                if a.index <= b.index {
                    a
                } else {
                    b
                }
            }
        }
    }
}

/// The winning combination, merged into the fixed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestParameters {
    pub params: StrategyParameters,
    pub net_profit: Decimal,
    pub index: usize,
}

/// Complete optimization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// `None` when no combination was evaluated.
    pub best: Option<BestParameters>,
    /// Evaluated grid points in enumeration order.
    pub evaluations: Vec<Evaluation>,
    pub total_combinations: usize,
    /// The sweep was stopped before every combination ran.
    pub cancelled: bool,
}

impl OptimizationResult {
    /// Top `n` evaluations by net profit, ties by enumeration order.
    pub fn leaderboard(&self, n: usize) -> Vec<&Evaluation> {
        let mut ranked: Vec<&Evaluation> = self.evaluations.iter().collect();
        ranked.sort_by(|a, b| {
            b.net_profit
                .cmp(&a.net_profit)
                .then_with(|| a.index.cmp(&b.index))
        });
        ranked.truncate(n);
        ranked
    }

    /// Get summary string.
    pub fn summary(&self) -> String {
        let best = match &self.best {
            Some(best) => format!(
                "add {:.2}% | take profit {:.2}% | stop loss {:.2}% | net {:.2}",
                best.params.add_pct,
                best.params.take_profit_pct,
                best.params.stop_loss_pct,
                best.net_profit
            ),
            None => "none".to_string(),
        };
        format!(
            "Optimization Results: {}/{} combinations{}\n\
             Best: {}",
            self.evaluations.len(),
            self.total_combinations,
            if self.cancelled { " (cancelled)" } else { "" },
            best
        )
    }
}

/// Grid-search optimizer over the position-averaging strategy.
pub struct ParameterOptimizer {
    params: StrategyParameters,
    grid: ParameterGrid,
    cancel: Option<Arc<AtomicBool>>,
}

impl ParameterOptimizer {
    /// Create an optimizer holding `params` fixed outside the default grid.
    pub fn new(params: StrategyParameters) -> Self {
        Self {
            params,
            grid: ParameterGrid::default(),
            cancel: None,
        }
    }

    pub fn with_grid(mut self, grid: ParameterGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Combinations not yet started once `flag` is set are skipped.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Run every combination over `bars`.
    pub fn optimize(&self, bars: &[Bar]) -> AnalysisResult<OptimizationResult> {
        self.params.validate()?;

        // Every combination is checked before the first run.
        let engines: Vec<(ParameterSet, BacktestEngine)> = self
            .grid
            .combinations()
            .into_iter()
            .map(|set| Ok((set, BacktestEngine::new(set.apply_to(&self.params))?)))
            .collect::<AnalysisResult<_>>()?;

        let total = engines.len();
        info!(
            "Optimizing {} {} combinations over {} bars",
            total,
            self.params.direction.as_str(),
            bars.len()
        );

        let progress = Arc::new(AtomicUsize::new(0));
        let evaluations: Vec<Evaluation> = engines
            .par_iter()
            .enumerate()
            .filter_map(|(index, (set, engine))| {
                if self.is_cancelled() {
                    return None;
                }
                let result = match engine.run(bars) {
                    Ok(result) => result,
                    Err(err) => return Some(Err(err)),
                };

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % (total / 10).max(1) == 0 || done == total {
                    let pct = done as f64 / total as f64 * 100.0;
                    info!("  {:.0}% ({}/{} combinations)", pct, done, total);
                }

                Some(Ok(Evaluation {
                    index,
                    set: *set,
                    net_profit: result.summary.net_profit(),
                    closed_cycles: result.summary.closed_cycles(),
                    win_rate: result.summary.win_rate(),
                }))
            })
            .collect::<AnalysisResult<_>>()?;

        let cancelled = evaluations.len() < total;
        let best = evaluations
            .par_iter()
            .reduce_with(Evaluation::better)
            .map(|winner| BestParameters {
                params: winner.set.apply_to(&self.params),
                net_profit: winner.net_profit,
                index: winner.index,
            });

        match &best {
            Some(best) => info!(
                "Best: {} net {}",
                engines[best.index].0.key(),
                best.net_profit
            ),
            None => info!("No combination evaluated"),
        }

        Ok(OptimizationResult {
            best,
            evaluations,
            total_combinations: total,
            cancelled,
        })
    }
}

/// Search `grid` with every other parameter taken from `fixed_params`.
pub fn optimize(
    bars: &[Bar],
    fixed_params: &StrategyParameters,
    grid: &ParameterGrid,
) -> AnalysisResult<OptimizationResult> {
    ParameterOptimizer::new(fixed_params.clone())
        .with_grid(grid.clone())
        .optimize(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{run, TradeDirection};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bars(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Bar::new(start + Duration::hours(i as i64), o, h, l, c))
            .collect()
    }

    fn grid(add: &[f64], tp: &[f64], sl: &[f64]) -> ParameterGrid {
        ParameterGrid {
            add_pct: add.to_vec(),
            take_profit_pct: tp.to_vec(),
            stop_loss_pct: sl.to_vec(),
        }
    }

    fn rising() -> Vec<Bar> {
        bars(&[(100.0, 100.0, 100.0, 100.0), (100.0, 104.0, 100.0, 104.0)])
    }

    #[test]
    fn test_float_range() {
        let values = float_range(1.0, 4.0, 0.1);
        assert_eq!(values.len(), 31);
        assert_eq!(values[0], 1.0);
        assert_eq!(values[3], 1.3);
        assert_eq!(values[30], 4.0);
        assert!(float_range(1.0, 0.0, 0.1).is_empty());
        assert!(float_range(1.0, 2.0, 0.0).is_empty());
    }

    #[test]
    fn test_default_grid_size() {
        let grid = ParameterGrid::default();
        assert_eq!(grid.stop_loss_pct.len(), 10);
        assert_eq!(grid.total_combinations(), 31 * 31 * 10);
    }

    #[test]
    fn test_combination_order() {
        let keys: Vec<String> = grid(&[1.0, 2.0], &[1.5], &[5.0, 6.0])
            .combinations()
            .iter()
            .map(ParameterSet::key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "add1.00_tp1.50_sl5.00",
                "add1.00_tp1.50_sl6.00",
                "add2.00_tp1.50_sl5.00",
                "add2.00_tp1.50_sl6.00",
            ]
        );
    }

    #[test]
    fn test_single_combination_matches_engine() {
        let data = rising();
        let fixed = StrategyParameters::default();
        let result = optimize(&data, &fixed, &grid(&[2.0], &[2.0], &[10.0])).unwrap();

        let mut expected_params = fixed.clone();
        expected_params.take_profit_pct = 2.0;
        let expected = run(&data, TradeDirection::Long, &expected_params).unwrap();

        let best = result.best.unwrap();
        assert_eq!(best.net_profit, expected.summary.net_profit());
        assert_eq!(best.net_profit, dec!(10));
        assert_eq!(best.params, expected_params);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_ties_go_to_first_enumerated() {
        // Stop-loss never fires, so both combinations earn the same.
        let result = optimize(
            &rising(),
            &StrategyParameters::default(),
            &grid(&[2.0], &[2.0], &[5.0, 6.0]),
        )
        .unwrap();

        assert_eq!(result.evaluations[0].net_profit, result.evaluations[1].net_profit);
        let best = result.best.unwrap();
        assert_eq!(best.index, 0);
        assert_eq!(best.params.stop_loss_pct, 5.0);
    }

    #[test]
    fn test_greatest_net_profit_wins() {
        let result = optimize(
            &rising(),
            &StrategyParameters::default(),
            &grid(&[2.0], &[1.0, 2.0, 3.0], &[10.0]),
        )
        .unwrap();

        let best = result.best.as_ref().unwrap();
        assert_eq!(best.params.take_profit_pct, 3.0);
        assert_eq!(best.net_profit, dec!(15));

        let top: Vec<usize> = result.leaderboard(2).iter().map(|e| e.index).collect();
        assert_eq!(top, vec![2, 1]);
    }

    #[test]
    fn test_empty_grid_returns_sentinel() {
        let result = optimize(
            &rising(),
            &StrategyParameters::default(),
            &grid(&[], &[1.0], &[1.0]),
        )
        .unwrap();
        assert!(result.best.is_none());
        assert_eq!(result.total_combinations, 0);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_invalid_grid_value_rejected() {
        let err = optimize(
            &rising(),
            &StrategyParameters::default(),
            &grid(&[2.0], &[1.0, -1.0], &[5.0]),
        )
        .unwrap_err();
        assert!(err.is_invalid_parameter());
    }

    #[test]
    fn test_cancel_flag_skips_remaining() {
        let flag = Arc::new(AtomicBool::new(true));
        let result = ParameterOptimizer::new(StrategyParameters::default())
            .with_grid(grid(&[2.0], &[1.0, 2.0], &[5.0]))
            .with_cancel_flag(flag)
            .optimize(&rising())
            .unwrap();

        assert!(result.cancelled);
        assert!(result.best.is_none());
        assert!(result.evaluations.is_empty());
    }
}
