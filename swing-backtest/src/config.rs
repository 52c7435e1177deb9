//! Analysis configuration loaded from TOML.
//!
//! Every section is optional; missing sections and fields fall back to
//! their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backtest::StrategyParameters;
use crate::error::AnalysisResult;
use crate::optimize::ParameterGrid;
use crate::swing::SwingConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration for one analysis session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub swing: SwingConfig,
    pub strategy: StrategyParameters,
    pub grid: ParameterGrid,
}

impl AnalysisConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the strategy parameters. Swing settings are checked against the
    /// data at detection time.
    pub fn validate(&self) -> AnalysisResult<()> {
        self.strategy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::TradeDirection;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.swing.depth, 10);
        assert_eq!(config.grid.total_combinations(), 9610);
    }

    #[test]
    fn test_partial_sections() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [swing]
            deviation_pct = 3.5

            [strategy]
            initial_balance = 5000
            direction = "short"
            max_add_times = 3

            [grid]
            take_profit_pct = [1.0, 1.5]
            "#,
        )
        .unwrap();

        assert_eq!(config.swing.deviation_pct, 3.5);
        assert_eq!(config.swing.depth, 10);
        assert_eq!(config.strategy.initial_balance, dec!(5000));
        assert_eq!(config.strategy.direction, TradeDirection::Short);
        assert_eq!(config.strategy.max_add_times, 3);
        assert_eq!(config.strategy.leverage, 10);
        assert_eq!(config.grid.take_profit_pct, vec![1.0, 1.5]);
        assert_eq!(config.grid.stop_loss_pct.len(), 10);
    }

    #[test]
    fn test_negative_add_times_rejected() {
        let result = AnalysisConfig::from_toml_str("[strategy]\nmax_add_times = -1\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = AnalysisConfig::default();
        config.strategy.take_profit_pct = 2.5;
        let text = config.to_toml_string().unwrap();
        assert_eq!(AnalysisConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = AnalysisConfig::load("/nonexistent/analysis.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
