pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod optimize;
pub mod swing;
pub mod validation;

// Re-export commonly used types
pub use backtest::{
    run, run_both, BacktestEngine, BacktestResult, ExitReason, Position, StrategyParameters,
    Summary, Trade, TradeAction, TradeDirection,
};
pub use config::{AnalysisConfig, ConfigError};
pub use data::{Bar, BarLoader, BarSeries, LoaderError, TimeWindow};
pub use error::{AnalysisError, AnalysisResult};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use optimize::{optimize, OptimizationResult, ParameterGrid, ParameterOptimizer};
pub use swing::{detect, Segment, SegmentDirection, SwingAnalysis, SwingConfig, SwingDetector, SwingPoint};
pub use validation::{BarIntegrityValidator, IntegrityReport};
