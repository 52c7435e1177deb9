//! Parameter optimization module.
//!
//! Grid search over the averaging and exit thresholds, evaluated in
//! parallel with a deterministic tie-break.

pub mod optimizer;

pub use optimizer::{
    float_range, optimize, BestParameters, Evaluation, OptimizationResult, ParameterGrid,
    ParameterOptimizer, ParameterSet,
};
