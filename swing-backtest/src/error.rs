//! Errors raised by the analysis core.
//!
//! Only structurally impossible inputs are errors. Empty segment lists,
//! unclosed trailing cycles and empty optimizer grids are reported through
//! sentinel values on the result types instead.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Insufficient data: need at least {required} bars, got {available}")]
    InsufficientData { required: usize, available: usize },
}

impl AnalysisError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Insufficient data is the window-too-large flavour of an invalid parameter.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::InsufficientData { .. }
        )
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Reject NaN, infinities and negative values for a percentage-like input.
pub(crate) fn ensure_non_negative(name: &'static str, value: f64) -> AnalysisResult<()> {
    if !value.is_finite() {
        return Err(AnalysisError::invalid(name, format!("must be finite, got {}", value)));
    }
    if value < 0.0 {
        return Err(AnalysisError::invalid(name, format!("must be >= 0, got {}", value)));
    }
    Ok(())
}

pub(crate) fn ensure_positive(name: &'static str, value: f64) -> AnalysisResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AnalysisError::invalid(name, format!("must be > 0, got {}", value)));
    }
    Ok(())
}
