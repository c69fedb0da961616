//! Error taxonomy for mutable modules.
//!
//! Every error is surfaced synchronously to the caller. There is no retry and
//! no degraded mode: a violated lifecycle or arity contract stops execution
//! rather than producing a plausible but wrong gradient.

use thiserror::Error;

/// Result alias used throughout the diffnas crates.
pub type Result<T> = std::result::Result<T, MutableError>;

#[derive(Debug, Error)]
pub enum MutableError {
    /// Invalid construction: empty candidate set, duplicate name, bad hyper-parameter.
    #[error("construction error: {0}")]
    Construction(String),

    /// Lifecycle misuse: second fix, forward_fixed / dump_chosen before a choice exists.
    #[error("state error: {0}")]
    State(String),

    /// Input arity or parameter length does not match the candidate set.
    #[error("shape error: expected {expected} {what}, got {actual}")]
    Shape {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The module factory could not build a candidate.
    #[error("factory error: {0}")]
    Factory(String),

    /// Gumbel temperature must be finite and strictly positive.
    #[error("invalid temperature {0}: must be finite and > 0")]
    InvalidTemperature(f64),

    /// Every candidate received a zero weight, so there is nothing to sum.
    #[error("no candidate received a positive weight")]
    EmptySelection,

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl MutableError {
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn factory(msg: impl Into<String>) -> Self {
        Self::Factory(msg.into())
    }

    /// Fails with [`MutableError::Shape`] unless `actual == expected`.
    pub fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::Shape {
                what,
                expected,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_len_reports_both_sides() {
        assert!(MutableError::check_len("inputs", 3, 3).is_ok());
        let err = MutableError::check_len("inputs", 3, 2).unwrap_err();
        assert_eq!(err.to_string(), "shape error: expected 3 inputs, got 2");
    }

    #[test]
    fn candle_errors_convert() {
        let e: MutableError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(e, MutableError::Tensor(_)));
    }
}
