//! Error types shared by the samplers, the chain runner and the diagnostics.

use thiserror::Error;

/// Everything that can go wrong while building a sampler, running a chain or
/// summarizing a finished run.
///
/// Configuration and start-state errors are returned by constructors, before any
/// iteration runs. Errors raised mid-chain abort only that chain; the chain runner
/// records them next to the partial draws (see [`crate::core::ChainRun`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmcError {
    /// The target density is zero at the initial state, so the chain can never
    /// legally move.
    #[error("target density is zero at the start state {state:?}")]
    InvalidStart {
        /// The offending start state, converted to `f64`.
        state: Vec<f64>,
    },

    /// A parameter was rejected before sampling started.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The target density or its gradient produced NaN or an infinity where the
    /// value must be finite.
    #[error("numeric evaluation failed: {0}")]
    NumericEvaluation(String),

    /// Diagnostics were requested for draws whose within-chain variance is zero.
    #[error("zero within-chain variance for coordinate {coordinate}; R-hat is undefined")]
    DegenerateChain {
        /// Index of the state coordinate with zero variance.
        coordinate: usize,
    },

    /// The run deadline passed before the requested number of iterations.
    #[error("deadline exceeded after {completed} of {requested} iterations")]
    DeadlineExceeded {
        /// Iterations finished before the deadline.
        completed: usize,
        /// Iterations originally requested.
        requested: usize,
    },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, McmcError>;
