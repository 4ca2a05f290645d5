//! Optimization errors.

use thiserror::Error as ThisError;

/// The result type returned by optimizers and problems.
pub type Result<T> = std::result::Result<T, Error>;

/// Possible optimization errors.
#[derive(ThisError, Debug)]
pub enum Error {
    /// I/O error.
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// A bound interval is empty or not finite.
    #[error("invalid bound {index}: ({min}, {max}); bound ranges must be positive")]
    InvalidBound { index: usize, min: f64, max: f64 },
    /// Two vectors that must have the same length do not.
    #[error("length mismatch: expected {expected} components, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// An optimizer setting is out of range.
    #[error("invalid optimizer setting: {0}")]
    Config(String),
    /// The problem failed to evaluate the figure of merit or its gradient.
    #[error("problem evaluation failed")]
    Problem(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an error raised while evaluating a problem.
    pub fn problem(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Problem(err.into())
    }
}
