//! Bounded gradient-based optimization of a figure of merit.
//!
//! A [`Problem`] computes a figure of merit and its gradient. An
//! [`Optimization`] runs an [`Optimizer`] over it from a [`ParamVector`],
//! keeping every parameter within its bounds and recording the history of
//! accepted points.

pub mod error;
pub mod gradient_descent;
pub mod lbfgsb;
pub mod optimization;
pub mod optimizer;
pub mod params;
pub mod problem;

pub use error::{Error, Result};
pub use gradient_descent::{AdaptiveGradientDescent, FixedStepGradientDescent};
pub use lbfgsb::Lbfgsb;
pub use optimization::{HistoryEntry, Optimization, OptimizationResult};
pub use optimizer::{Iterate, Optimizer, Step, StopReason};
pub use params::{Bounds, ParamVector};
pub use problem::{FomRecord, Goal, Objective, Problem};

#[cfg(test)]
mod tests;
