//! The interface shared by all optimizers.

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::params::Bounds;
use crate::problem::Objective;

/// An accepted point in scaled coordinates, with the minimized value and its
/// gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterate {
    pub x: Vec<f64>,
    pub value: f64,
    pub gradient: Vec<f64>,
}

impl Iterate {
    /// Evaluates the value, then the gradient, at `x`.
    pub fn at(objective: &mut Objective<'_>, x: Vec<f64>) -> Result<Self> {
        let value = objective.value(&x)?;
        let gradient = objective.gradient(&x)?;
        Ok(Self { x, value, gradient })
    }
}

/// Why an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The iteration budget was used up.
    MaxIter,
    /// The relative reduction of the figure of merit fell below `ftol`.
    Ftol,
    /// The projected gradient fell below `pgtol`.
    Pgtol,
    /// No step along the search direction decreased the objective.
    LineSearch,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StopReason::MaxIter => "maximum number of iterations reached",
            StopReason::Ftol => "relative reduction of the figure of merit <= ftol",
            StopReason::Pgtol => "norm of projected gradient <= pgtol",
            StopReason::LineSearch => "line search failed",
        };
        write!(f, "{msg}")
    }
}

/// The outcome of one optimizer iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Moved to a new point.
    Moved(Iterate),
    /// Moved to a new point, after which the optimizer has converged.
    Converged(Iterate, StopReason),
    /// Did not move.
    Stopped(StopReason),
}

/// A bounded optimizer working on scaled coordinates.
///
/// Every point passed to the objective and every point returned from
/// [`Optimizer::step`] must lie within `bounds`.
pub trait Optimizer {
    /// Iteration budget.
    fn max_iter(&self) -> usize;

    /// Factor applied to parameters before they are seen by the optimizer.
    fn scaling_factor(&self) -> f64 {
        1.
    }

    /// Clears state left over from a previous run.
    fn reset(&mut self) {}

    /// Performs one iteration starting from `current`.
    fn step(
        &mut self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
    ) -> Result<Step>;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn max_iter(&self) -> usize {
        (**self).max_iter()
    }

    fn scaling_factor(&self) -> f64 {
        (**self).scaling_factor()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn step(
        &mut self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
    ) -> Result<Step> {
        (**self).step(objective, bounds, current)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

pub(crate) fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0., |acc: f64, x| acc.max(x.abs()))
}
