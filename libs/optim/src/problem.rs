//! Figures of merit and the problems that compute them.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::Bounds;

/// Whether the figure of merit should be maximized or minimized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    #[default]
    Maximize,
    Minimize,
}

impl Goal {
    /// Factor that turns the figure of merit into a quantity to minimize.
    pub fn sign(&self) -> f64 {
        match self {
            Goal::Maximize => -1.,
            Goal::Minimize => 1.,
        }
    }

    /// Whether `a` is a better figure of merit than `b`.
    pub fn improves(&self, a: f64, b: f64) -> bool {
        match self {
            Goal::Maximize => a > b,
            Goal::Minimize => a < b,
        }
    }
}

/// A figure of merit and its gradient with respect to every parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FomRecord {
    pub fom: f64,
    pub gradient: Vec<f64>,
}

/// A figure of merit that can be evaluated and differentiated.
///
/// The optimizer calls [`Problem::evaluate`] before [`Problem::gradient`] at
/// every accepted point, so implementations may reuse state from the forward
/// evaluation when computing the gradient.
pub trait Problem {
    /// Computes the figure of merit at `params`.
    fn evaluate(&mut self, params: &[f64]) -> Result<f64>;

    /// Computes the gradient of the figure of merit at `params`.
    fn gradient(&mut self, params: &[f64]) -> Result<Vec<f64>>;
}

impl<P: Problem + ?Sized> Problem for &mut P {
    fn evaluate(&mut self, params: &[f64]) -> Result<f64> {
        (**self).evaluate(params)
    }

    fn gradient(&mut self, params: &[f64]) -> Result<Vec<f64>> {
        (**self).gradient(params)
    }
}

/// A [`Problem`] as seen by an optimizer: minimized, in scaled coordinates.
///
/// Optimizers work on `params * scale`. The problem always receives
/// unscaled parameters clamped into their bounds.
pub struct Objective<'a> {
    problem: &'a mut dyn Problem,
    goal: Goal,
    scale: f64,
    bounds: &'a Bounds,
    evaluations: usize,
}

impl<'a> Objective<'a> {
    pub fn new(problem: &'a mut dyn Problem, goal: Goal, scale: f64, bounds: &'a Bounds) -> Self {
        Self {
            problem,
            goal,
            scale,
            bounds,
            evaluations: 0,
        }
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Number of figure of merit evaluations so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Converts scaled coordinates into the parameters the problem sees.
    pub fn unscale(&self, x: &[f64]) -> Vec<f64> {
        let mut params: Vec<f64> = x.iter().map(|v| v / self.scale).collect();
        self.bounds.project(&mut params);
        params
    }

    /// Value to minimize at scaled point `x`.
    pub fn value(&mut self, x: &[f64]) -> Result<f64> {
        let params = self.unscale(x);
        let fom = self.problem.evaluate(&params)?;
        self.evaluations += 1;
        tracing::debug!(fom, evaluation = self.evaluations, "evaluated figure of merit");
        Ok(self.goal.sign() * fom)
    }

    /// Gradient of [`Objective::value`] with respect to scaled coordinates.
    pub fn gradient(&mut self, x: &[f64]) -> Result<Vec<f64>> {
        let params = self.unscale(x);
        let gradient = self.problem.gradient(&params)?;
        self.bounds.check_len(gradient.len())?;
        let factor = self.goal.sign() / self.scale;
        Ok(gradient.into_iter().map(|g| g * factor).collect())
    }

    /// Converts a minimized value and scaled gradient back into a record in
    /// the problem's own terms.
    pub fn record(&self, value: f64, gradient: &[f64]) -> FomRecord {
        let sign = self.goal.sign();
        FomRecord {
            fom: sign * value,
            gradient: gradient.iter().map(|g| g * sign * self.scale).collect(),
        }
    }
}
