//! Projected limited-memory BFGS for box-constrained problems.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::optimizer::{Iterate, Optimizer, Step, StopReason, dot, max_abs};
use crate::params::Bounds;
use crate::problem::Objective;

/// Sufficient decrease constant of the Armijo condition.
const ARMIJO: f64 = 1e-4;
/// Step halvings tried before a search direction is abandoned.
const MAX_BACKTRACKS: usize = 30;

/// Bounded quasi-Newton optimizer.
///
/// Directions come from the two-loop L-BFGS recursion, with components that
/// would push a parameter already at its bound removed. Steps follow the
/// projected path and are accepted by backtracking until the Armijo
/// condition holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Lbfgsb {
    pub max_iter: usize,
    /// Stop once the largest projected gradient component is at most this.
    pub pgtol: f64,
    /// Stop once `(f_k - f_k+1) / max(|f_k|, |f_k+1|, 1)` is at most this.
    pub ftol: f64,
    /// Number of correction pairs kept.
    pub memory: usize,
    pub scaling_factor: f64,
    /// When positive, the first step moves the parameter with the largest
    /// gradient by this much (in scaled units). Zero disables it.
    pub scale_initial_gradient_to: f64,
    #[serde(skip)]
    corrections: VecDeque<Correction>,
}

#[derive(Debug, Clone)]
struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

impl Default for Lbfgsb {
    fn default() -> Self {
        Self {
            max_iter: 100,
            pgtol: 1e-5,
            ftol: 1e-12,
            memory: 10,
            scaling_factor: 1.,
            scale_initial_gradient_to: 0.,
            corrections: VecDeque::new(),
        }
    }
}

impl Lbfgsb {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            ..Default::default()
        }
    }

    pub fn with_scaling_factor(mut self, scaling_factor: f64) -> Self {
        self.scaling_factor = scaling_factor;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.scaling_factor.is_finite() && self.scaling_factor > 0.) {
            return Err(Error::Config(format!(
                "scaling factor must be positive, got {}",
                self.scaling_factor
            )));
        }
        if self.memory == 0 {
            return Err(Error::Config("memory must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `-H g` from the stored corrections.
    fn quasi_newton_direction(&self, gradient: &[f64]) -> Vec<f64> {
        let mut q = gradient.to_vec();
        let mut alphas = Vec::with_capacity(self.corrections.len());
        for c in self.corrections.iter().rev() {
            let alpha = c.rho * dot(&c.s, &q);
            for (q, y) in q.iter_mut().zip(&c.y) {
                *q -= alpha * y;
            }
            alphas.push(alpha);
        }
        if let Some(c) = self.corrections.back() {
            let gamma = dot(&c.s, &c.y) / dot(&c.y, &c.y);
            q.iter_mut().for_each(|q| *q *= gamma);
        }
        for (c, alpha) in self.corrections.iter().zip(alphas.into_iter().rev()) {
            let beta = c.rho * dot(&c.y, &q);
            for (q, s) in q.iter_mut().zip(&c.s) {
                *q += s * (alpha - beta);
            }
        }
        q.into_iter().map(|v| -v).collect()
    }

    /// Steepest descent, normalized so the first step has a sensible length.
    fn gradient_direction(&self, gradient: &[f64], first: bool) -> Vec<f64> {
        let factor = if first && self.scale_initial_gradient_to > 0. {
            self.scale_initial_gradient_to / max_abs(gradient)
        } else {
            1. / dot(gradient, gradient).sqrt()
        };
        gradient.iter().map(|g| -g * factor).collect()
    }

    fn line_search(
        &self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
        mut direction: Vec<f64>,
    ) -> Result<Option<(Vec<f64>, f64)>> {
        for ((d, x), &(min, max)) in direction.iter_mut().zip(&current.x).zip(bounds.iter()) {
            if (*x <= min && *d < 0.) || (*x >= max && *d > 0.) {
                *d = 0.;
            }
        }
        let mut t = 1.;
        for _ in 0..MAX_BACKTRACKS {
            let mut x: Vec<f64> = current
                .x
                .iter()
                .zip(&direction)
                .map(|(x, d)| x + t * d)
                .collect();
            bounds.project(&mut x);
            let displacement: Vec<f64> = x.iter().zip(&current.x).map(|(a, b)| a - b).collect();
            let slope = dot(&current.gradient, &displacement);
            if slope >= 0. {
                // Projection turned the step uphill or flattened it out.
                t *= 0.5;
                continue;
            }
            let value = objective.value(&x)?;
            if value <= current.value + ARMIJO * slope {
                return Ok(Some((x, value)));
            }
            t *= 0.5;
        }
        Ok(None)
    }

    fn projected_gradient_norm(bounds: &Bounds, current: &Iterate) -> f64 {
        current
            .x
            .iter()
            .zip(&current.gradient)
            .zip(bounds.iter())
            .map(|((x, g), &(min, max))| ((x - g).clamp(min, max) - x).abs())
            .fold(0., f64::max)
    }
}

impl Optimizer for Lbfgsb {
    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    fn reset(&mut self) {
        self.corrections.clear();
    }

    fn step(
        &mut self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
    ) -> Result<Step> {
        self.validate()?;
        if Self::projected_gradient_norm(bounds, current) <= self.pgtol {
            return Ok(Step::Stopped(StopReason::Pgtol));
        }

        let first = self.corrections.is_empty();
        let direction = if first {
            self.gradient_direction(&current.gradient, true)
        } else {
            self.quasi_newton_direction(&current.gradient)
        };
        let accepted = match self.line_search(objective, bounds, current, direction)? {
            Some(accepted) => Some(accepted),
            None if !first => {
                tracing::debug!("quasi-Newton direction failed; restarting from steepest descent");
                self.corrections.clear();
                let direction = self.gradient_direction(&current.gradient, false);
                self.line_search(objective, bounds, current, direction)?
            }
            None => None,
        };
        let Some((x, value)) = accepted else {
            return Ok(Step::Stopped(StopReason::LineSearch));
        };

        let gradient = objective.gradient(&x)?;
        let s: Vec<f64> = x.iter().zip(&current.x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = gradient
            .iter()
            .zip(&current.gradient)
            .map(|(a, b)| a - b)
            .collect();
        let sy = dot(&s, &y);
        // Skip updates that would lose positive definiteness.
        if sy > f64::EPSILON * dot(&y, &y) {
            if self.corrections.len() == self.memory {
                self.corrections.pop_front();
            }
            self.corrections.push_back(Correction { s, y, rho: 1. / sy });
        }

        let reduction = (current.value - value) / current.value.abs().max(value.abs()).max(1.);
        let next = Iterate { x, value, gradient };
        if reduction <= self.ftol {
            return Ok(Step::Converged(next, StopReason::Ftol));
        }
        if Self::projected_gradient_norm(bounds, &next) <= self.pgtol {
            return Ok(Step::Converged(next, StopReason::Pgtol));
        }
        Ok(Step::Moved(next))
    }
}
