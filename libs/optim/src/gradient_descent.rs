//! Gradient descent with fixed or adaptive steps.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::optimizer::{Iterate, Optimizer, Step, max_abs};
use crate::params::Bounds;
use crate::problem::Objective;

/// Change to apply to a point with minimized gradient `gradient`.
///
/// The parameter with the largest gradient moves by `dx` and the others
/// proportionally. With `all_params_equal`, every parameter moves by `dx`
/// against the sign of its gradient.
fn change(gradient: &[f64], dx: f64, all_params_equal: bool) -> Vec<f64> {
    if all_params_equal {
        gradient
            .iter()
            .map(|g| if *g < 0. { dx } else { -dx })
            .collect()
    } else {
        let largest = max_abs(gradient);
        if largest == 0. {
            return vec![0.; gradient.len()];
        }
        gradient.iter().map(|g| -g / largest * dx).collect()
    }
}

fn apply(x: &[f64], change: &[f64], bounds: &Bounds) -> Vec<f64> {
    let mut next: Vec<f64> = x.iter().zip(change).map(|(x, c)| x + c).collect();
    bounds.project(&mut next);
    next
}

/// Gradient descent with a fixed step and optional uniform noise.
///
/// Step sizes are given in unscaled parameter units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedStepGradientDescent {
    /// Largest change of any parameter per iteration.
    pub max_dx: f64,
    pub all_params_equal: bool,
    /// Amplitude of the noise added to every parameter, for problems with
    /// many local optima.
    pub noise_magnitude: f64,
    pub max_iter: usize,
    pub scaling_factor: f64,
    /// Seed of the noise generator.
    pub seed: u64,
    #[serde(skip)]
    rng: Option<StdRng>,
}

impl Default for FixedStepGradientDescent {
    fn default() -> Self {
        Self {
            max_dx: 0.05,
            all_params_equal: false,
            noise_magnitude: 0.,
            max_iter: 100,
            scaling_factor: 1.,
            seed: 0,
            rng: None,
        }
    }
}

impl FixedStepGradientDescent {
    pub fn new(max_dx: f64, max_iter: usize) -> Self {
        Self {
            max_dx,
            max_iter,
            ..Default::default()
        }
    }

    /// Adds uniform noise of the given amplitude to every update.
    pub fn with_noise(mut self, noise_magnitude: f64) -> Self {
        self.noise_magnitude = noise_magnitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_all_params_equal(mut self, all_params_equal: bool) -> Self {
        self.all_params_equal = all_params_equal;
        self
    }

    pub fn with_scaling_factor(mut self, scaling_factor: f64) -> Self {
        self.scaling_factor = scaling_factor;
        self
    }
}

impl Optimizer for FixedStepGradientDescent {
    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    fn reset(&mut self) {
        self.rng = Some(StdRng::seed_from_u64(self.seed));
    }

    fn step(
        &mut self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
    ) -> Result<Step> {
        let dx = self.max_dx * self.scaling_factor;
        let mut change = change(&current.gradient, dx, self.all_params_equal);
        if self.noise_magnitude > 0. {
            let noise = self.noise_magnitude * self.scaling_factor;
            let seed = self.seed;
            let rng = self.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed));
            for c in change.iter_mut() {
                *c += noise * rng.gen_range(-1.0..=1.0);
            }
        }
        let x = apply(&current.x, &change, bounds);
        Ok(Step::Moved(Iterate::at(objective, x)?))
    }
}

/// Gradient descent whose step shrinks while the figure of merit gets worse
/// and regrows afterwards.
///
/// Each iteration starts from `min(dx * dx_regrowth_factor, max_dx)` and
/// halves `dx` until the new point is no worse or `dx` reaches `min_dx`, in
/// which case the update is forced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveGradientDescent {
    pub max_dx: f64,
    pub min_dx: f64,
    pub dx_regrowth_factor: f64,
    pub all_params_equal: bool,
    pub max_iter: usize,
    pub scaling_factor: f64,
    #[serde(skip)]
    dx: Option<f64>,
}

impl Default for AdaptiveGradientDescent {
    fn default() -> Self {
        Self {
            max_dx: 0.05,
            min_dx: 1e-4,
            dx_regrowth_factor: 2.,
            all_params_equal: false,
            max_iter: 100,
            scaling_factor: 1.,
            dx: None,
        }
    }
}

impl AdaptiveGradientDescent {
    pub fn new(max_dx: f64, min_dx: f64, max_iter: usize) -> Self {
        Self {
            max_dx,
            min_dx,
            max_iter,
            ..Default::default()
        }
    }

    pub fn with_all_params_equal(mut self, all_params_equal: bool) -> Self {
        self.all_params_equal = all_params_equal;
        self
    }

    pub fn with_scaling_factor(mut self, scaling_factor: f64) -> Self {
        self.scaling_factor = scaling_factor;
        self
    }

    /// Current step size in scaled units.
    pub fn dx(&self) -> Option<f64> {
        self.dx
    }
}

impl Optimizer for AdaptiveGradientDescent {
    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    fn reset(&mut self) {
        self.dx = None;
    }

    fn step(
        &mut self,
        objective: &mut Objective<'_>,
        bounds: &Bounds,
        current: &Iterate,
    ) -> Result<Step> {
        let max_dx = self.max_dx * self.scaling_factor;
        let min_dx = self.min_dx * self.scaling_factor;
        let mut dx = self
            .dx
            .map_or(max_dx, |dx| (dx * self.dx_regrowth_factor).min(max_dx));

        let mut x = apply(
            &current.x,
            &change(&current.gradient, dx, self.all_params_equal),
            bounds,
        );
        let mut value = objective.value(&x)?;
        while value > current.value && dx > min_dx {
            dx = (dx / 2.).max(min_dx);
            tracing::debug!(dx, "figure of merit got worse; reducing step size");
            x = apply(
                &current.x,
                &change(&current.gradient, dx, self.all_params_equal),
                bounds,
            );
            value = objective.value(&x)?;
        }
        if dx <= min_dx {
            tracing::debug!("step size at minimum; forcing update");
        }
        self.dx = Some(dx);

        let gradient = objective.gradient(&x)?;
        Ok(Step::Moved(Iterate { x, value, gradient }))
    }
}
