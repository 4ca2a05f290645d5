//! Bounded optimization parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One `(min, max)` interval per parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds(Vec<(f64, f64)>);

impl Bounds {
    /// Fails if any interval is empty, inverted, or not finite.
    pub fn new(ranges: Vec<(f64, f64)>) -> Result<Self> {
        for (index, &(min, max)) in ranges.iter().enumerate() {
            if !(min.is_finite() && max.is_finite() && max > min) {
                return Err(Error::InvalidBound { index, min, max });
            }
        }
        Ok(Self(ranges))
    }

    /// The same interval for each of `len` parameters.
    pub fn uniform(len: usize, min: f64, max: f64) -> Result<Self> {
        Self::new(vec![(min, max); len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.0.iter()
    }

    pub fn check_len(&self, len: usize) -> Result<()> {
        if len != self.len() {
            return Err(Error::LengthMismatch {
                expected: self.len(),
                found: len,
            });
        }
        Ok(())
    }

    /// Whether every component of `values` lies within its interval.
    pub fn contains(&self, values: &[f64]) -> bool {
        values.len() == self.len()
            && values
                .iter()
                .zip(self.0.iter())
                .all(|(v, (min, max))| min <= v && v <= max)
    }

    /// Clamps every component of `values` into its interval.
    pub fn project(&self, values: &mut [f64]) {
        for (v, &(min, max)) in values.iter_mut().zip(self.0.iter()) {
            *v = v.clamp(min, max);
        }
    }

    /// Bounds of the parameters multiplied by `factor`.
    pub(crate) fn scaled(&self, factor: f64) -> Self {
        Self(
            self.0
                .iter()
                .map(|(min, max)| (min * factor, max * factor))
                .collect(),
        )
    }
}

/// A parameter vector that always lies within its bounds.
///
/// The length is fixed when the vector is created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamVector {
    values: Vec<f64>,
    bounds: Bounds,
}

impl ParamVector {
    /// Components outside their interval are clamped into it.
    pub fn new(values: Vec<f64>, bounds: Bounds) -> Result<Self> {
        bounds.check_len(values.len())?;
        let mut out = Self { values, bounds };
        out.project();
        Ok(out)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces the values, clamping them into bounds.
    pub fn set(&mut self, values: Vec<f64>) -> Result<()> {
        self.bounds.check_len(values.len())?;
        self.values = values;
        self.project();
        Ok(())
    }

    /// Clamps the values into bounds.
    pub fn project(&mut self) {
        if !self.bounds.contains(&self.values) {
            tracing::warn!("parameters outside bounds were clamped");
            self.bounds.project(&mut self.values);
        }
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}
