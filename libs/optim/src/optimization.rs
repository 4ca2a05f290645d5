//! The optimization loop.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::optimizer::{Iterate, Optimizer, Step, StopReason};
use crate::params::ParamVector;
use crate::problem::{FomRecord, Goal, Objective, Problem};

/// One accepted point of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Zero for the starting point.
    pub iteration: usize,
    pub params: Vec<f64>,
    #[serde(flatten)]
    pub record: FomRecord,
}

/// Final state of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub params: Vec<f64>,
    pub fom: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop: StopReason,
}

/// Drives an optimizer over a problem, starting from a bounded parameter
/// vector, and keeps the history of accepted points.
pub struct Optimization<P, O> {
    pub problem: P,
    pub optimizer: O,
    pub goal: Goal,
    params: ParamVector,
    history: Vec<HistoryEntry>,
}

impl<P: Problem, O: Optimizer> Optimization<P, O> {
    pub fn new(problem: P, optimizer: O, start: ParamVector) -> Self {
        Self {
            problem,
            optimizer,
            goal: Goal::default(),
            params: start,
            history: Vec::new(),
        }
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = goal;
        self
    }

    /// The current parameters: the start point before [`Optimization::run`],
    /// the last accepted point afterwards.
    pub fn params(&self) -> &ParamVector {
        &self.params
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Runs the optimizer until it converges or exhausts its iteration
    /// budget.
    ///
    /// Any problem error aborts the run. Points accepted before the error
    /// stay in the history.
    pub fn run(&mut self) -> Result<OptimizationResult> {
        let scale = self.optimizer.scaling_factor();
        if !(scale.is_finite() && scale > 0.) {
            return Err(Error::Config(format!(
                "scaling factor must be positive, got {scale}"
            )));
        }
        self.history.clear();
        self.optimizer.reset();

        let bounds = self.params.bounds().clone();
        let scaled_bounds = bounds.scaled(scale);
        let mut objective = Objective::new(&mut self.problem, self.goal, scale, &bounds);

        let mut x: Vec<f64> = self.params.values().iter().map(|p| p * scale).collect();
        scaled_bounds.project(&mut x);
        let mut current = Iterate::at(&mut objective, x)?;
        Self::record(&mut self.history, &objective, 0, &current);

        let max_iter = self.optimizer.max_iter();
        let mut iterations = 0;
        let mut stop = StopReason::MaxIter;
        while iterations < max_iter {
            let step = self
                .optimizer
                .step(&mut objective, &scaled_bounds, &current)?;
            let (next, reason) = match step {
                Step::Moved(next) => (next, None),
                Step::Converged(next, reason) => (next, Some(reason)),
                Step::Stopped(reason) => {
                    stop = reason;
                    break;
                }
            };
            iterations += 1;
            current = next;
            Self::record(&mut self.history, &objective, iterations, &current);
            if let Some(reason) = reason {
                stop = reason;
                break;
            }
        }

        let params = objective.unscale(&current.x);
        let fom = self.goal.sign() * current.value;
        let evaluations = objective.evaluations();
        self.params.set(params.clone())?;
        tracing::info!(fom, iterations, evaluations, %stop, "optimization finished");
        Ok(OptimizationResult {
            params,
            fom,
            iterations,
            evaluations,
            stop,
        })
    }

    fn record(
        history: &mut Vec<HistoryEntry>,
        objective: &Objective<'_>,
        iteration: usize,
        current: &Iterate,
    ) {
        let entry = HistoryEntry {
            iteration,
            params: objective.unscale(&current.x),
            record: objective.record(current.value, &current.gradient),
        };
        tracing::info!(iteration, fom = entry.record.fom, "accepted point");
        history.push(entry);
    }

    /// Formats the history as a plain-text report.
    pub fn report(&self) -> String {
        report(&self.history)
    }

    /// Writes [`Optimization::report`] to `path`.
    pub fn write_report(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.report())?;
        Ok(())
    }
}

/// Formats a history as a plain-text report.
pub fn report(history: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for entry in history {
        // Writing to a `String` cannot fail.
        let _ = writeln!(
            out,
            "AT ITERATION {}:  FOM = {}\nPARAMETERS = {:?}\n",
            entry.iteration, entry.record.fom, entry.params
        );
    }
    out
}
