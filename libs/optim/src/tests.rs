use approx::{assert_abs_diff_eq, assert_relative_eq};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::*;

/// `sign * sum(w * (x - c)^2)`, remembering every point it is asked about.
struct Quadratic {
    center: Vec<f64>,
    weights: Vec<f64>,
    sign: f64,
    seen: Vec<Vec<f64>>,
    fail_after: Option<usize>,
}

impl Quadratic {
    fn new(center: Vec<f64>, weights: Vec<f64>) -> Self {
        Self {
            center,
            weights,
            sign: 1.,
            seen: Vec::new(),
            fail_after: None,
        }
    }

    fn negated(mut self) -> Self {
        self.sign = -1.;
        self
    }
}

impl Problem for Quadratic {
    fn evaluate(&mut self, params: &[f64]) -> Result<f64> {
        if self.fail_after.is_some_and(|n| self.seen.len() >= n) {
            return Err(Error::problem("solver crashed"));
        }
        self.seen.push(params.to_vec());
        Ok(self.sign
            * params
                .iter()
                .zip(&self.center)
                .zip(&self.weights)
                .map(|((x, c), w)| w * (x - c).powi(2))
                .sum::<f64>())
    }

    fn gradient(&mut self, params: &[f64]) -> Result<Vec<f64>> {
        self.seen.push(params.to_vec());
        Ok(params
            .iter()
            .zip(&self.center)
            .zip(&self.weights)
            .map(|((x, c), w)| self.sign * 2. * w * (x - c))
            .collect())
    }
}

#[test]
fn bounds_reject_empty_intervals() {
    assert!(Bounds::new(vec![(0., 1.), (1., 1.)]).is_err());
    assert!(matches!(
        Bounds::new(vec![(2., 1.)]),
        Err(Error::InvalidBound { index: 0, .. })
    ));
    assert!(Bounds::new(vec![(f64::NAN, 1.)]).is_err());
    assert!(Bounds::uniform(3, 0., 1.2e-6).is_ok());
}

#[test]
fn param_vector_is_clamped_and_fixed_length() -> anyhow::Result<()> {
    let bounds = Bounds::uniform(2, 0., 1.)?;
    assert!(matches!(
        ParamVector::new(vec![0.; 3], bounds.clone()),
        Err(Error::LengthMismatch {
            expected: 2,
            found: 3
        })
    ));

    let mut params = ParamVector::new(vec![-1., 5.], bounds)?;
    assert_eq!(params.values(), &[0., 1.]);
    params.set(vec![0.5, 1.5])?;
    assert_eq!(params.values(), &[0.5, 1.]);
    assert!(params.set(vec![0.5]).is_err());
    Ok(())
}

#[test]
fn lbfgsb_minimizes_quadratic() -> anyhow::Result<()> {
    let problem = Quadratic::new(vec![0.5, -1., 2.], vec![1., 3., 10.]);
    let start = ParamVector::new(vec![4., 4., -4.], Bounds::uniform(3, -5., 5.)?)?;
    let mut opt = Optimization::new(problem, Lbfgsb::new(200), start).with_goal(Goal::Minimize);
    let result = opt.run()?;

    assert_ne!(result.stop, StopReason::MaxIter);
    for (x, c) in result.params.iter().zip([0.5, -1., 2.]) {
        assert_abs_diff_eq!(*x, c, epsilon = 1e-4);
    }
    assert_abs_diff_eq!(result.fom, 0., epsilon = 1e-6);
    assert_eq!(opt.history().len(), result.iterations + 1);
    assert_eq!(opt.params().values(), result.params.as_slice());
    Ok(())
}

#[test]
fn lbfgsb_stops_at_active_bound() -> anyhow::Result<()> {
    let problem = Quadratic::new(vec![2.], vec![1.]).negated();
    let start = ParamVector::new(vec![0.2], Bounds::uniform(1, 0., 1.)?)?;
    let mut opt = Optimization::new(problem, Lbfgsb::new(20), start);
    let result = opt.run()?;

    assert_eq!(result.stop, StopReason::Pgtol);
    assert_relative_eq!(result.params[0], 1.);
    assert_relative_eq!(result.fom, -1.);
    Ok(())
}

#[test]
fn lbfgsb_respects_scaling_factor() -> anyhow::Result<()> {
    // Peak at 0.5 um, in meters.
    struct Peak;
    impl Problem for Peak {
        fn evaluate(&mut self, params: &[f64]) -> Result<f64> {
            Ok(-((params[0] - 0.5e-6) * 1e6).powi(2))
        }
        fn gradient(&mut self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![-2. * (params[0] - 0.5e-6) * 1e12])
        }
    }

    let start = ParamVector::new(vec![0.1e-6], Bounds::uniform(1, 0., 1.2e-6)?)?;
    let optimizer = Lbfgsb::new(50).with_scaling_factor(1e6);
    let mut opt = Optimization::new(Peak, optimizer, start);
    let result = opt.run()?;

    assert_abs_diff_eq!(result.params[0], 0.5e-6, epsilon = 1e-9);
    // Gradients are reported in the problem's own units.
    assert_relative_eq!(opt.history()[0].record.gradient[0], 0.8e6, max_relative = 1e-9);
    assert_relative_eq!(opt.history()[0].record.fom, -0.16, max_relative = 1e-9);
    Ok(())
}

#[test]
fn lbfgsb_honors_iteration_budget() -> anyhow::Result<()> {
    let problem = Quadratic::new(vec![0.5, -1.], vec![1., 3.]);
    let start = ParamVector::new(vec![4., 4.], Bounds::uniform(2, -5., 5.)?)?;
    let mut opt = Optimization::new(problem, Lbfgsb::new(1), start).with_goal(Goal::Minimize);
    let result = opt.run()?;

    assert_eq!(result.stop, StopReason::MaxIter);
    assert_eq!(result.iterations, 1);
    assert_eq!(opt.history().len(), 2);
    Ok(())
}

#[test]
fn fixed_step_moves_largest_gradient_by_dx() -> anyhow::Result<()> {
    let bounds = Bounds::uniform(2, 0., 100.)?;
    let mut optimizer = FixedStepGradientDescent::new(0.1, 1);
    let problem = Quadratic::new(vec![10., 10.], vec![1., 1.]);
    let start = ParamVector::new(vec![0., 5.], bounds.clone())?;
    let mut opt = Optimization::new(problem, optimizer.clone(), start).with_goal(Goal::Minimize);
    opt.run()?;
    let moved = &opt.history()[1].params;
    assert_relative_eq!(moved[0], 0.1);
    assert_relative_eq!(moved[1], 5.05);

    optimizer.all_params_equal = true;
    let problem = Quadratic::new(vec![10., 10.], vec![1., 1.]);
    let start = ParamVector::new(vec![0., 5.], bounds)?;
    let mut opt = Optimization::new(problem, optimizer, start).with_goal(Goal::Minimize);
    opt.run()?;
    let moved = &opt.history()[1].params;
    assert_relative_eq!(moved[0], 0.1);
    assert_relative_eq!(moved[1], 5.1);
    Ok(())
}

#[test]
fn fixed_step_noise_is_seeded() -> anyhow::Result<()> {
    let run = || -> anyhow::Result<Vec<f64>> {
        let optimizer = FixedStepGradientDescent::new(0.05, 5)
            .with_noise(0.01)
            .with_seed(3);
        let problem = Quadratic::new(vec![0.5, 0.5], vec![1., 1.]).negated();
        let start = ParamVector::new(vec![0.1, 0.9], Bounds::uniform(2, 0., 1.)?)?;
        Ok(Optimization::new(problem, optimizer, start).run()?.params)
    };
    assert_eq!(run()?, run()?);
    Ok(())
}

#[test]
fn adaptive_descent_converges() -> anyhow::Result<()> {
    let problem = Quadratic::new(vec![0.3, 0.7], vec![1., 1.]);
    let start = ParamVector::new(vec![0.9, 0.1], Bounds::uniform(2, 0., 1.)?)?;
    let optimizer = AdaptiveGradientDescent::new(0.1, 1e-3, 50);
    let mut opt = Optimization::new(problem, optimizer, start).with_goal(Goal::Minimize);
    let result = opt.run()?;

    assert!(result.fom < opt.history()[0].record.fom);
    assert!(result.fom < 1e-4);
    assert_eq!(result.iterations, 50);
    Ok(())
}

#[test]
fn params_never_leave_bounds() -> anyhow::Result<()> {
    let ranges = vec![(0., 1.), (-1., 1.), (0., 0.5), (2., 2.5)];
    let bounds = Bounds::new(ranges.clone())?;
    let mut rng = StdRng::seed_from_u64(7);

    for trial in 0..20 {
        let start: Vec<f64> = ranges
            .iter()
            .map(|&(min, max)| rng.gen_range(min..=max))
            .collect();
        assert!(bounds.contains(&start));

        let optimizers: Vec<Box<dyn Optimizer>> = vec![
            Box::new(Lbfgsb::new(15)),
            Box::new(
                FixedStepGradientDescent::new(0.3, 15)
                    .with_noise(0.2)
                    .with_seed(trial),
            ),
            Box::new(FixedStepGradientDescent::new(0.7, 15).with_all_params_equal(true)),
            Box::new(AdaptiveGradientDescent::new(0.5, 1e-3, 15)),
        ];
        for optimizer in optimizers {
            // The unconstrained optimum lies outside the bounds in every direction.
            let mut problem =
                Quadratic::new(vec![3., -3., 0.2, 7.], vec![1., 2., 5., 1.]).negated();
            let start = ParamVector::new(start.clone(), bounds.clone())?;
            let mut opt = Optimization::new(&mut problem, optimizer, start);
            opt.run()?;
            for entry in opt.history() {
                assert!(bounds.contains(&entry.params), "{:?}", entry.params);
            }
            assert!(bounds.contains(opt.params().values()));
            drop(opt);
            for params in problem.seen.iter() {
                assert!(bounds.contains(params), "{params:?}");
            }
        }
    }
    Ok(())
}

#[test]
fn problem_errors_abort_the_run() -> anyhow::Result<()> {
    let mut problem = Quadratic::new(vec![0.5], vec![1.]);
    problem.fail_after = Some(3);
    let start = ParamVector::new(vec![0.], Bounds::uniform(1, -1., 1.)?)?;
    let mut opt =
        Optimization::new(problem, FixedStepGradientDescent::new(0.01, 10), start)
            .with_goal(Goal::Minimize);

    let err = opt.run().unwrap_err();
    assert!(matches!(err, Error::Problem(_)));
    assert!(!opt.history().is_empty());
    assert!(opt.history().len() < 10);
    Ok(())
}

#[test]
fn report_lists_every_iteration() -> anyhow::Result<()> {
    let problem = Quadratic::new(vec![0.5], vec![1.]);
    let start = ParamVector::new(vec![0.], Bounds::uniform(1, -1., 1.)?)?;
    let mut opt = Optimization::new(problem, FixedStepGradientDescent::new(0.25, 2), start)
        .with_goal(Goal::Minimize);
    opt.run()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("optimization_report.txt");
    opt.write_report(&path)?;
    let report = std::fs::read_to_string(&path)?;
    assert_eq!(
        report,
        "AT ITERATION 0:  FOM = 0.25\nPARAMETERS = [0.0]\n\n\
         AT ITERATION 1:  FOM = 0.0625\nPARAMETERS = [0.25]\n\n\
         AT ITERATION 2:  FOM = 0\nPARAMETERS = [0.5]\n\n"
    );
    Ok(())
}
