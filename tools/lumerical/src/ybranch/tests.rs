use approx::assert_relative_eq;
use optim::{Problem, StopReason};

use super::*;
use crate::geometry::layout_bbox;
use crate::testing::RecordingSession;
use crate::tests::test_dir;

const SPEC: &str = r#"
component:
  - name: input_wg
    x: -2.5e-6
    y: 0
    z: 0
    x_span: 3e-6
    y_span: 0.5e-6
    z_span: 0.22e-6
    material: "Si: non-dispersive"
  - name: output_wg_top
    x: 2.5e-6
    y: 0.35e-6
    z: 0
    x_span: 3e-6
    y_span: 0.5e-6
    z_span: 0.22e-6
    material: "Si: non-dispersive"
  - name: output_wg_bottom
    x: 2.5e-6
    y: -0.35e-6
    z: 0
    x_span: 3e-6
    y_span: 0.5e-6
    z_span: 0.22e-6
    material: "Si: non-dispersive"
  - name: cladding
    x: 0
    y: 0
    z: 0
    x_span: 10e-6
    y_span: 6e-6
    z_span: 3e-6
    material: "SiO2: non-dispersive"
    mesh_order: 3
    alpha: 0.1
layers_used:
  - name: "Si: non-dispersive"
    material_type: Dielectric
    material_name: "Si (Silicon) - Palik"
  - name: "SiO2: non-dispersive"
    material_type: Dielectric
    material_name: "SiO2 (Glass) - Palik"
optimization_variables:
  - start: 1.5e-6
    stop: 1.6e-6
    points: 11
    center_wavelength: 1.55e-6
    mode_selection: fundamental TE mode
    direction: Forward
    injection_axis: x-axis
    max_iter: 3
    pgtol: 1.0e-5
    ftol: 1.0e-5
"#;

fn shape() -> anyhow::Result<(YSplitterShape, Vec<f64>)> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let (xs, ys) = spec.initial_points()?;
    Ok((YSplitterShape::new(xs, &ys), ys))
}

/// Sensitivities that reward pushing the upper edge up and the lower edge
/// down.
fn widening(n: usize) -> Vec<[f64; 2]> {
    (0..n)
        .map(|i| if i < n / 2 { [0., 1.] } else { [0., -1.] })
        .collect()
}

#[test]
fn control_points_span_the_gap() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    assert_eq!(spec.settings()?.method, "L-BFGS-B");
    let (xs, ys) = spec.initial_points()?;
    assert_eq!(xs.len(), CONTROL_POINTS);
    assert_eq!(ys.len(), CONTROL_POINTS);
    assert_relative_eq!(xs[0], -1e-6, max_relative = 1e-12);
    assert_relative_eq!(xs[9], 1e-6, max_relative = 1e-12);
    assert_relative_eq!(ys[0], 0.25e-6, max_relative = 1e-12);
    assert_relative_eq!(ys[9], 0.6e-6, max_relative = 1e-12);
    assert!(spec.component("splitter").is_err());
    Ok(())
}

#[test]
fn outline_is_mirrored_about_the_axis() -> anyhow::Result<()> {
    let (shape, ys) = shape()?;
    let vertices = shape.vertices(&ys)?;
    assert_eq!(vertices.len(), 2 * EDGE_SAMPLES);

    let first = vertices[0];
    assert_relative_eq!(first[0], 1e-6 + X_EXTENSION, max_relative = 1e-12);
    assert_relative_eq!(first[1], shape.y_end, max_relative = 1e-9);
    let turn = vertices[EDGE_SAMPLES - 1];
    assert_relative_eq!(turn[0], -1e-6 - X_EXTENSION, max_relative = 1e-12);
    assert_relative_eq!(turn[1], shape.y_start, max_relative = 1e-9);
    for i in 0..EDGE_SAMPLES {
        let upper = vertices[i];
        let lower = vertices[2 * EDGE_SAMPLES - 1 - i];
        assert_eq!(upper[0], lower[0]);
        assert_eq!(upper[1], -lower[1]);
    }

    assert!(shape.vertices(&ys[1..]).is_err());
    Ok(())
}

#[test]
fn gradient_matches_the_shape_derivative() -> anyhow::Result<()> {
    let (shape, ys) = shape()?;
    let polygon = FunctionDefinedPolygon::new(shape.clone(), "Si: non-dispersive", 0.22e-6);
    let sensitivities = widening(2 * EDGE_SAMPLES);
    let gradient = polygon.gradient(&ys, &sensitivities)?;
    assert_eq!(gradient.len(), ys.len());

    // The outline is linear in the parameters, so any step size recovers
    // the same derivative.
    let merit = |params: &[f64]| -> anyhow::Result<f64> {
        Ok(shape
            .vertices(params)?
            .iter()
            .zip(sensitivities.iter())
            .map(|(v, s)| v[0] * s[0] + v[1] * s[1])
            .sum())
    };
    let h = 1e-8;
    let base = merit(&ys)?;
    for i in 0..ys.len() {
        let mut shifted = ys.clone();
        shifted[i] += h;
        let expected = (merit(&shifted)? - base) / h;
        assert_relative_eq!(gradient[i], expected, max_relative = 1e-4, epsilon = 1e-6);
    }

    let sideways = vec![[1., 0.]; 2 * EDGE_SAMPLES];
    assert!(polygon.gradient(&ys, &sideways)?.iter().all(|g| *g == 0.));
    assert!(polygon.gradient(&ys, &sensitivities[1..]).is_err());
    Ok(())
}

#[test]
fn polygon_is_added_once() -> anyhow::Result<()> {
    let (shape, ys) = shape()?;
    let mut polygon = FunctionDefinedPolygon::new(shape, "Si: non-dispersive", 0.22e-6);
    let mut session = RecordingSession::new();
    polygon.draw(&mut session, &ys)?;
    polygon.draw(&mut session, &ys)?;
    assert_eq!(session.count("addpoly;"), 1);
    assert!(session.ran("set(\"vertices\", ["));
    assert!(session.ran("setnamed(\"polygon\", \"vertices\", ["));
    assert!(session.ran("set(\"material\", \"Si: non-dispersive\");"));
    Ok(())
}

#[test]
fn simulation_setup_draws_every_component() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let mut session = RecordingSession::new();
    let monitor = setup_simulation(&mut session, &spec)?;

    assert_eq!(session.count("addrect;"), 4);
    assert_eq!(session.count("addmaterial(\"Dielectric\")"), 2);
    assert!(session.ran("set(\"name\", \"source\");"));
    assert!(session.ran("set(\"mode selection\", \"fundamental TE mode\");"));
    assert!(session.ran("setexpansion(\"fom\", \"fom\");"));
    assert!(session.ran("set(\"mesh order\", 3);"));
    assert_relative_eq!(monitor.x, 1.8e-6, max_relative = 1e-12);
    Ok(())
}

fn monitor() -> FomMonitor {
    FomMonitor {
        x: 1.8e-6,
        y_span: 3e-6,
        z_span: 1.2e-6,
    }
}

/// Answers for one forward run followed by one adjoint run, both completed.
fn answer_run(session: &mut RecordingSession, fom: f64) {
    session.answer(1.);
    session.answer(fom);
    session.answer(2.);
    let n = 2 * EDGE_SAMPLES;
    let mut matrix = vec![0.; n];
    matrix.extend(widening(n).iter().map(|s| s[1]));
    session.answer(matrix);
}

#[test]
fn adjoint_gradient_reuses_the_forward_run() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let (shape, ys) = shape()?;
    let polygon = FunctionDefinedPolygon::new(shape, "Si: non-dispersive", 0.22e-6);
    let expected = polygon.gradient(&ys, &widening(2 * EDGE_SAMPLES))?;
    let mut session = RecordingSession::new();
    answer_run(&mut session, 0.8);
    answer_run(&mut session, 0.7);
    let mut problem = AdjointProblem::new(session, polygon, monitor(), spec.settings()?);

    assert_eq!(problem.evaluate(&ys)?, 0.8);
    let gradient = problem.gradient(&ys)?;
    let forward_runs = |s: &RecordingSession| s.commands.iter().filter(|c| *c == "run;").count();
    assert_eq!(forward_runs(&problem.session), 1);
    assert_eq!(gradient.len(), expected.len());
    for (g, e) in gradient.iter().zip(expected.iter()) {
        assert_relative_eq!(*g, *e, max_relative = 1e-12);
    }
    assert!(problem.session.ran("pdk_vertices = ["));
    assert!(problem.session.ran("set(\"name\", \"adjoint_source\");"));
    assert!(problem.session.ran("pdk_fom = "));

    // A new point needs a new forward run before the adjoint.
    let moved: Vec<f64> = ys.iter().map(|y| y * 1.01).collect();
    problem.gradient(&moved)?;
    assert_eq!(forward_runs(&problem.session), 2);
    assert!(problem.session.answers.is_empty());
    Ok(())
}

#[test]
fn malformed_sensitivities_are_errors() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let (shape, ys) = shape()?;
    let polygon = FunctionDefinedPolygon::new(shape, "Si: non-dispersive", 0.22e-6);
    let session = RecordingSession::with_answers([
        Value::Number(1.),
        Value::Number(0.5),
        Value::Number(1.),
        Value::Matrix(vec![1., 2.]),
    ]);
    let mut problem = AdjointProblem::new(session, polygon, monitor(), spec.settings()?);
    assert!(problem.gradient(&ys).is_err());
    Ok(())
}

#[test]
fn aborted_forward_runs_are_errors() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let (shape, ys) = shape()?;
    let polygon = FunctionDefinedPolygon::new(shape, "Si: non-dispersive", 0.22e-6);
    let session = RecordingSession::with_answers([Value::Number(3.), Value::Number(0.8)]);
    let mut problem = AdjointProblem::new(session, polygon, monitor(), spec.settings()?);

    assert!(problem.evaluate(&ys).is_err());
    assert_eq!(problem.session.queries, vec![STATUS.to_string()]);
    assert!(!problem.session.ran("pdk_fom = "));
    Ok(())
}

#[test]
fn aborted_adjoint_runs_are_errors() -> anyhow::Result<()> {
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let (shape, ys) = shape()?;
    let polygon = FunctionDefinedPolygon::new(shape, "Si: non-dispersive", 0.22e-6);
    let session = RecordingSession::with_answers([
        Value::Number(1.),
        Value::Number(0.8),
        Value::Number(0.),
    ]);
    let mut problem = AdjointProblem::new(session, polygon, monitor(), spec.settings()?);

    assert_eq!(problem.evaluate(&ys)?, 0.8);
    let err = problem.shape_gradient(&ys).unwrap_err();
    assert!(matches!(err, Error::Simulation { status } if status == 0.));
    assert!(!problem.session.ran("pdk_sensitivities = matrix"));
    Ok(())
}

/// A solver whose figure of merit does not depend on the shape.
struct FlatSolver;

impl Session for FlatSolver {
    fn eval(&mut self, _code: &str) -> Result<()> {
        Ok(())
    }

    fn get(&mut self, expr: &str) -> Result<Value> {
        match expr {
            STATUS => Ok(Value::Number(1.)),
            "pdk_fom" => Ok(Value::Number(0.5)),
            "pdk_sensitivities" => Ok(Value::Matrix(vec![0.; 4 * EDGE_SAMPLES])),
            _ => Err(Error::result(expr, "unexpected query")),
        }
    }
}

#[test]
fn optimization_writes_parameters_and_layout() -> anyhow::Result<()> {
    let dir = test_dir("optimization_writes_parameters_and_layout")?;
    let spec = YBranchSpec::from_yaml(SPEC)?;
    let result = optimize_ybranch(&spec, FlatSolver, &dir)?;

    assert_eq!(result.optimization.stop, StopReason::Pgtol);
    assert_eq!(result.optimization.fom, 0.5);
    for (p, y) in result.optimization.params.iter().zip(result.initial_y.iter()) {
        assert_relative_eq!(*p, *y, max_relative = 1e-9);
    }

    let parameters = std::fs::read_to_string(&result.parameters_file)?;
    let rows: Vec<Vec<f64>> = parameters
        .lines()
        .map(|l| l.split_whitespace().map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == CONTROL_POINTS));
    assert!(std::fs::read_to_string(&result.report_file)?.contains("AT ITERATION 0"));

    let bbox = layout_bbox(&result.gds_file)?;
    assert_relative_eq!(bbox.width(), 2e-6 + 2. * X_EXTENSION, max_relative = 1e-3);
    assert_relative_eq!(bbox.max[1], -bbox.min[1], max_relative = 1e-9);
    Ok(())
}

#[test]
fn unsupported_methods_are_rejected() -> anyhow::Result<()> {
    let dir = test_dir("unsupported_methods_are_rejected")?;
    let spec = YBranchSpec::from_yaml(&SPEC.replace("    max_iter: 3\n", "    max_iter: 3\n    method: Nelder-Mead\n"))?;
    assert!(optimize_ybranch(&spec, FlatSolver, &dir).is_err());
    Ok(())
}
