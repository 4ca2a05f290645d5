//! Adjoint shape optimization of a Y-branch splitter in FDTD.
//!
//! The splitter is a polygon whose upper edge is a spline through a row of
//! control points between the input waveguide and the upper output
//! waveguide; the lower edge mirrors it. The optimizer moves the control
//! points in `y` to maximize transmission into the selected output mode.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use gds21::{GdsBoundary, GdsElement, GdsLibrary, GdsPoint, GdsStruct, GdsUnits};
use optim::{Bounds, Goal, Lbfgsb, Optimization, OptimizationResult, ParamVector, Problem};
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::TEMPLATES;
use crate::error::{Error, Result};
use crate::session::{Session, Value};
use crate::spline::{CubicSpline, linspace};

pub const INPUT_WG: &str = "input_wg";
pub const OUTPUT_WG_TOP: &str = "output_wg_top";

/// Control points along each axis.
pub const CONTROL_POINTS: usize = 10;
/// Largest control point offset from the axis, in meters.
pub const MAX_OFFSET: f64 = 1.2e-6;
/// How far the fixed end points sit beyond the first and last control points.
pub const X_EXTENSION: f64 = 0.01e-6;
/// Samples along each edge of the splitter.
pub const EDGE_SAMPLES: usize = 100;
pub const SCALING_FACTOR: f64 = 1e6;

const OXIDE: &str = "SiO2: non-dispersive";
const MESH_STEP: f64 = 20e-9;
const TEMPLATE: &str = "ybranch_adjoint.lsf";
/// Run status of the last FDTD simulation. 1 and 2 mean it ran to completion.
const STATUS: &str = "getresult(\"FDTD\", \"status\")";

/// Fails unless the last simulation ran to completion.
fn check_status<S: Session + ?Sized>(session: &mut S) -> Result<()> {
    let status = session.get_f64(STATUS)?;
    if status == 1. || status == 2. {
        Ok(())
    } else {
        tracing::error!(status, "FDTD simulation did not complete");
        Err(Error::Simulation { status })
    }
}

/// A box drawn in the simulation, with lengths in meters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Component {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub x_span: f64,
    pub y_span: f64,
    pub z_span: f64,
    pub material: String,
    pub mesh_order: Option<u32>,
    pub alpha: Option<f64>,
}

/// A material created from the solver's material database.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LayerUsed {
    pub name: String,
    /// Material model, such as `Dielectric`.
    pub material_type: String,
    /// Database material whose index the new material takes.
    pub material_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptimizationSettings {
    /// Wavelength range, in meters.
    pub start: f64,
    pub stop: f64,
    pub points: usize,
    pub center_wavelength: f64,
    pub mode_selection: String,
    pub direction: String,
    pub injection_axis: String,
    pub max_iter: usize,
    #[serde(default = "default_method")]
    pub method: String,
    pub pgtol: f64,
    pub ftol: f64,
}

fn default_method() -> String {
    "L-BFGS-B".to_string()
}

/// A Y-branch design file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct YBranchSpec {
    pub component: Vec<Component>,
    pub layers_used: Vec<LayerUsed>,
    pub optimization_variables: Vec<OptimizationSettings>,
}

impl YBranchSpec {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn component(&self, name: &str) -> Result<&Component> {
        self.component
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::Design(format!("no `{name}` component")))
    }

    pub fn settings(&self) -> Result<&OptimizationSettings> {
        self.optimization_variables
            .first()
            .ok_or_else(|| Error::Design("no optimization variables".to_string()))
    }

    /// Control points spanning the gap between the end of the input
    /// waveguide and the start of the upper output waveguide, as `(x, y)`.
    pub fn initial_points(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let input = self.component(INPUT_WG)?;
        let output = self.component(OUTPUT_WG_TOP)?;
        let xs = linspace(
            input.x + input.x_span / 2.,
            output.x - output.x_span / 2.,
            CONTROL_POINTS,
        );
        let ys = linspace(
            input.y + input.y_span / 2.,
            output.y + output.y_span / 2.,
            CONTROL_POINTS,
        );
        Ok((xs, ys))
    }
}

/// Builds the splitter outline from control point offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct YSplitterShape {
    /// Control point positions along the splitter.
    pub xs: Vec<f64>,
    /// Fixed offsets at the input and output ends.
    pub y_start: f64,
    pub y_end: f64,
    pub samples: usize,
}

impl YSplitterShape {
    /// The end offsets are the extremes of the initial control points.
    pub fn new(xs: Vec<f64>, initial_ys: &[f64]) -> Self {
        let y_start = initial_ys.iter().copied().fold(f64::INFINITY, f64::min);
        let y_end = initial_ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            xs,
            y_start,
            y_end,
            samples: EDGE_SAMPLES,
        }
    }

    /// The closed outline: the upper edge from output to input, then its
    /// mirror image from input to output.
    pub fn vertices(&self, params: &[f64]) -> Result<Vec<[f64; 2]>> {
        if params.len() != self.xs.len() {
            return Err(Error::Design(format!(
                "expected {} shape parameters, got {}",
                self.xs.len(),
                params.len()
            )));
        }
        let (Some(first), Some(last)) = (self.xs.first(), self.xs.last()) else {
            return Err(Error::Design("splitter has no control points".to_string()));
        };
        let mut knots_x = Vec::with_capacity(self.xs.len() + 2);
        knots_x.push(first - X_EXTENSION);
        knots_x.extend_from_slice(&self.xs);
        knots_x.push(last + X_EXTENSION);
        let mut knots_y = Vec::with_capacity(params.len() + 2);
        knots_y.push(self.y_start);
        knots_y.extend_from_slice(params);
        knots_y.push(self.y_end);

        let spline = CubicSpline::not_a_knot(&knots_x, &knots_y)?;
        let xs = linspace(knots_x[0], knots_x[knots_x.len() - 1], self.samples);
        let ys = spline.eval_all(&xs);
        let upper = xs.iter().zip(ys.iter()).rev().map(|(&x, &y)| [x, y]);
        let lower = xs.iter().zip(ys.iter()).map(|(&x, &y)| [x, -y]);
        Ok(upper.chain(lower).collect())
    }
}

/// A polygon in the simulation whose vertices are a function of the
/// optimization parameters.
#[derive(Debug, Clone)]
pub struct FunctionDefinedPolygon {
    pub shape: YSplitterShape,
    pub name: String,
    pub material: String,
    pub mesh_order: u32,
    /// Center of the polygon in `z`, in meters.
    pub z: f64,
    pub depth: f64,
    /// Parameter step of the finite-difference shape derivative.
    pub dx: f64,
    drawn: bool,
}

impl FunctionDefinedPolygon {
    pub fn new(shape: YSplitterShape, material: impl Into<String>, depth: f64) -> Self {
        Self {
            shape,
            name: "polygon".to_string(),
            material: material.into(),
            mesh_order: 2,
            z: 0.,
            depth,
            dx: 1e-9,
            drawn: false,
        }
    }

    /// Adds the polygon on first use and updates its vertices afterwards.
    pub fn draw<S: Session + ?Sized>(&mut self, session: &mut S, params: &[f64]) -> Result<()> {
        let vertices = Value::Points(self.shape.vertices(params)?);
        if self.drawn {
            return session.set_named(&self.name, "vertices", vertices);
        }
        session.add("addpoly")?;
        session.set("name", self.name.as_str().into())?;
        session.set("x", Value::Number(0.))?;
        session.set("y", Value::Number(0.))?;
        session.set("z", Value::Number(self.z))?;
        session.set("z span", Value::Number(self.depth))?;
        session.set("vertices", vertices)?;
        session.set("material", self.material.as_str().into())?;
        session.set("override mesh order from material database", true.into())?;
        session.set("mesh order", Value::Number(self.mesh_order.into()))?;
        self.drawn = true;
        Ok(())
    }

    /// Chains the solver's vertex sensitivities with the finite-difference
    /// derivative of each vertex with respect to each parameter.
    pub fn gradient(&self, params: &[f64], sensitivities: &[[f64; 2]]) -> Result<Vec<f64>> {
        let base = self.shape.vertices(params)?;
        if sensitivities.len() != base.len() {
            return Err(Error::Design(format!(
                "got {} vertex sensitivities for {} vertices",
                sensitivities.len(),
                base.len()
            )));
        }
        let mut gradient = Vec::with_capacity(params.len());
        let mut shifted = params.to_vec();
        for i in 0..params.len() {
            shifted[i] = params[i] + self.dx;
            let moved = self.shape.vertices(&shifted)?;
            shifted[i] = params[i];
            let g = base
                .iter()
                .zip(moved.iter())
                .zip(sensitivities.iter())
                .map(|((b, m), s)| {
                    (m[0] - b[0]) / self.dx * s[0] + (m[1] - b[1]) / self.dx * s[1]
                })
                .sum();
            gradient.push(g);
        }
        Ok(gradient)
    }
}

#[derive(Serialize)]
struct AdjointContext<'a> {
    stage: &'a str,
    expansion: &'a str,
    fields: &'a str,
    fom_x: String,
    fom_y_span: String,
    fom_z_span: String,
    center_wavelength: String,
    mode_selection: &'a str,
    material_in: &'a str,
    material_out: &'a str,
    z: String,
    depth: String,
}

/// Placement of the figure of merit monitor, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FomMonitor {
    pub x: f64,
    pub y_span: f64,
    pub z_span: f64,
}

/// The Y-branch figure of merit and its adjoint gradient, computed by an
/// FDTD session.
pub struct AdjointProblem<S> {
    pub session: S,
    pub polygon: FunctionDefinedPolygon,
    pub monitor: FomMonitor,
    pub center_wavelength: f64,
    pub mode_selection: String,
    /// Parameters of the last forward run.
    forward: Option<Vec<f64>>,
}

impl<S: Session> AdjointProblem<S> {
    pub fn new(
        session: S,
        polygon: FunctionDefinedPolygon,
        monitor: FomMonitor,
        settings: &OptimizationSettings,
    ) -> Self {
        Self {
            session,
            polygon,
            monitor,
            center_wavelength: settings.center_wavelength,
            mode_selection: settings.mode_selection.clone(),
            forward: None,
        }
    }

    fn script(&self, stage: &str) -> Result<String> {
        let context = Context::from_serialize(AdjointContext {
            stage,
            expansion: "fom_expansion",
            fields: "opt_fields",
            fom_x: Value::Number(self.monitor.x).to_string(),
            fom_y_span: Value::Number(self.monitor.y_span).to_string(),
            fom_z_span: Value::Number(self.monitor.z_span).to_string(),
            center_wavelength: Value::Number(self.center_wavelength).to_string(),
            mode_selection: &self.mode_selection,
            material_in: &self.polygon.material,
            material_out: OXIDE,
            z: Value::Number(self.polygon.z).to_string(),
            depth: Value::Number(self.polygon.depth).to_string(),
        })?;
        Ok(TEMPLATES.render(TEMPLATE, &context)?)
    }

    /// Draws the shape, runs the forward simulation and reads the figure of
    /// merit.
    pub fn forward(&mut self, params: &[f64]) -> Result<f64> {
        self.session.switch_to_layout()?;
        self.polygon.draw(&mut self.session, params)?;
        self.session.run()?;
        check_status(&mut self.session)?;
        let script = self.script("forward")?;
        self.session.eval(&script)?;
        let fom = self.session.get_f64("pdk_fom")?;
        self.forward = Some(params.to_vec());
        tracing::debug!(fom, "forward simulation");
        Ok(fom)
    }

    /// Runs the adjoint simulation for the last forward run and reads the
    /// sensitivity of the figure of merit to every vertex.
    pub fn adjoint(&mut self, params: &[f64]) -> Result<Vec<[f64; 2]>> {
        let vertices = self.polygon.shape.vertices(params)?;
        let n = vertices.len();
        self.session.putv("pdk_vertices", Value::Points(vertices))?;
        let script = self.script("adjoint")?;
        self.session.eval(&script)?;
        check_status(&mut self.session)?;
        let script = self.script("sensitivities")?;
        self.session.eval(&script)?;
        let values = self
            .session
            .get("pdk_sensitivities")?
            .to_vec()
            .ok_or_else(|| Error::result("pdk_sensitivities", "expected a matrix"))?;
        if values.len() != 2 * n {
            return Err(Error::result(
                "pdk_sensitivities",
                format!("expected {} values, got {}", 2 * n, values.len()),
            ));
        }
        // Matrices come back column by column.
        Ok((0..n).map(|i| [values[i], values[n + i]]).collect())
    }

    /// Gradient of the figure of merit with respect to the shape parameters,
    /// rerunning the forward simulation if `params` changed since.
    pub fn shape_gradient(&mut self, params: &[f64]) -> Result<Vec<f64>> {
        if self.forward.as_deref() != Some(params) {
            self.forward(params)?;
        }
        let sensitivities = self.adjoint(params)?;
        self.polygon.gradient(params, &sensitivities)
    }
}

impl<S: Session> Problem for AdjointProblem<S> {
    fn evaluate(&mut self, params: &[f64]) -> optim::Result<f64> {
        self.forward(params).map_err(optim::Error::problem)
    }

    fn gradient(&mut self, params: &[f64]) -> optim::Result<Vec<f64>> {
        self.shape_gradient(params).map_err(optim::Error::problem)
    }
}

/// Draws the waveguides, materials, source, mesh and monitors of the
/// Y-branch simulation. Returns where the figure of merit is measured.
pub fn setup_simulation<S: Session + ?Sized>(session: &mut S, spec: &YBranchSpec) -> Result<FomMonitor> {
    let settings = spec.settings()?;
    let input = spec.component(INPUT_WG)?;
    let output = spec.component(OUTPUT_WG_TOP)?;
    let num = Value::Number;

    session.select_all()?;
    session.delete()?;

    for layer in spec.layers_used.iter() {
        session.eval(&format!(
            "pdk_material = addmaterial({}); setmaterial(pdk_material, \"name\", {}); \
             setmaterial({}, \"Refractive Index\", getindex({}, c / {}));",
            Value::from(layer.material_type.as_str()),
            Value::from(layer.name.as_str()),
            Value::from(layer.name.as_str()),
            Value::from(layer.material_name.as_str()),
            num(settings.center_wavelength),
        ))?;
    }

    for c in spec.component.iter() {
        session.add("addrect")?;
        session.set("name", c.name.as_str().into())?;
        session.set("x span", num(c.x_span))?;
        session.set("y span", num(c.y_span))?;
        session.set("z span", num(c.z_span))?;
        session.set("x", num(c.x))?;
        session.set("y", num(c.y))?;
        session.set("z", num(c.z))?;
        session.set("material", c.material.as_str().into())?;
        if c.material == OXIDE {
            session.set("override mesh order from material database", true.into())?;
            if let Some(order) = c.mesh_order {
                session.set("mesh order", num(order.into()))?;
            }
            if let Some(alpha) = c.alpha {
                session.set("alpha", num(alpha))?;
            }
        }
    }

    session.add("addfdtd")?;
    session.set("mesh accuracy", 2usize.into())?;
    session.set("dimension", "3D".into())?;
    session.set("x", num(0.))?;
    session.set("x span", num(output.x + output.x_span / 2.))?;
    session.set("y", num(0.))?;
    session.set("y span", num(output.y * 10.))?;
    session.set("z", num(0.))?;
    session.set("z span", num(output.z_span * 7.))?;
    session.set("force symmetric y mesh", true.into())?;

    session.add("addmode")?;
    session.set("name", "source".into())?;
    session.set("direction", settings.direction.as_str().into())?;
    session.set("injection axis", settings.injection_axis.as_str().into())?;
    session.set("y", num(0.))?;
    session.set("y span", num(output.y_span * 10.))?;
    session.set("x", num(input.x + input.x_span / 4.))?;
    session.set("z span", num(output.z_span * 7.))?;
    session.set("center wavelength", num(settings.center_wavelength))?;
    session.set("wavelength span", num(0.))?;
    session.set("mode selection", settings.mode_selection.as_str().into())?;

    // The optimization region ends where the output waveguide starts.
    let region = (output.x - output.x_span / 2.) * 9. / 5.;
    session.add("addmesh")?;
    session.set("x", num(0.))?;
    session.set("x span", num(region * 2.))?;
    session.set("y", num(0.))?;
    session.set("y span", num(2.5e-6))?;
    session.set("z", num(0.))?;
    session.set("z span", num(output.z_span * 15.))?;
    for axis in ["dx", "dy", "dz"] {
        session.set(axis, num(MESH_STEP))?;
    }

    session.add("addpower")?;
    session.set("name", "opt_fields".into())?;
    session.set("monitor type", "3D".into())?;
    session.set("x", num(0.))?;
    session.set("x span", num(region * 2.))?;
    session.set("y", num(0.))?;
    session.set("y span", num(2.5e-6))?;
    session.set("z", num(0.))?;
    session.set("z span", num(0.4e-6))?;

    let monitor = FomMonitor {
        x: region,
        y_span: 3e-6,
        z_span: 1.2e-6,
    };
    for (command, name) in [("addpower", "fom"), ("addmodeexpansion", "fom_expansion")] {
        session.add(command)?;
        session.set("name", name.into())?;
        session.set("monitor type", "2D X-Normal".into())?;
        session.set("x", num(monitor.x))?;
        session.set("y", num(0.))?;
        session.set("y span", num(monitor.y_span))?;
        session.set("z", num(0.))?;
        session.set("z span", num(monitor.z_span))?;
    }
    session.set("mode selection", settings.mode_selection.as_str().into())?;
    session.eval("setexpansion(\"fom\", \"fom\");")?;

    session.eval(&format!(
        "setglobalmonitor(\"frequency points\", {});",
        settings.points
    ))?;
    session.eval(&format!(
        "setglobalsource(\"wavelength start\", {}); setglobalsource(\"wavelength stop\", {});",
        num(settings.start),
        num(settings.stop)
    ))?;
    Ok(monitor)
}

/// Outcome of a Y-branch optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct YBranchResult {
    pub optimization: OptimizationResult,
    pub initial_x: Vec<f64>,
    pub initial_y: Vec<f64>,
    pub vertices: Vec<[f64; 2]>,
    pub parameters_file: PathBuf,
    pub report_file: PathBuf,
    pub gds_file: PathBuf,
}

/// Sets up the simulation and optimizes the splitter shape, then writes the
/// parameters, the optimization history and the optimized layout to
/// `out_dir`.
pub fn optimize_ybranch<S: Session>(
    spec: &YBranchSpec,
    mut session: S,
    out_dir: &Path,
) -> Result<YBranchResult> {
    let settings = spec.settings()?;
    if !settings.method.eq_ignore_ascii_case("L-BFGS-B") {
        return Err(Error::Design(format!(
            "unsupported optimization method `{}`",
            settings.method
        )));
    }
    let input = spec.component(INPUT_WG)?;
    let core = spec
        .layers_used
        .iter()
        .find(|l| l.name != OXIDE)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| input.material.clone());

    let monitor = setup_simulation(&mut session, spec)?;
    let (xs, ys) = spec.initial_points()?;
    let shape = YSplitterShape::new(xs.clone(), &ys);
    let mut polygon = FunctionDefinedPolygon::new(shape, core, input.z_span);
    polygon.z = input.z;
    let problem = AdjointProblem::new(session, polygon, monitor, settings);

    let mut optimizer = Lbfgsb::new(settings.max_iter).with_scaling_factor(SCALING_FACTOR);
    optimizer.pgtol = settings.pgtol;
    optimizer.ftol = settings.ftol;
    let start = ParamVector::new(ys.clone(), Bounds::uniform(ys.len(), 0., MAX_OFFSET)?)?;
    let mut optimization = Optimization::new(problem, optimizer, start).with_goal(Goal::Maximize);
    tracing::info!(max_iter = settings.max_iter, "optimizing y-branch");
    let result = optimization.run()?;

    fs::create_dir_all(out_dir)?;
    let report_file = out_dir.join("ybranch_optimization.txt");
    optimization.write_report(&report_file)?;

    let parameters_file = out_dir.join("ybranch_parameters.txt");
    let mut text = String::new();
    for row in [&result.params, &xs, &ys] {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:e}")).collect();
        let _ = writeln!(text, "{}", cells.join(" "));
    }
    fs::write(&parameters_file, text)?;

    let vertices = optimization.problem.polygon.shape.vertices(&result.params)?;
    let gds_file = out_dir.join("y_branch.gds");
    write_polygon_gds(&gds_file, "Y Branch", (1, 0), &vertices)?;

    Ok(YBranchResult {
        optimization: result,
        initial_x: xs,
        initial_y: ys,
        vertices,
        parameters_file,
        report_file,
        gds_file,
    })
}

/// Writes a closed polygon (in meters) to a GDS file with 1 nm resolution.
pub fn write_polygon_gds(
    path: &Path,
    cell: &str,
    layer: (i16, i16),
    vertices: &[[f64; 2]],
) -> Result<()> {
    const DBU: f64 = 1e-9;
    let mut xy: Vec<GdsPoint> = vertices
        .iter()
        .map(|[x, y]| GdsPoint::new((x / DBU).round() as i32, (y / DBU).round() as i32))
        .collect();
    if let Some(first) = xy.first().cloned() {
        if xy.last() != Some(&first) {
            xy.push(first);
        }
    }
    let mut top = GdsStruct::new(cell);
    top.elems.push(GdsElement::GdsBoundary(GdsBoundary {
        layer: layer.0,
        datatype: layer.1,
        xy,
        ..Default::default()
    }));
    let mut lib = GdsLibrary::new("LIB");
    lib.units = GdsUnits::new(1e-3, DBU);
    lib.structs.push(top);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    lib.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests;
