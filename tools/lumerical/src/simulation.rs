//! Waveguide mode and bend-loss simulations, and compact model generation.

use std::f64::consts::PI;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use pdkxml::Element;
use serde::Serialize;
use tera::Context;

use crate::error::{Error, Result};
use crate::geometry::{
    CompactModelParams, DesignIntent, Polarization, SimulationParams, WAVEGUIDE_ROLE,
    WaveguideDesign, WaveguideGeometry, generate_lum_geometry,
};
use crate::session::{Session, Value};
use crate::spline::{CubicSpline, linspace};
use crate::utils::{render_to, timestamp_prefix};

/// Design files give lengths in microns.
const UM: f64 = 1e-6;

/// Samples used when interpolating sweep results.
pub const INTERPOLATION_POINTS: usize = 10000;

pub const STRAIGHT_TEMPLATE: &str = "wg_strip_straight";
pub const ARC_TEMPLATE: &str = "wg_strip_arc";

/// Bend loss assumed when none is configured or simulated, in dB/m.
pub const DEFAULT_BEND_LOSS: f64 = 300.;
/// Straight waveguide loss assumed when none is configured, in dB/cm.
pub const DEFAULT_STRAIGHT_LOSS: f64 = 3.0;
pub const DEFAULT_DNEFF_DT: f64 = 0.00018;
/// Kelvin.
pub const DEFAULT_TEMPERATURE: f64 = 300.;

/// Distances between the waveguide and the simulation region, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    /// From the waveguide edge to the edge of the region.
    pub width: f64,
    /// Above and below the waveguide core.
    pub height: f64,
    /// Largest bend that fits in the FDTD region.
    pub boundary_size: f64,
    /// From the bend layout to the FDTD boundary.
    pub boundary: f64,
    /// From the bend to the power monitors.
    pub bend_buffer: f64,
    /// From the output power monitor to the mode expansion monitor.
    pub expansion_offset: f64,
    /// From the bend to the edge of the straight input section.
    pub bend_to_straight: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            width: 2e-6,
            height: 1e-6,
            boundary_size: 150e-6,
            boundary: 2e-6,
            bend_buffer: 1e-6,
            expansion_offset: 0.1e-6,
            bend_to_straight: 10e-6,
        }
    }
}

/// Mode classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Smallest `(neff_next - base) / (neff - base)` of a guided mode.
    pub guided_ratio: f64,
    /// Smallest neff difference from the base of a guided mode.
    pub guided_neff_diff: f64,
    /// TE polarization fraction above which a mode is TE.
    pub te: f64,
    /// TE polarization fraction below which a mode is TM.
    pub tm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            guided_ratio: 0.1,
            guided_neff_diff: 0.05,
            te: 0.6,
            tm: 0.4,
        }
    }
}

/// A table written to a CSV file by a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep<T> {
    pub table: T,
    pub csv: PathBuf,
}

fn parse_cell(cell: &str, line: usize) -> Result<f64> {
    cell.trim()
        .parse()
        .map_err(|_| Error::Design(format!("invalid number `{cell}` on line {line}")))
}

/// Effective index and TE polarization fraction of each mode versus
/// waveguide width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeffTable {
    /// Microns.
    pub widths: Vec<f64>,
    /// Indexed by mode, then width.
    pub neff: Vec<Vec<f64>>,
    /// Indexed by mode, then width.
    pub te_fraction: Vec<Vec<f64>>,
}

impl NeffTable {
    pub fn with_modes(modes: usize) -> Self {
        Self {
            widths: Vec::new(),
            neff: vec![Vec::new(); modes],
            te_fraction: vec![Vec::new(); modes],
        }
    }

    pub fn modes(&self) -> usize {
        self.neff.len()
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("width (um)");
        for m in 1..=self.modes() {
            let _ = write!(out, ",neff - mode{m},TE pol fraction - mode{m}");
        }
        out.push('\n');
        for (w, width) in self.widths.iter().enumerate() {
            let _ = write!(out, "{width}");
            for m in 0..self.modes() {
                let _ = write!(out, ",{},{}", self.neff[m][w], self.te_fraction[m][w]);
            }
            out.push('\n');
        }
        out
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines
            .next()
            .ok_or_else(|| Error::Design("empty neff table".to_string()))?;
        let columns = header.split(',').count();
        if columns < 3 || columns % 2 == 0 {
            return Err(Error::Design(format!(
                "neff table has {columns} columns; expected width then neff and TE fraction pairs"
            )));
        }
        let mut table = Self::with_modes((columns - 1) / 2);
        for (i, line) in lines {
            let cells: Vec<&str> = line.split(',').collect();
            if cells.len() != columns {
                return Err(Error::Design(format!(
                    "line {} has {} columns, expected {columns}",
                    i + 1,
                    cells.len()
                )));
            }
            table.widths.push(parse_cell(cells[0], i + 1)?);
            for m in 0..table.modes() {
                table.neff[m].push(parse_cell(cells[1 + 2 * m], i + 1)?);
                table.te_fraction[m].push(parse_cell(cells[2 + 2 * m], i + 1)?);
            }
        }
        Ok(table)
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_csv(&fs::read_to_string(path)?)
    }
}

/// The swept parameter of a loss table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossParameter {
    Radius,
    Bezier,
}

impl LossParameter {
    fn header(&self) -> &'static str {
        match self {
            LossParameter::Radius => "Radius (um)",
            LossParameter::Bezier => "Bezier",
        }
    }

    fn mode_word(&self) -> &'static str {
        match self {
            LossParameter::Radius => "mode",
            LossParameter::Bezier => "Mode",
        }
    }

    fn file_stem(&self) -> &'static str {
        match self {
            LossParameter::Radius => "loss_vs_radius",
            LossParameter::Bezier => "loss_vs_bezier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossRow {
    pub parameter: f64,
    /// Loss of the selected mode, in dB.
    pub fundamental: f64,
    /// Loss of the total output power, in dB.
    pub total: f64,
    /// Watts.
    pub input_power: f64,
}

/// Bend loss versus radius or Bezier parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct LossTable {
    pub parameter: LossParameter,
    pub mode_label: String,
    pub mesh_accuracy: u32,
    pub rows: Vec<LossRow>,
}

impl LossTable {
    pub fn to_csv(&self) -> String {
        let mesh = self.mesh_accuracy;
        let mut out = format!(
            "{},Loss (dB) - {} {} (Mesh {mesh}),Loss (dB) - Total Output Power (Mesh {mesh}),Input Power (W)\n",
            self.parameter.header(),
            self.mode_label,
            self.parameter.mode_word(),
        );
        for row in self.rows.iter() {
            let _ = writeln!(
                out,
                "{},{},{},{}",
                row.parameter, row.fundamental, row.total, row.input_power
            );
        }
        out
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines
            .next()
            .ok_or_else(|| Error::Design("empty loss table".to_string()))?;
        let headers: Vec<&str> = header.split(',').collect();
        let parameter = match headers.first().map(|h| h.trim()) {
            Some("Bezier") => LossParameter::Bezier,
            Some("Radius (um)") => LossParameter::Radius,
            other => {
                return Err(Error::Design(format!(
                    "unknown loss table parameter `{}`",
                    other.unwrap_or_default()
                )));
            }
        };
        // `Loss (dB) - TE0 mode (Mesh 2)`
        let (mode_label, mesh_accuracy) = headers
            .get(1)
            .and_then(|h| h.strip_prefix("Loss (dB) - "))
            .and_then(|h| {
                let (label, rest) = h.split_once(' ')?;
                let mesh = rest.split_once("(Mesh ")?.1.trim_end_matches(')');
                Some((label.to_string(), mesh.parse().unwrap_or_default()))
            })
            .unwrap_or_default();

        let mut rows = Vec::new();
        for (i, line) in lines {
            let cells: Vec<&str> = line.split(',').collect();
            if cells.len() < 4 {
                return Err(Error::Design(format!(
                    "line {} has {} columns, expected 4",
                    i + 1,
                    cells.len()
                )));
            }
            rows.push(LossRow {
                parameter: parse_cell(cells[0], i + 1)?,
                fundamental: parse_cell(cells[1], i + 1)?,
                total: parse_cell(cells[2], i + 1)?,
                input_power: parse_cell(cells[3], i + 1)?,
            });
        }
        Ok(Self {
            parameter,
            mode_label,
            mesh_accuracy,
            rows,
        })
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_csv(&fs::read_to_string(path)?)
    }
}

/// `-10 log10(|ratio|)`, or `None` when the ratio cannot be expressed in dB.
fn db_loss(ratio: f64) -> Option<f64> {
    let ratio = ratio.abs();
    (ratio > 0. && ratio.is_finite()).then(|| -10. * ratio.log10())
}

fn mode_data(m: usize, field: &str) -> String {
    format!("getdata(\"FDE::data::mode{m}\", \"{field}\")")
}

#[derive(Serialize)]
struct ModelContext<'a> {
    model_name: &'a str,
    techname: &'a str,
    mode_label: &'a str,
    wavelength: String,
    wavelength_nm: i64,
    datafile: &'a str,
    radius: String,
}

/// Simulates a strip waveguide design with MODE (`M`) and FDTD (`F`)
/// sessions.
pub struct WaveguideSimulation<'a, M, F> {
    pub design: &'a WaveguideDesign,
    pub process_file: PathBuf,
    pub mode: M,
    pub fdtd: F,
    pub params: SimulationParams,
    pub intent: DesignIntent,
    /// Name of the waveguide core layer.
    pub core_layer: String,
    /// Waveguide core thickness, in meters.
    pub thickness: f64,
    pub results_dir: PathBuf,
    pub simulations_dir: PathBuf,
    pub compact_models_dir: PathBuf,
    /// Mode number (from 1) injected by sources and expanded by monitors.
    /// Without one, the fundamental mode of the design polarization is used.
    pub mode_selection: Option<usize>,
    pub margins: Margins,
    pub thresholds: Thresholds,
}

impl<'a, M: Session, F: Session> WaveguideSimulation<'a, M, F> {
    /// Reads the core thickness from the `.lbr` process file and creates the
    /// `results`, `simulations` and `compact_models` directories in `out_dir`.
    pub fn new(
        design: &'a WaveguideDesign,
        process_file: impl Into<PathBuf>,
        out_dir: &Path,
        mode: M,
        fdtd: F,
    ) -> Result<Self> {
        let process_file = process_file.into();
        let params = design
            .simulation_params
            .ok_or_else(|| Error::Design("design has no simulation-params".to_string()))?;
        let intent = design
            .design_intent
            .ok_or_else(|| Error::Design("design has no design-intent".to_string()))?;
        let core_layer = design.layer(WAVEGUIDE_ROLE)?.name;
        let thicknesses = techgen::lbr::read_thicknesses(&process_file)?;
        let thickness = *thicknesses.get(&core_layer).ok_or_else(|| {
            Error::Design(format!(
                "layer `{core_layer}` is not in {}",
                process_file.display()
            ))
        })?;

        let results_dir = out_dir.join("results");
        let simulations_dir = out_dir.join("simulations");
        let compact_models_dir = out_dir.join("compact_models");
        for dir in [&results_dir, &simulations_dir, &compact_models_dir] {
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            design,
            process_file,
            mode,
            fdtd,
            params,
            intent,
            core_layer,
            thickness,
            results_dir,
            simulations_dir,
            compact_models_dir,
            mode_selection: None,
            margins: Margins::default(),
            thresholds: Thresholds::default(),
        })
    }

    /// Trial modes requested from the eigensolver.
    fn modes_to_test(&self) -> usize {
        self.params.modes_to_monitor + 2
    }

    fn wavelength(&self) -> f64 {
        self.params.wavelength * UM
    }

    /// Adds an FDE region around a straight waveguide of the given width.
    pub fn setup_sim_region_from_width(&mut self, width: f64) -> Result<()> {
        let t = self.thickness;
        let m = self.margins;
        let modes_to_test = self.modes_to_test();
        let wavelength = self.wavelength();
        let mesh = self.params.mesh_size * UM;
        let s = &mut self.mode;
        s.add("addfde")?;
        s.set("solver type", "2D Y normal".into())?;
        s.set("x", Value::Number(width / 2. * UM))?;
        s.set("x span", Value::Number(2. * m.width + width * UM))?;
        s.set("y", Value::Number(0.))?;
        s.set("z", Value::Number(t / 2.))?;
        s.set("z span", Value::Number(t + 2. * m.height))?;
        s.set("wavelength", Value::Number(wavelength))?;
        s.set("define x mesh by", "maximum mesh step".into())?;
        s.set("dx", Value::Number(mesh))?;
        s.set("define z mesh by", "maximum mesh step".into())?;
        s.set("dz", Value::Number(mesh))?;
        s.set("number of trial modes", modes_to_test.into())?;
        Ok(())
    }

    /// Adds an FDTD region with a mode source, output power and mode
    /// expansion monitors, and an input power monitor around a 90 degree
    /// bend of the given radius and width (in microns).
    pub fn setup_sim_region_from_radius(&mut self, radius: f64, width: f64) -> Result<()> {
        let t = self.thickness;
        let m = self.margins;
        let wavelength = self.wavelength();
        let mesh_accuracy = self.params.mesh_accuracy;
        let frequency_points = self.params.frequency_points;
        let selection = self.mode_selection;
        let fundamental = match self.intent.polarization {
            Polarization::Te => "fundamental TE mode",
            Polarization::Tm => "fundamental TM mode",
        };
        let (radius, width) = (radius * UM, width * UM);
        let x_input = m.bend_to_straight - m.bend_buffer;
        let y_output = radius + m.bend_buffer;
        let x_output = m.bend_to_straight + radius;
        let z_min = -t / 2. - m.height;
        let z_max = t / 2. + m.height;
        let num = Value::Number;

        let s = &mut self.fdtd;
        s.add("addfdtd")?;
        s.set("x min", num(x_input - 2. * m.boundary))?;
        s.set("x max", num(x_output + width / 2. + m.width))?;
        s.set("y min", num(-m.width - width / 2.))?;
        s.set("y max", num(y_output + m.boundary))?;
        s.set("z min", num(z_min))?;
        s.set("z max", num(z_max))?;
        s.set("mesh accuracy", mesh_accuracy.into())?;

        s.add("addmode")?;
        s.set("injection axis", "x-axis".into())?;
        s.set("direction", "forward".into())?;
        s.set("y", num(0.))?;
        s.set("x", num(x_input - m.boundary))?;
        s.set("y span", num(width + 2. * m.width))?;
        s.set("z", num(t / 2.))?;
        s.set("z span", num(t + 2. * m.height))?;
        s.set("set wavelength", true.into())?;
        s.set("wavelength start", num(wavelength))?;
        s.set("wavelength stop", num(wavelength))?;
        match selection {
            Some(n) => {
                s.set("mode selection", "user select".into())?;
                s.set("selected mode number", n.into())?;
                s.eval(&format!("updatesourcemode({n});"))?;
            }
            None => {
                s.set("mode selection", fundamental.into())?;
                s.add("updatesourcemode")?;
            }
        }

        s.add("addpower")?;
        s.set("name", "transmission".into())?;
        s.set("monitor type", "2D Y-normal".into())?;
        s.set("x", num(x_output))?;
        s.set("x span", num(width + 2. * m.width))?;
        s.set("z min", num(z_min))?;
        s.set("z max", num(z_max))?;
        s.set("y", num(y_output))?;

        s.add("addmodeexpansion")?;
        s.set("name", "expansion".into())?;
        s.set("monitor type", "2D Y-normal".into())?;
        s.set("x", num(x_output))?;
        s.set("x span", num(width + 2. * m.width))?;
        s.set("z min", num(z_min))?;
        s.set("z max", num(z_max))?;
        s.set("y", num(y_output + m.expansion_offset))?;
        s.set("frequency points", frequency_points.into())?;
        match selection {
            Some(n) => {
                s.set("mode selection", "user select".into())?;
                s.set("selected mode numbers", n.into())?;
                s.eval(&format!("updatemodes({n});"))?;
            }
            None => {
                s.set("mode selection", fundamental.into())?;
                s.add("updatemodes")?;
            }
        }
        s.eval("setexpansion(\"T\", \"transmission\");")?;

        s.add("addpower")?;
        s.set("name", "input".into())?;
        s.set("monitor type", "2D X-normal".into())?;
        s.set("y", num(0.))?;
        s.set("y span", num(width + 2. * m.width))?;
        s.set("x", num(x_input))?;
        s.set("z min", num(z_min))?;
        s.set("z max", num(z_max))?;
        Ok(())
    }

    /// Finds the modes of every straight waveguide layout and writes
    /// `neff_vs_width.csv` to the results directory.
    pub fn neff_sweep_width(&mut self, mapping: &IndexMap<PathBuf, f64>) -> Result<Sweep<NeffTable>> {
        let modes = self.params.modes_to_monitor;
        let mut table = NeffTable::with_modes(modes);
        for (gds, &width) in mapping.iter() {
            tracing::info!(width, gds = %gds.display(), "finding modes");
            self.mode.switch_to_layout()?;
            generate_lum_geometry(&mut self.mode, &self.process_file, gds)?;
            self.setup_sim_region_from_width(width)?;
            self.mode.add("findmodes")?;
            table.widths.push(width);
            for m in 1..=modes {
                let neff = self.mode.get_f64(&format!("abs({})", mode_data(m, "neff")))?;
                let pol = self.mode.get_f64(&mode_data(m, "TE polarization fraction"))?;
                table.neff[m - 1].push(neff);
                table.te_fraction[m - 1].push(pol);
            }
        }
        let csv = self.write_result("neff_vs_width.csv", &table.to_csv())?;
        Ok(Sweep { table, csv })
    }

    fn write_result(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.results_dir.join(format!("{}{name}", timestamp_prefix()));
        fs::write(&path, contents)?;
        tracing::info!(path = %path.display(), "wrote results");
        Ok(path)
    }

    /// Reads the losses of the last FDTD run. Returns `None` when the
    /// transmission is too close to zero to convert to dB.
    fn bend_losses(&mut self, parameter: f64) -> Result<Option<LossRow>> {
        let s = &mut self.fdtd;
        s.eval("T_fund = getresult(\"expansion\", \"expansion for T\");")?;
        let t_forward = s.get_f64("T_fund.T_forward")?;
        let input = s.get_f64("transmission(\"input\")")?;
        let output = s.get_f64("transmission(\"transmission\")")?;
        match (db_loss(t_forward / input), db_loss(output / input)) {
            (Some(fundamental), Some(total)) => Ok(Some(LossRow {
                parameter,
                fundamental,
                total,
                input_power: input,
            })),
            _ => {
                tracing::warn!(
                    parameter,
                    t_forward,
                    input,
                    output,
                    "transmission too close to zero to convert to dB; skipping point"
                );
                Ok(None)
            }
        }
    }

    /// Clears the FDTD project and imports a layout.
    fn load_bend(&mut self, gds: &Path) -> Result<()> {
        self.fdtd.new_project()?;
        generate_lum_geometry(&mut self.fdtd, &self.process_file, gds)
    }

    fn fits_region(&self, radius: f64) -> bool {
        radius * UM <= self.margins.boundary_size
    }

    fn loss_table(&self, parameter: LossParameter) -> LossTable {
        LossTable {
            parameter,
            mode_label: self.intent.mode_label(),
            mesh_accuracy: self.params.mesh_accuracy,
            rows: Vec::new(),
        }
    }

    /// Simulates the loss of every bend layout and writes
    /// `loss_vs_radius.csv` to the results directory.
    ///
    /// Radii too large for the simulation region are dropped.
    pub fn loss_sweep_bend_radii(
        &mut self,
        mapping: &IndexMap<PathBuf, f64>,
        width: f64,
    ) -> Result<Sweep<LossTable>> {
        let mapping: IndexMap<&PathBuf, f64> = mapping
            .iter()
            .filter(|&(_, &radius)| {
                let fits = self.fits_region(radius);
                if !fits {
                    tracing::warn!(radius, "radius is larger than the simulation region; removing");
                }
                fits
            })
            .map(|(gds, &radius)| (gds, radius))
            .collect();

        let mut table = self.loss_table(LossParameter::Radius);
        for (gds, radius) in mapping {
            tracing::info!(radius, width, "simulating bend loss");
            self.load_bend(gds)?;
            let project = self
                .simulations_dir
                .join(format!("bend_radius_{}nm", (radius * 1e3).round() as i64));
            self.fdtd.save(&project)?;
            self.setup_sim_region_from_radius(radius, width)?;
            self.fdtd.run()?;
            table.rows.extend(self.bend_losses(radius)?);
        }
        let csv = self.write_result("loss_vs_radius.csv", &table.to_csv())?;
        Ok(Sweep { table, csv })
    }

    /// Simulates the loss of every Bezier bend layout of one radius and
    /// writes `loss_vs_bezier.csv`. Returns `None` if the radius is too
    /// large for the simulation region.
    pub fn loss_sweep_bezier(
        &mut self,
        mapping: &IndexMap<PathBuf, f64>,
        radius: f64,
        width: f64,
    ) -> Result<Option<Sweep<LossTable>>> {
        if !self.fits_region(radius) {
            tracing::warn!(radius, "radius is larger than the simulation region; skipping sweep");
            return Ok(None);
        }
        let mut table = self.loss_table(LossParameter::Bezier);
        for (gds, &b) in mapping.iter() {
            tracing::info!(bezier = b, radius, width, "simulating bend loss");
            self.load_bend(gds)?;
            self.setup_sim_region_from_radius(radius, width)?;
            let project = self
                .simulations_dir
                .join(format!("bezier_param_{}", b.to_string().replace('.', "_")));
            self.fdtd.save(&project)?;
            self.fdtd.run()?;
            table.rows.extend(self.bend_losses(b)?);
        }
        let csv = self.write_result(
            &format!("{}.csv", LossParameter::Bezier.file_stem()),
            &table.to_csv(),
        )?;
        Ok(Some(Sweep { table, csv }))
    }

    /// Runs [`WaveguideSimulation::loss_sweep_bezier`] for each radius.
    pub fn loss_sweep_bezier_radius(
        &mut self,
        sweeps: &[(f64, IndexMap<PathBuf, f64>)],
        width: f64,
    ) -> Result<Vec<(f64, Sweep<LossTable>)>> {
        let mut out = Vec::new();
        for (radius, mapping) in sweeps {
            if let Some(sweep) = self.loss_sweep_bezier(mapping, *radius, width)? {
                out.push((*radius, sweep));
            }
        }
        Ok(out)
    }

    /// The narrowest width that guides the design mode while keeping the
    /// next mode of the same polarization guided too, judged against the
    /// average effective index of all modes at the first width.
    ///
    /// On success, selects the design mode for later FDTD simulations.
    pub fn optimize_width(&mut self, table: &NeffTable) -> Option<f64> {
        if table.widths.is_empty() || table.modes() == 0 {
            tracing::warn!("no neff data; cannot optimize width");
            return None;
        }
        let base = table.neff.iter().map(|n| n[0]).sum::<f64>() / table.modes() as f64;
        let th = self.thresholds;
        let mode_num = self.intent.mode_num + 1;
        let polarization = self.intent.polarization;

        for (w, &width) in table.widths.iter().enumerate() {
            let mut te = Vec::new();
            let mut tm = Vec::new();
            for m in 0..table.modes() {
                let pol = table.te_fraction[m][w];
                if pol > th.te {
                    te.push(m);
                } else if pol < th.tm {
                    tm.push(m);
                }
            }
            let modes = match polarization {
                Polarization::Te => &te,
                Polarization::Tm => &tm,
            };
            if modes.len() <= mode_num {
                continue;
            }
            let spec = table.neff[modes[mode_num - 1]][w] - base;
            let next = table.neff[modes[mode_num]][w] - base;
            if next / spec > th.guided_ratio
                && next > th.guided_neff_diff
                && spec > th.guided_neff_diff
            {
                let selected = modes[mode_num - 1] + 1;
                self.mode_selection = Some(selected);
                tracing::info!(
                    width,
                    mode = self.intent.mode_label(),
                    selected,
                    "found optimal width"
                );
                return Some(width);
            }
        }
        tracing::warn!(mode = self.intent.mode_label(), "no width guides the design mode");
        None
    }

    /// The Bezier parameter with the lowest loss in the design mode,
    /// interpolated with a cubic spline when there are enough points.
    pub fn optimize_bezier(&self, table: &LossTable) -> Option<f64> {
        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| a.parameter.total_cmp(&b.parameter));
        rows.dedup_by(|a, b| a.parameter == b.parameter);

        let raw_minimum = || {
            rows.iter()
                .min_by(|a, b| a.fundamental.total_cmp(&b.fundamental))
                .map(|r| r.parameter)
        };
        let optimal = if rows.len() >= 4 {
            let xs: Vec<f64> = rows.iter().map(|r| r.parameter).collect();
            let ys: Vec<f64> = rows.iter().map(|r| r.fundamental).collect();
            match CubicSpline::not_a_knot(&xs, &ys) {
                Ok(spline) => {
                    let samples = linspace(xs[0], xs[xs.len() - 1], INTERPOLATION_POINTS);
                    let losses = spline.eval_all(&samples);
                    losses
                        .iter()
                        .enumerate()
                        .min_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| samples[i])
                }
                Err(e) => {
                    tracing::warn!("cannot interpolate bezier losses: {e}");
                    raw_minimum()
                }
            }
        } else {
            raw_minimum()
        };
        match optimal {
            Some(b) => tracing::info!(bezier = b, "found optimal bezier parameter"),
            None => tracing::warn!("no loss data; cannot optimize bezier parameter"),
        }
        optimal
    }

    fn compact_model_params(&self) -> Result<&'a CompactModelParams> {
        self.design
            .compact_model
            .as_ref()
            .ok_or_else(|| Error::Design("design has no compact-model".to_string()))
    }

    /// Selects the design mode among the modes found by the last `findmodes`.
    fn select_design_mode(&mut self) -> Result<usize> {
        let mode_num = self.intent.mode_num + 1;
        let (mut te, mut tm) = (0, 0);
        for m in 1..=self.params.modes_to_monitor {
            let pol = self.mode.get_f64(&mode_data(m, "TE polarization fraction"))?;
            if pol > self.thresholds.te {
                te += 1;
            } else if pol < self.thresholds.tm {
                tm += 1;
            }
            let found = match self.intent.polarization {
                Polarization::Te => te == mode_num,
                Polarization::Tm => tm == mode_num,
            };
            if found {
                self.mode_selection = Some(m);
                return Ok(m);
            }
        }
        Err(Error::Design(format!(
            "no {} mode among the first {} modes",
            self.intent.mode_label(),
            self.params.modes_to_monitor
        )))
    }

    /// Stores the model data shared by straight and bent waveguides in
    /// session variables.
    fn put_model_data<S: Session>(
        session: &mut S,
        dispersion: &ModeDispersion,
        model: &CompactModelParams,
        polarization: Polarization,
        wavelength: f64,
        loss: f64,
    ) -> Result<()> {
        session.eval("clear;")?;
        session.putv("D", dispersion.d.clone())?;
        session.putv("ng", dispersion.ng.clone())?;
        session.putv("neff", Value::Number(dispersion.neff))?;
        session.putv(
            "dneff_dT",
            Value::Number(model.dneff_dt.unwrap_or(DEFAULT_DNEFF_DT)),
        )?;
        session.putv("loss", Value::Number(loss))?;
        let id = match polarization {
            Polarization::Te => 1,
            Polarization::Tm => 2,
        };
        session.eval(&format!(
            "mode_data = cell(1); mode_data{{1}} = struct; mode_data{{1}}.ID = {id}; mode_data{{1}}.name = \"{}\";",
            polarization.as_str()
        ))?;
        session.putv(
            "temperature_data",
            Value::Number(model.temperature_data.unwrap_or(DEFAULT_TEMPERATURE)),
        )?;
        session.putv("wavelength_data", Value::Number(wavelength))?;
        Ok(())
    }

    /// Writes a compact model directory: the `.lsf` and `.svg` rendered from
    /// `template`, and the JSON data file saved by the session.
    fn write_model_dir(&self, template: &str, model_name: &str, json: &Path, radius: f64) -> Result<PathBuf> {
        if !json.exists() {
            return Err(Error::MissingOutput(json.to_path_buf()));
        }
        let datafile = json
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = self.compact_models_dir.join(model_name);
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                fs::remove_file(&path)?;
            }
        }
        fs::copy(json, dir.join(&datafile))?;

        let mode_label = self.intent.mode_label();
        let context = Context::from_serialize(ModelContext {
            model_name,
            techname: &self.design.techname,
            mode_label: &mode_label,
            wavelength: format!("{:e}", self.wavelength()),
            wavelength_nm: (self.params.wavelength * 1e3).round() as i64,
            datafile: &datafile,
            radius: format!("{:e}", radius * UM),
        })?;
        render_to(&format!("{template}.lsf"), &context, dir.join(format!("{model_name}.lsf")))?;
        render_to(&format!("{template}.svg"), &context, dir.join(format!("{model_name}.svg")))?;
        tracing::info!(dir = %dir.display(), "created compact model");
        Ok(dir)
    }

    /// Generates straight and bent waveguide compact models and
    /// `WAVEGUIDES.xml` for the given geometry (in microns).
    ///
    /// When `simulate_bend` is false, or the bend does not fit in the
    /// simulation region, the bend loss is the configured value or a default.
    /// Returns the model directories with their photonic models.
    pub fn generate_compact_model_files(
        &mut self,
        geometry: &WaveguideGeometry<'_>,
        width: f64,
        radius: f64,
        bezier: f64,
        simulate_bend: bool,
    ) -> Result<IndexMap<PathBuf, String>> {
        let model = self.compact_model_params()?;
        let wavelength = self.wavelength();
        let polarization = self.intent.polarization;
        let mut models = IndexMap::new();

        // Straight waveguide.
        let straight_gds = geometry.generate_gds_from_width(width)?;
        self.mode.switch_to_layout()?;
        generate_lum_geometry(&mut self.mode, &self.process_file, &straight_gds)?;
        self.setup_sim_region_from_width(width)?;
        self.mode.add("findmodes")?;
        let selected = self.select_design_mode()?;

        let modes_to_test = self.modes_to_test();
        let frequency_points = self.params.frequency_points;
        let s = &mut self.mode;
        s.eval(&format!("selectmode({selected});"))?;
        s.eval("setanalysis(\"track selected mode\", 1);")?;
        s.eval(&format!("setanalysis(\"wavelength\", {});", Value::Number(wavelength)))?;
        s.eval(&format!("setanalysis(\"stop wavelength\", {});", Value::Number(wavelength)))?;
        s.eval(&format!("setanalysis(\"number of points\", {frequency_points});"))?;
        s.eval(&format!("setanalysis(\"number of test modes\", {modes_to_test});"))?;
        s.eval("setanalysis(\"detailed dispersion calculation\", 1);")?;
        s.add("frequencysweep")?;
        let dispersion = ModeDispersion {
            neff: s.get_f64("abs(getdata(\"FDE::data::frequencysweep\", \"neff\"))")?,
            ng: s.get("c / abs(getdata(\"FDE::data::frequencysweep\", \"vg\"))")?,
            d: s.get("real(getdata(\"FDE::data::frequencysweep\", \"D\"))")?,
        };

        let straight_loss = model.straight_loss.unwrap_or(DEFAULT_STRAIGHT_LOSS) * 100.;
        Self::put_model_data(s, &dispersion, model, polarization, wavelength, straight_loss)?;
        s.putv("wg_length", Value::Number(10e-6))?;
        s.putv("wg_length_max", Value::Number(1.))?;
        s.putv("wg_length_min", Value::Number(0.))?;
        let straight_json = self
            .compact_models_dir
            .join(format!("{}{}.json", timestamp_prefix(), model.name));
        self.mode
            .eval(&format!("jsonsave({});", Value::from(straight_json.as_path())))?;
        self.mode.flush()?;
        let dir = self.write_model_dir(STRAIGHT_TEMPLATE, &model.name, &straight_json, radius)?;
        models.insert(dir, model.photonic_model.clone());

        // Bend.
        let configured_bend_loss = model.bend_loss.map(|l| l * 100.);
        let bend_loss = if simulate_bend && self.fits_region(radius) {
            let bend_gds = geometry.generate_gds_from_params(width, radius, bezier)?;
            self.load_bend(&bend_gds)?;
            self.setup_sim_region_from_radius(radius, width)?;
            let project = self
                .simulations_dir
                .join(format!("{}wg_bend_cml", timestamp_prefix()));
            self.fdtd.save(&project)?;
            self.fdtd.run()?;
            match (configured_bend_loss, self.bend_losses(radius)?) {
                (Some(loss), _) => loss,
                (None, Some(row)) => row.fundamental / (PI * radius * UM / 2.),
                (None, None) => DEFAULT_BEND_LOSS,
            }
        } else {
            if simulate_bend {
                tracing::warn!(radius, "radius is larger than the simulation region; not simulating bend");
            }
            configured_bend_loss.unwrap_or(DEFAULT_BEND_LOSS)
        };
        tracing::info!(bend_loss, "bend loss (dB/m)");

        let s = &mut self.fdtd;
        Self::put_model_data(s, &dispersion, model, polarization, wavelength, bend_loss)?;
        s.putv("radius", Value::Number(radius * UM))?;
        s.putv("theta", Value::Number(PI / 2.))?;
        let arc_json = self
            .compact_models_dir
            .join(format!("{}wg_strip_arc.json", timestamp_prefix()));
        self.fdtd
            .eval(&format!("jsonsave({});", Value::from(arc_json.as_path())))?;
        self.fdtd.flush()?;
        let arc_name = format!(
            "wg_arc_{}_{}",
            self.intent.mode_label(),
            (self.params.wavelength * 1e3).round() as i64
        );
        let dir = self.write_model_dir(ARC_TEMPLATE, &arc_name, &arc_json, radius)?;
        models.insert(dir, model.photonic_model.clone());

        self.write_waveguides_xml(model, width, radius, bezier)?;
        Ok(models)
    }

    /// Describes the waveguide for layout tools: its core and device
    /// recognition layers.
    pub fn waveguides_xml(&self, model: &CompactModelParams, width: f64, radius: f64, bezier: f64) -> Element {
        let mut waveguide = Element::new("waveguide");
        waveguide.text_child("name", &self.design.name);
        waveguide.text_child("CML", &self.design.techname);
        waveguide.text_child("model", &model.name);
        waveguide.text_child("bezier", bezier);
        waveguide.text_child("radius", radius);
        waveguide.text_child("width", width);
        for (layer, width) in [(self.core_layer.as_str(), width), ("DevRec", width + 1.0)] {
            waveguide.push(
                Element::new("component")
                    .with_child(Element::new("layer").with_text(layer))
                    .with_child(Element::new("width").with_text(width))
                    .with_child(Element::new("offset").with_text("0.0")),
            );
        }
        Element::new("waveguides").with_child(waveguide)
    }

    fn write_waveguides_xml(
        &self,
        model: &CompactModelParams,
        width: f64,
        radius: f64,
        bezier: f64,
    ) -> Result<PathBuf> {
        let xml = self.waveguides_xml(model, width, radius, bezier);
        let path = self.compact_models_dir.join("WAVEGUIDES.xml");
        xml.write_pretty(&path, 2)?;
        fs::copy(
            &path,
            self.compact_models_dir
                .join(format!("{}WAVEGUIDES.xml", timestamp_prefix())),
        )?;
        Ok(path)
    }
}

/// Frequency sweep results of the design mode.
struct ModeDispersion {
    neff: f64,
    ng: Value,
    d: Value,
}
