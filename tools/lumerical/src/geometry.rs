//! Waveguide layouts and their import into Lumerical's layer builder.

use std::fs;
use std::path::{Path, PathBuf};

use config::ToolLocator;
use gds21::{GdsBoundary, GdsElement, GdsLibrary, GdsPoint, GdsStruct, GdsUnits};
use indexmap::IndexMap;
use klayout::{PcellParams, generate_gds_from_pcell};
use serde::Deserialize;
use serde_json::{Map, json};

use crate::error::{Error, Result};
use crate::session::{Session, Value};

/// Space added around the layout in the layer builder, in meters.
pub const LAYER_BUILDER_BUFFER: f64 = 6e-6;

/// Database unit of generated layouts, in microns.
pub const DBU: f64 = 1e-3;

/// Sweep values closer than this to the end of the range are included.
const SWEEP_EPSILON: f64 = 1e-9;

/// An axis-aligned bounding box in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl BBox {
    fn around(x: f64, y: f64) -> Self {
        Self {
            min: [x, y],
            max: [x, y],
        }
    }

    fn include(&mut self, x: f64, y: f64) {
        self.min = [self.min[0].min(x), self.min[1].min(y)];
        self.max = [self.max[0].max(x), self.max[1].max(y)];
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }
}

/// The bounding box of every boundary and path in a GDS file.
pub fn layout_bbox(path: impl AsRef<Path>) -> Result<BBox> {
    let path = path.as_ref();
    let lib = GdsLibrary::load(path)?;
    let scale = lib.units.db_unit();
    let mut bbox: Option<BBox> = None;
    let points = lib.structs.iter().flat_map(|s| s.elems.iter()).flat_map(|e| match e {
        GdsElement::GdsBoundary(b) => b.xy.as_slice(),
        GdsElement::GdsPath(p) => p.xy.as_slice(),
        _ => &[][..],
    });
    for p in points {
        let (x, y) = (p.x as f64 * scale, p.y as f64 * scale);
        match bbox.as_mut() {
            Some(bbox) => bbox.include(x, y),
            None => bbox = Some(BBox::around(x, y)),
        }
    }
    bbox.ok_or_else(|| Error::Design(format!("layout {} has no shapes", path.display())))
}

/// Imports a layout into the session with the layer builder.
///
/// The layer builder spans twice the layout plus a small buffer in each
/// direction.
pub fn generate_lum_geometry<S: Session + ?Sized>(
    session: &mut S,
    process_file: &Path,
    gds_file: &Path,
) -> Result<()> {
    let bbox = layout_bbox(gds_file)?;
    session.eval("deleteall;")?;
    session.add("addlayerbuilder")?;
    session.set("x span", Value::Number(bbox.width() * 2. + LAYER_BUILDER_BUFFER))?;
    session.set("y span", Value::Number(bbox.height() * 2. + LAYER_BUILDER_BUFFER))?;
    session.eval(&format!("loadprocessfile({});", Value::from(process_file)))?;
    session.eval(&format!("loadgdsfile({});", Value::from(gds_file)))?;
    Ok(())
}

/// Writes a straight waveguide: a `width` by `length` box (in microns) from
/// `x = 0`, centered on `y = 0`, in a top cell named `TOP`.
pub fn write_straight_waveguide_gds(
    path: &Path,
    layer: (i16, i16),
    width: f64,
    length: f64,
) -> Result<()> {
    let to_dbu = |v: f64| (v / DBU).round() as i32;
    let (x0, x1) = (0, to_dbu(width));
    let (y0, y1) = (-to_dbu(length / 2.), to_dbu(length / 2.));

    let mut top = GdsStruct::new("TOP");
    top.elems.push(GdsElement::GdsBoundary(GdsBoundary {
        layer: layer.0,
        datatype: layer.1,
        xy: vec![
            GdsPoint::new(x0, y0),
            GdsPoint::new(x1, y0),
            GdsPoint::new(x1, y1),
            GdsPoint::new(x0, y1),
            GdsPoint::new(x0, y0),
        ],
        ..Default::default()
    }));
    let mut lib = GdsLibrary::new("LIB");
    lib.units = GdsUnits::new(DBU, DBU * 1e-6);
    lib.structs.push(top);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    lib.save(path)?;
    tracing::info!(path = %path.display(), width, "created straight waveguide layout");
    Ok(())
}

/// Values from `start` to `end` inclusive, `step` apart.
///
/// Values are computed from the step index rather than accumulated, so the
/// end of the range is reached exactly.
pub fn sweep_values(start: f64, end: f64, step: f64) -> Result<Vec<f64>> {
    if !(step.is_finite() && step > 0.) {
        return Err(Error::Design(format!("sweep step must be positive, got {step}")));
    }
    if end < start {
        return Ok(Vec::new());
    }
    let count = ((end - start) / step + SWEEP_EPSILON).floor() as usize + 1;
    Ok((0..count)
        .map(|i| ((start + i as f64 * step) * 1e12).round() / 1e12)
        .collect())
}

/// Microns to whole nanometers, as used in file names.
fn nm(um: f64) -> i64 {
    (um * 1e3).round() as i64
}

/// A GDS layer named in a design file as `"Name - layer:datatype"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: String,
    pub layer: i16,
    pub datatype: i16,
}

impl LayerSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || Error::Design(format!("invalid layer `{spec}`; expected `Name - layer:datatype`"));
        let (name, source) = spec.rsplit_once(" - ").ok_or_else(invalid)?;
        let (layer, datatype) = source.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            name: name.trim().to_string(),
            layer: layer.trim().parse().map_err(|_| invalid())?,
            datatype: datatype.trim().parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DesignParams {
    pub width: f64,
    pub radius: f64,
    pub bezier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Polarization {
    #[serde(rename = "TE")]
    Te,
    #[serde(rename = "TM")]
    Tm,
}

impl Polarization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarization::Te => "TE",
            Polarization::Tm => "TM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DesignIntent {
    pub polarization: Polarization,
    /// Zero for the fundamental mode.
    pub mode_num: usize,
}

impl DesignIntent {
    /// The mode as the designer names it, such as `TE0`.
    pub fn mode_label(&self) -> String {
        format!("{}{}", self.polarization.as_str(), self.mode_num)
    }
}

/// Simulation settings, with lengths in microns.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulationParams {
    pub modes_to_monitor: usize,
    pub wavelength: f64,
    pub mesh_size: f64,
    pub mesh_accuracy: u32,
    pub frequency_points: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompactModelParams {
    pub name: String,
    pub photonic_model: String,
    /// dB/cm.
    pub straight_loss: Option<f64>,
    #[serde(rename = "dneff-dT")]
    pub dneff_dt: Option<f64>,
    /// Kelvin.
    pub temperature_data: Option<f64>,
    /// dB/cm.
    pub bend_loss: Option<f64>,
}

/// A waveguide design file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WaveguideDesign {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_library")]
    pub techname: String,
    #[serde(default = "default_library")]
    pub libname: String,
    #[serde(default = "default_name")]
    pub pcellname: String,
    pub design_params: DesignParams,
    /// Layers keyed by role, such as `Waveguide: "Si - 1:0"`.
    pub layers: IndexMap<String, String>,
    pub simulation_params: Option<SimulationParams>,
    pub design_intent: Option<DesignIntent>,
    pub compact_model: Option<CompactModelParams>,
}

fn default_name() -> String {
    "Waveguide".to_string()
}

fn default_library() -> String {
    "EBeam".to_string()
}

/// Layer role of the waveguide core.
pub const WAVEGUIDE_ROLE: &str = "Waveguide";

impl WaveguideDesign {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// The layer playing `role`.
    pub fn layer(&self, role: &str) -> Result<LayerSpec> {
        let spec = self
            .layers
            .get(role)
            .ok_or_else(|| Error::Design(format!("no `{role}` layer")))?;
        LayerSpec::parse(spec)
    }
}

/// Generates waveguide layouts for a design.
pub struct WaveguideGeometry<'a> {
    pub design: &'a WaveguideDesign,
    pub gds_dir: PathBuf,
    /// Where KLayout scripts and logs are written.
    pub work_dir: PathBuf,
    pub locator: &'a ToolLocator,
    /// Length of straight waveguides, in microns.
    pub length: f64,
    /// Distance from the bend to the straight input, in microns.
    pub bend_to_straight_margin: f64,
}

impl<'a> WaveguideGeometry<'a> {
    pub fn new(design: &'a WaveguideDesign, gds_dir: impl Into<PathBuf>, locator: &'a ToolLocator) -> Self {
        let gds_dir = gds_dir.into();
        Self {
            design,
            work_dir: gds_dir.join("klayout"),
            gds_dir,
            locator,
            length: 3.0,
            bend_to_straight_margin: 10.0,
        }
    }

    /// Writes a straight waveguide of the given width (in microns).
    pub fn generate_gds_from_width(&self, width: f64) -> Result<PathBuf> {
        let layer = self.design.layer(WAVEGUIDE_ROLE)?;
        let path = self.gds_dir.join(format!("Waveguide_w={}nm.gds", nm(width)));
        write_straight_waveguide_gds(&path, (layer.layer, layer.datatype), width, self.length)?;
        Ok(path)
    }

    /// Instantiates a bend: a straight section followed by a 90 degree turn.
    fn bend(&self, gds_path: PathBuf, width: f64, radius: f64, bezier: Option<f64>) -> Result<PathBuf> {
        let length = radius + self.bend_to_straight_margin;
        let mut params = Map::new();
        params.insert("path".into(), json!([[0.0, 0.0], [length, 0.0], [length, length]]));
        params.insert("radius".into(), json!(radius));
        params.insert("widths".into(), json!([width]));
        match bezier {
            Some(b) => {
                params.insert("bezier".into(), json!(b));
                params.insert("adiab".into(), json!(1));
            }
            None => {
                params.insert("adiab".into(), json!(0));
            }
        }
        let written = generate_gds_from_pcell(
            &PcellParams {
                tech_name: &self.design.techname,
                lib_name: &self.design.libname,
                pcell_name: &self.design.pcellname,
                params: &params,
                gds_path: &gds_path,
                work_dir: &self.work_dir,
            },
            self.locator,
        )?;
        Ok(written)
    }

    /// Writes an adiabatic bend with the given parameters.
    pub fn generate_gds_from_params(&self, width: f64, radius: f64, bezier: f64) -> Result<PathBuf> {
        let path = self.gds_dir.join(format!(
            "Waveguide_w={}nm_r={}nm_b={bezier}.gds",
            nm(width),
            nm(radius)
        ));
        self.bend(path, width, radius, Some(bezier))
    }

    /// Writes one straight waveguide per width.
    pub fn sweep_width(&self, start: f64, end: f64, step: f64) -> Result<IndexMap<PathBuf, f64>> {
        tracing::info!(start, end, step, "sweeping waveguide width");
        let mut mapping = IndexMap::new();
        for width in sweep_values(start, end, step)? {
            mapping.insert(self.generate_gds_from_width(width)?, width);
        }
        Ok(mapping)
    }

    /// Writes one circular bend per radius.
    pub fn sweep_radius(&self, width: f64, start: f64, end: f64, step: f64) -> Result<IndexMap<PathBuf, f64>> {
        tracing::info!(width, start, end, step, "sweeping bend radius");
        let mut mapping = IndexMap::new();
        for radius in sweep_values(start, end, step)? {
            let path = self.gds_dir.join(format!("Waveguide_r={}nm.gds", nm(radius)));
            mapping.insert(self.bend(path, width, radius, None)?, radius);
        }
        Ok(mapping)
    }

    /// Writes one adiabatic bend per Bezier parameter.
    pub fn sweep_bezier(
        &self,
        width: f64,
        radius: f64,
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<IndexMap<PathBuf, f64>> {
        tracing::info!(width, radius, start, end, step, "sweeping bezier parameter");
        let mut mapping = IndexMap::new();
        for b in sweep_values(start, end, step)? {
            let path = self
                .gds_dir
                .join(format!("Waveguide_b={b}_r={}nm.gds", nm(radius)));
            mapping.insert(self.bend(path, width, radius, Some(b))?, b);
        }
        Ok(mapping)
    }

    /// Runs a Bezier sweep for each radius.
    pub fn sweep_bezier_and_radius(
        &self,
        width: f64,
        radii: &[f64],
        start: f64,
        end: f64,
        step: f64,
    ) -> Result<Vec<(f64, IndexMap<PathBuf, f64>)>> {
        radii
            .iter()
            .map(|&radius| Ok((radius, self.sweep_bezier(width, radius, start, end, step)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use config::Tool;

    use super::*;
    use crate::testing::RecordingSession;
    use crate::tests::{DESIGN, test_dir, write_stand_in};

    /// A KLayout stand-in that writes a small layout wherever it is told to.
    fn fake_klayout(path: &Path) -> anyhow::Result<()> {
        write_stand_in(
            path,
            r#"for arg in "$@"; do
  case "$arg" in
    out_dir=*) out="${arg#out_dir=}" ;;
    params=*) echo "${arg#params=}" >> params.log ;;
  esac
done
[ -n "$out" ] && printf 'GDS' > "$out"
"#,
        )
    }

    #[test]
    fn parses_design_file() -> anyhow::Result<()> {
        let design = WaveguideDesign::from_yaml(DESIGN)?;
        assert_eq!(design.libname, "EBeam");
        assert_eq!(design.pcellname, "Waveguide");
        assert_eq!(design.design_params.radius, 5.);
        assert_eq!(
            design.layer("Waveguide")?,
            LayerSpec {
                name: "Si".into(),
                layer: 1,
                datatype: 0
            }
        );
        let intent = design.design_intent.unwrap();
        assert_eq!(intent.mode_label(), "TE0");
        let model = design.compact_model.as_ref().unwrap();
        assert_eq!(model.straight_loss, Some(2.5));
        assert_eq!(model.bend_loss, None);
        assert!(design.layer("Slab").is_err());
        Ok(())
    }

    #[test]
    fn rejects_malformed_layers() {
        assert!(LayerSpec::parse("Si 1:0").is_err());
        assert!(LayerSpec::parse("Si - 1").is_err());
        assert!(LayerSpec::parse("Si - a:0").is_err());
        assert_eq!(LayerSpec::parse("Si Nitride - 4:1").unwrap().name, "Si Nitride");
    }

    #[test]
    fn sweeps_include_the_end_of_the_range() -> anyhow::Result<()> {
        assert_eq!(sweep_values(1., 10., 1.)?.len(), 10);
        assert_eq!(sweep_values(0.1, 0.6, 0.1)?, [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(sweep_values(0.1, 0.8, 0.01)?.len(), 71);
        assert_eq!(sweep_values(2., 1., 0.5)?, Vec::<f64>::new());
        assert!(sweep_values(0., 1., 0.).is_err());
        assert!(sweep_values(0., 1., -1.).is_err());
        Ok(())
    }

    #[test]
    fn straight_waveguide_layout() -> anyhow::Result<()> {
        let dir = test_dir("straight_waveguide_layout")?;
        let path = dir.join("wg.gds");
        write_straight_waveguide_gds(&path, (1, 0), 0.5, 3.0)?;

        let lib = GdsLibrary::load(&path).map_err(Error::from)?;
        assert_eq!(lib.structs.len(), 1);
        let GdsElement::GdsBoundary(boundary) = &lib.structs[0].elems[0] else {
            panic!("expected a boundary");
        };
        assert_eq!((boundary.layer, boundary.datatype), (1, 0));

        let bbox = layout_bbox(&path)?;
        assert_relative_eq!(bbox.width(), 0.5e-6, max_relative = 1e-9);
        assert_relative_eq!(bbox.height(), 3e-6, max_relative = 1e-9);
        assert_relative_eq!(bbox.min[1], -1.5e-6, max_relative = 1e-9);
        Ok(())
    }

    #[test]
    fn unreadable_layouts_are_shareable_errors() -> anyhow::Result<()> {
        let dir = test_dir("unreadable_layouts_are_shareable_errors")?;
        let path = dir.join("not_a_layout.gds");
        std::fs::write(&path, b"not a layout")?;

        let err = layout_bbox(&path).unwrap_err();
        assert!(matches!(err, Error::Gds(_)));
        // Layout errors must cross into the optimizer and `anyhow`.
        assert!(matches!(optim::Error::problem(err), optim::Error::Problem(_)));
        let _: anyhow::Error = layout_bbox(&path).unwrap_err().into();
        Ok(())
    }

    #[test]
    fn layer_builder_commands() -> anyhow::Result<()> {
        let dir = test_dir("layer_builder_commands")?;
        let gds = dir.join("wg.gds");
        write_straight_waveguide_gds(&gds, (1, 0), 0.5, 3.0)?;
        let mut session = RecordingSession::new();
        generate_lum_geometry(&mut session, Path::new("/pdk/EBeam.lbr"), &gds)?;

        assert_eq!(session.commands[0], "deleteall;");
        assert_eq!(session.commands[1], "addlayerbuilder;");
        let span = |command: &str| -> f64 {
            let value = command.trim_end_matches(");").rsplit(", ").next().unwrap();
            value.parse().unwrap()
        };
        assert!(session.commands[2].starts_with("set(\"x span\", "));
        assert_relative_eq!(span(&session.commands[2]), 7e-6, max_relative = 1e-9);
        assert_relative_eq!(span(&session.commands[3]), 1.2e-5, max_relative = 1e-9);
        assert_eq!(session.commands[4], "loadprocessfile(\"/pdk/EBeam.lbr\");");
        assert_eq!(session.commands[5], format!("loadgdsfile(\"{}\");", gds.display()));
        Ok(())
    }

    #[test]
    fn width_sweep_writes_layouts() -> anyhow::Result<()> {
        let dir = test_dir("width_sweep_writes_layouts")?;
        let design = WaveguideDesign::from_yaml(DESIGN)?;
        let locator = ToolLocator::new(Vec::<PathBuf>::new());
        let geometry = WaveguideGeometry::new(&design, &dir, &locator);

        let mapping = geometry.sweep_width(0.4, 0.6, 0.1)?;
        let names: Vec<_> = mapping
            .keys()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["Waveguide_w=400nm.gds", "Waveguide_w=500nm.gds", "Waveguide_w=600nm.gds"]
        );
        assert!(mapping.keys().all(|p| p.exists()));
        Ok(())
    }

    #[test]
    fn radius_sweep_yields_one_layout_per_radius() -> anyhow::Result<()> {
        let dir = test_dir("radius_sweep_yields_one_layout_per_radius")?;
        let klayout = dir.join("klayout_app");
        fake_klayout(&klayout)?;
        let design = WaveguideDesign::from_yaml(DESIGN)?;
        let locator = ToolLocator::new(Vec::<PathBuf>::new()).with_override(Tool::KLayout, &klayout);
        let geometry = WaveguideGeometry::new(&design, dir.join("gds"), &locator);

        let mapping = geometry.sweep_radius(0.5, 1., 10., 1.)?;
        assert_eq!(mapping.len(), 10);
        let radii: Vec<f64> = mapping.values().copied().collect();
        assert!(radii.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(radii.first(), Some(&1.));
        assert_eq!(radii.last(), Some(&10.));
        assert!(mapping.keys().all(|p| p.exists()));
        assert!(dir.join("gds").join("Waveguide_r=10000nm.gds").exists());

        let params = fs::read_to_string(geometry.work_dir.join("params.log"))?;
        let first: serde_json::Value = serde_json::from_str(params.lines().next().unwrap())?;
        assert_eq!(first["path"], json!([[0.0, 0.0], [11.0, 0.0], [11.0, 11.0]]));
        assert_eq!(first["adiab"], json!(0));
        Ok(())
    }

    #[test]
    fn bezier_sweeps_name_layouts_by_parameter() -> anyhow::Result<()> {
        let dir = test_dir("bezier_sweeps_name_layouts_by_parameter")?;
        let klayout = dir.join("klayout_app");
        fake_klayout(&klayout)?;
        let design = WaveguideDesign::from_yaml(DESIGN)?;
        let locator = ToolLocator::new(Vec::<PathBuf>::new()).with_override(Tool::KLayout, &klayout);
        let geometry = WaveguideGeometry::new(&design, dir.join("gds"), &locator);

        let sweeps = geometry.sweep_bezier_and_radius(0.5, &[5., 10.], 0.1, 0.3, 0.1)?;
        assert_eq!(sweeps.len(), 2);
        assert_eq!(sweeps[0].0, 5.);
        let names: Vec<_> = sweeps[0]
            .1
            .keys()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "Waveguide_b=0.1_r=5000nm.gds",
                "Waveguide_b=0.2_r=5000nm.gds",
                "Waveguide_b=0.3_r=5000nm.gds"
            ]
        );

        let single = geometry.generate_gds_from_params(0.5, 5., 0.25)?;
        assert!(single.ends_with("Waveguide_w=500nm_r=5000nm_b=0.25.gds"));
        Ok(())
    }
}
