//! Layout export from a Lumerical session through the
//! `Lumerical_GDS_auto_export` script, which must be on the session's path.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::Context;

use crate::TEMPLATES;
use crate::error::Result;
use crate::session::{Session, Value};

/// Slab of the simulation exported to one GDS layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerDef {
    pub layer: i16,
    pub datatype: i16,
    /// Meters.
    pub z_min: f64,
    pub z_max: f64,
}

impl LayerDef {
    /// A layer covering a core of the given thickness centered on `z = 0`.
    pub fn centered(layer: i16, datatype: i16, thickness: f64) -> Self {
        Self {
            layer,
            datatype,
            z_min: -thickness / 2.,
            z_max: thickness / 2.,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GdsExportOptions {
    /// Sides used to approximate circles.
    pub n_circle: u32,
    /// Slices used to approximate rings.
    pub n_ring: u32,
    pub n_custom: u32,
    pub n_wg: u32,
    /// Rounds z and z span to this many nanometers.
    pub round_to_nm: u32,
    /// Snapping grid, in meters.
    pub grid: f64,
    pub max_objects: u32,
}

impl Default for GdsExportOptions {
    fn default() -> Self {
        Self {
            n_circle: 64,
            n_ring: 64,
            n_custom: 64,
            n_wg: 64,
            round_to_nm: 1,
            grid: 1e-9,
            max_objects: 10000,
        }
    }
}

#[derive(Serialize)]
struct ExportContext<'a> {
    gds_filename: &'a str,
    top_cell: &'a str,
    layer_def: String,
    #[serde(flatten)]
    options: GdsExportOptions,
}

/// Renders the script exporting every object in the layout to `gds_file`.
pub fn export_gds_script(
    gds_file: &Path,
    top_cell: &str,
    layers: &[LayerDef],
    options: &GdsExportOptions,
) -> Result<String> {
    let layer_def = layers
        .iter()
        .map(|l| {
            format!(
                "{}, {}, {}, {}",
                l.layer,
                l.datatype,
                Value::Number(l.z_min),
                Value::Number(l.z_max)
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    let context = Context::from_serialize(ExportContext {
        gds_filename: &gds_file.to_string_lossy(),
        top_cell,
        layer_def,
        options: *options,
    })?;
    Ok(TEMPLATES.render("gds_auto_export.lsf", &context)?)
}

/// Exports the session's layout to `gds_file`, running the export from the
/// file's directory.
pub fn export_gds<S: Session + ?Sized>(
    session: &mut S,
    gds_file: &Path,
    top_cell: &str,
    layers: &[LayerDef],
    options: &GdsExportOptions,
) -> Result<PathBuf> {
    if let Some(dir) = gds_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        session.eval(&format!("cd({});", Value::from(dir)))?;
    }
    session.eval(&export_gds_script(gds_file, top_cell, layers, options)?)?;
    session.flush()?;
    tracing::info!(path = %gds_file.display(), "exported layout");
    Ok(gds_file.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;

    #[test]
    fn script_lists_layers_and_options() -> anyhow::Result<()> {
        let script = export_gds_script(
            Path::new("y_branch.gds"),
            "model",
            &[LayerDef::centered(1, 0, 220e-9), LayerDef::centered(2, 0, 100e-9)],
            &GdsExportOptions::default(),
        )?;
        assert!(script.contains("gds_filename = 'y_branch.gds';"));
        assert!(script.contains("top_cell = 'model';"));
        assert!(script.contains("layer_def = [1, 0, -1.1e-7, 1.1e-7; 2, 0, -5e-8, 5e-8];"));
        assert!(script.contains("n_circle = 64;"));
        assert!(script.contains("max_objects = 10000;"));
        assert!(script.trim_end().ends_with("Lumerical_GDS_auto_export;"));
        Ok(())
    }

    #[test]
    fn export_runs_from_the_output_directory() -> anyhow::Result<()> {
        let mut session = RecordingSession::new();
        let options = GdsExportOptions {
            n_wg: 32,
            ..Default::default()
        };
        let path = export_gds(
            &mut session,
            Path::new("/tmp/layouts/y_branch.gds"),
            "model",
            &[LayerDef::centered(1, 0, 220e-9)],
            &options,
        )?;
        assert_eq!(path, Path::new("/tmp/layouts/y_branch.gds"));
        assert_eq!(session.commands[0], "cd(\"/tmp/layouts\");");
        assert!(session.ran("n_wg = 32;"));
        assert_eq!(session.flushes, 1);
        Ok(())
    }
}
