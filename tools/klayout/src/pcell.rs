//! Layout generation from library PCells.

use std::fs;
use std::path::{Path, PathBuf};

use config::{Tool, ToolLocator};
use serde::Serialize;
use serde_json::{Map, Value};
use tera::Context;

use crate::TEMPLATES;
use crate::error::{Error, Result};
use crate::utils::{execute_run_script, write_run_script};

/// Name of the KLayout macro that instantiates a PCell and writes it to GDS.
pub const CREATE_GDS_SCRIPT: &str = "create_gds_klayout.py";

/// Parameters for instantiating a PCell.
#[derive(Clone, Debug)]
pub struct PcellParams<'a> {
    pub tech_name: &'a str,
    pub lib_name: &'a str,
    pub pcell_name: &'a str,
    /// PCell parameters, passed to KLayout as a JSON object.
    pub params: &'a Map<String, Value>,
    /// Where the layout is written.
    pub gds_path: &'a Path,
    /// Where the macro, run script, and KLayout's output are written.
    pub work_dir: &'a Path,
}

#[derive(Serialize)]
struct PcellContext<'a> {
    klayout: &'a Path,
    script_path: &'a Path,
    tech_name: &'a str,
    lib_name: &'a str,
    pcell_name: &'a str,
    gds_path: &'a Path,
    params: String,
}

/// Writes a GDS file containing one instance of a library PCell.
///
/// Returns the path of the written layout.
pub fn generate_gds_from_pcell(params: &PcellParams, locator: &ToolLocator) -> Result<PathBuf> {
    let klayout = locator.locate(Tool::KLayout)?;
    fs::create_dir_all(params.work_dir)?;
    if let Some(parent) = params.gds_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let script_path = params.work_dir.join(CREATE_GDS_SCRIPT);
    fs::write(
        &script_path,
        TEMPLATES.render(CREATE_GDS_SCRIPT, &Context::new())?,
    )?;

    let context = Context::from_serialize(PcellContext {
        klayout: &klayout,
        script_path: &script_path,
        tech_name: params.tech_name,
        lib_name: params.lib_name,
        pcell_name: params.pcell_name,
        gds_path: params.gds_path,
        params: serde_json::to_string(params.params)?,
    })?;
    let run_script_path = write_run_script("create_gds_klayout.sh", &context, params.work_dir)?;
    tracing::info!(
        pcell = params.pcell_name,
        library = params.lib_name,
        gds = %params.gds_path.display(),
        "generating layout from PCell"
    );
    execute_run_script(&run_script_path, params.work_dir, "create_gds")?;

    if !params.gds_path.exists() {
        return Err(Error::MissingOutput(params.gds_path.to_path_buf()));
    }
    Ok(params.gds_path.to_path_buf())
}
