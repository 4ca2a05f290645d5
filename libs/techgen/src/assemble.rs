//! Writes a complete KLayout technology folder.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lbr::{LayerMapping, LayerStack};
use crate::lydrc::{DrcDeck, MacroConfig};
use crate::lyt::Technology;
use crate::process::Process;
use crate::rules::DrcRules;
use crate::xsection::XSection;

pub struct AssembleParams<'a> {
    pub process: &'a Process,
    /// The technology folder is created inside this directory.
    pub out_dir: &'a Path,
    /// Overrides the technology name given in the process.
    pub tech_name: Option<&'a str>,
    /// Layer roles for the Lumerical process file; inferred when absent.
    pub mapping: Option<LayerMapping>,
}

/// Paths of the generated technology files.
#[derive(Debug, Clone, Default)]
pub struct TechFiles {
    pub tech_dir: PathBuf,
    pub lyt: PathBuf,
    pub lyp: PathBuf,
    pub lydrc: PathBuf,
    pub drc_yaml: PathBuf,
    pub xs: Option<PathBuf>,
    pub keybinding: Option<PathBuf>,
    pub lbr: Option<PathBuf>,
}

impl TechFiles {
    /// Every written file, in generation order.
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths = vec![
            self.lyt.as_path(),
            self.lyp.as_path(),
            self.lydrc.as_path(),
            self.drc_yaml.as_path(),
        ];
        paths.extend(
            [&self.xs, &self.keybinding, &self.lbr]
                .into_iter()
                .flatten()
                .map(PathBuf::as_path),
        );
        paths
    }
}

fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    tracing::info!(path = %path.display(), "wrote technology file");
    Ok(())
}

/// Generates every technology file for a process.
///
/// Existing files are overwritten.
pub fn assemble(params: AssembleParams<'_>) -> Result<TechFiles> {
    let process = params.process;
    let tech_name = params.tech_name.unwrap_or(process.tech_name());
    if tech_name.is_empty() {
        return Err(Error::Config("technology has no name".to_string()));
    }
    let tech_dir = params.out_dir.join(tech_name);
    fs::create_dir_all(&tech_dir)?;
    let base_path = tech_dir.to_string_lossy();

    let mut files = TechFiles {
        lyt: tech_dir.join(format!("{tech_name}.lyt")),
        lyp: tech_dir.join(format!("{tech_name}.lyp")),
        lydrc: tech_dir.join("drc").join(format!("{tech_name}_DRC.lydrc")),
        drc_yaml: tech_dir.join(format!("{tech_name}_DRC.yaml")),
        ..Default::default()
    };

    let mut tech = Technology::with_params(&process.technology);
    tech.configure_for(tech_name, &base_path);
    write(&files.lyt, tech.to_xml())?;

    write(&files.lyp, crate::lyp::lyp_file(process))?;

    let mut deck = DrcDeck::from_process(process)?;
    deck.tech_name = tech_name.to_string();
    write(&files.lydrc, deck.to_macro().to_xml())?;
    write(&files.drc_yaml, DrcRules::from_process(process)?.to_yaml()?)?;

    let xsection = XSection::from_process(process)?;
    if !xsection.steps.is_empty() {
        let xs_name = format!("{tech_name}_XSection.xs");
        let xs = tech_dir.join(&xs_name);
        write(&xs, xsection.script())?;
        let keybinding = tech_dir
            .join("pymacros")
            .join(format!("{tech_name}_XSection_KEYBIND.lym"));
        write(
            &keybinding,
            MacroConfig::xsection_keybinding(tech_name, &xs_name).to_xml(),
        )?;
        files.xs = Some(xs);
        files.keybinding = Some(keybinding);
    }

    let mapping = params.mapping.or_else(|| LayerMapping::infer(process));
    match mapping {
        Some(mapping) => {
            let mut stack = LayerStack::from_process(process, mapping)?;
            stack.process_name = tech_name.to_string();
            let lbr = tech_dir.join(format!("{tech_name}.lbr"));
            write(&lbr, stack.to_xml()?)?;
            files.lbr = Some(lbr);
        }
        None => tracing::debug!("no Lumerical layers; skipping process file"),
    }

    files.tech_dir = tech_dir;
    Ok(files)
}
