//! KLayout batch DRC and PCell layout generation.

use lazy_static::lazy_static;
use tera::Tera;

pub mod drc;
pub mod error;
pub mod pcell;
pub mod utils;

pub use drc::{
    DrcData, DrcOutcome, DrcParams, DrcRunner, RuleCheck, SkipReason, get_total_drc_errors,
    parse_drc_results, run_drc,
};
pub use error::{Error, Result};
pub use pcell::{PcellParams, generate_gds_from_pcell};

pub const TEMPLATES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        match Tera::new(&format!("{TEMPLATES_PATH}/*")) {
            Ok(t) => t,
            Err(e) => {
                panic!("Encountered errors while parsing Tera templates: {e}");
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    pub const TEST_BUILD_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/build");

    /// Writes an executable shell script standing in for the KLayout binary.
    pub fn write_stand_in(path: &Path, body: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("#!/bin/sh\n{body}"))?;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
        Ok(())
    }
}
