//! Geometry, simulation and optimization drivers for Lumerical products.
//!
//! Every driver talks to the solver through a [`Session`], which only knows
//! how to evaluate script code and read back values. [`BatchSession`] runs
//! accumulated script through a solver binary in batch mode.

use lazy_static::lazy_static;
use tera::Tera;

pub mod batch;
pub mod error;
pub mod export;
pub mod geometry;
pub mod packager;
pub mod session;
pub mod simulation;
pub mod spline;
pub mod testing;
pub mod utils;
pub mod ybranch;

pub use batch::BatchSession;
pub use error::{Error, Result};
pub use export::{GdsExportOptions, LayerDef, export_gds_script};
pub use geometry::{
    BBox, LayerSpec, WaveguideDesign, WaveguideGeometry, generate_lum_geometry, layout_bbox,
    sweep_values, write_straight_waveguide_gds,
};
pub use packager::InterconnectPackager;
pub use session::{Session, Value};
pub use simulation::{LossTable, NeffTable, WaveguideSimulation};
pub use ybranch::{AdjointProblem, FunctionDefinedPolygon, YBranchSpec, YSplitterShape};

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
