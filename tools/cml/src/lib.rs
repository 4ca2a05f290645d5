//! Compact model library (CML) compilation with Lumerical's `cml-compiler`.
//!
//! A CML compilation is a directory created from the compiler's
//! `lumfoundry_template`, holding model sources under `source/` and a foundry
//! XML file describing the library. Compiling it produces a `.cml` file under
//! `artifacts/interconnect/`.

pub mod command;
pub mod compiler;
pub mod error;
pub mod foundry;
pub mod library;

pub use command::CmlCommand;
pub use compiler::CmlCompiler;
pub use error::{Error, Result};
pub use foundry::{ElementEntry, FoundryXml, LotGroup, StatisticalData, SubElement};
pub use library::{CompactModels, DesignKitPackager, default_version};

#[cfg(test)]
mod tests;
