use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// `cml-compiler` exited unsuccessfully.
    #[error("cml-compiler exited with {0}")]
    Compiler(ExitStatus),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("xml error")]
    Xml(#[from] pdkxml::Error),
    #[error("`{0}` is not a CML compilation directory; generate a template first")]
    NotACompilation(PathBuf),
    #[error("invalid foundry XML: {0}")]
    Foundry(String),
    /// The design kit packaging fallback failed.
    #[error("design kit packaging failed")]
    Packager(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Wraps an error raised by a [`crate::DesignKitPackager`].
    pub fn packager(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Packager(err.into())
    }
}
