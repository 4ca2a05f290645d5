use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// KLayout exited unsuccessfully.
    #[error("klayout exited with {0}")]
    KLayout(ExitStatus),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("template error")]
    Tera(#[from] tera::Error),
    #[error("xml error")]
    Xml(#[from] pdkxml::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
    /// KLayout finished without writing an expected file.
    #[error("klayout did not write `{0}`")]
    MissingOutput(PathBuf),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
