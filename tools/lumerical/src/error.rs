use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A Lumerical batch run exited unsuccessfully.
    #[error("lumerical exited with {0}")]
    Solver(ExitStatus),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("error rendering templates")]
    Tera(#[from] tera::Error),
    #[error("yaml error")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
    /// Layout reading or writing failed. Holds the message of the
    /// `gds21` error, which is neither `Send` nor `Sync`.
    #[error("gds error: {0}")]
    Gds(String),
    #[error("xml error")]
    Xml(#[from] pdkxml::Error),
    #[error("technology error")]
    Techgen(#[from] techgen::Error),
    #[error("klayout error")]
    KLayout(#[from] klayout::Error),
    #[error("optimization error")]
    Optim(#[from] optim::Error),
    /// A query returned nothing, or a value of the wrong shape.
    #[error("unexpected result for `{expr}`: {reason}")]
    Result { expr: String, reason: String },
    /// The solver reported a simulation that did not run to completion.
    #[error("simulation did not complete (status {status})")]
    Simulation { status: f64 },
    /// An expected output file was not written.
    #[error("missing output file: {0}")]
    MissingOutput(PathBuf),
    #[error("invalid design: {0}")]
    Design(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<gds21::GdsError> for Error {
    fn from(err: gds21::GdsError) -> Self {
        Self::Gds(err.to_string())
    }
}

impl Error {
    pub(crate) fn result(expr: &str, reason: impl Into<String>) -> Self {
        Self::Result {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}
