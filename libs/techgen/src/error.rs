//! Technology generation errors.

use thiserror::Error as ThisError;

/// The result type returned by technology generators.
pub type Result<T> = std::result::Result<T, Error>;

/// Possible technology generation errors.
#[derive(ThisError, Debug)]
pub enum Error {
    /// I/O error.
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// The process or DRC YAML could not be parsed.
    #[error("yaml error")]
    Yaml(#[from] serde_yaml::Error),
    /// An XML input could not be parsed or written.
    #[error("xml error")]
    Xml(#[from] pdkxml::Error),
    /// A layer source string is not of the form `layer/datatype[@index]`.
    #[error("invalid layer source `{0}`; expected `layer/datatype[@index]`")]
    InvalidSource(String),
    /// A DRC rule lookup failed.
    #[error("{0}")]
    Rule(String),
    /// The process description is inconsistent.
    #[error("invalid process description: {0}")]
    Config(String),
}
