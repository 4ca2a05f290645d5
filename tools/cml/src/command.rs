use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `cml-compiler` verb.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmlCommand {
    /// Creates a `lumfoundry_template` compilation in the working directory.
    Template,
    Library,
    Install,
    Test,
    /// Runs `library`, `install` and `test`.
    All,
    RunTests,
    Support,
}

impl CmlCommand {
    pub const ALL: [CmlCommand; 7] = [
        CmlCommand::Template,
        CmlCommand::Library,
        CmlCommand::Install,
        CmlCommand::Test,
        CmlCommand::All,
        CmlCommand::RunTests,
        CmlCommand::Support,
    ];

    /// The verb as passed on the command line.
    pub fn verb(&self) -> &'static str {
        match self {
            CmlCommand::Template => "template",
            CmlCommand::Library => "library",
            CmlCommand::Install => "install",
            CmlCommand::Test => "test",
            CmlCommand::All => "all",
            CmlCommand::RunTests => "runtests",
            CmlCommand::Support => "support",
        }
    }

    /// Returns `None` for verbs `cml-compiler` does not support.
    pub fn from_verb(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.verb() == verb.trim())
    }
}

impl fmt::Display for CmlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb())
    }
}

impl FromStr for CmlCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_verb(s).ok_or_else(|| anyhow::anyhow!("unsupported cml-compiler command `{s}`"))
    }
}
