//! Invocation of Lumerical's `cml-compiler`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use config::{Decider, Tool, ToolLocator};

use crate::command::CmlCommand;
use crate::error::{Error, Result};

/// Name of the directory `cml-compiler template` creates.
pub const LUMFOUNDRY_TEMPLATE: &str = "lumfoundry_template";

/// Runs `cml-compiler` over a directory of CML compilations.
#[derive(Debug, Clone)]
pub struct CmlCompiler {
    /// Path to the `cml-compiler` executable.
    pub executable: PathBuf,
    /// The compilations root. Each library lives in a subdirectory named after it.
    pub directory: PathBuf,
    /// Determines the access rights of generated libraries.
    pub publisher_key: Option<String>,
}

impl CmlCompiler {
    pub fn new(executable: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            directory: directory.into(),
            publisher_key: None,
        }
    }

    /// Locates `cml-compiler` through `locator`.
    pub fn from_locator(locator: &ToolLocator, directory: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(locator.locate(Tool::CmlCompiler)?, directory))
    }

    pub fn with_publisher_key(mut self, key: impl Into<String>) -> Self {
        self.publisher_key = Some(key.into());
        self
    }

    /// The compilation directory of library `name`.
    pub fn library_dir(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// Creates the compilations root and populates it with the lumfoundry template.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        if !self.directory.join(LUMFOUNDRY_TEMPLATE).is_dir() {
            self.run(CmlCommand::Template)?;
        }
        tracing::info!(directory = %self.directory.display(), "CML compilations directory ready");
        Ok(())
    }

    /// Runs `cmd` in the compilations root.
    pub fn run(&self, cmd: CmlCommand) -> Result<()> {
        self.run_in(cmd, &self.directory)
    }

    /// Runs a command given by name in the compilations root.
    ///
    /// Returns `false` without running anything if `verb` is not a
    /// `cml-compiler` command.
    pub fn run_verb(&self, verb: &str) -> Result<bool> {
        match CmlCommand::from_verb(verb) {
            Some(cmd) => {
                self.run(cmd)?;
                Ok(true)
            }
            None => {
                tracing::warn!(verb, "Unsupported command... Exiting...");
                Ok(false)
            }
        }
    }

    /// Runs `cmd` with `dir` as the working directory.
    pub fn run_in(&self, cmd: CmlCommand, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if cmd == CmlCommand::Template {
            // The compiler refuses to overwrite an existing template.
            let template = dir.join(LUMFOUNDRY_TEMPLATE);
            if template.is_dir() {
                fs::remove_dir_all(&template)?;
            }
        }

        let mut command = Command::new(&self.executable);
        command.arg(cmd.verb()).current_dir(dir);
        if let Some(key) = &self.publisher_key {
            command.arg("--publisher-key").arg(key);
        }
        tracing::info!(directory = %dir.display(), command = %cmd, "running cml-compiler");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::debug!(command = %cmd, "{}", stdout.trim_end());
        }
        if !output.status.success() {
            tracing::error!(
                command = %cmd,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "cml-compiler failed"
            );
            return Err(Error::Compiler(output.status));
        }
        Ok(())
    }
}

/// Asks which of the publisher keys reported by INTERCONNECT to use.
///
/// Returns `None` if there are no keys or no choice is made.
pub fn select_publisher_key(keys: &[String], decider: &mut dyn Decider) -> Option<String> {
    if keys.is_empty() {
        tracing::info!("no publisher key found");
        return None;
    }
    let choice = decider.choose(
        "Check your Lumerical licensing for the appropriate publisher key to use (Public vs. Protected)",
        keys,
    )?;
    keys.get(choice).cloned()
}
