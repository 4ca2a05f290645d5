//! Utilities for loading pdkgen configuration files and locating external tools.
#![warn(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub mod decide;
pub mod env;
pub mod locator;
pub mod paths;
#[cfg(test)]
mod tests;

pub use decide::{ConsoleDecider, Decider, DrcPolicy, FixedDecider};
pub use locator::{Product, Tool, ToolLocator};

use env::Env;

/// Name of the configuration file searched for in the working directory and its ancestors.
pub const CONFIG_FILE_NAME: &str = "pdkgen.toml";

/// Explicit tool locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Path to the KLayout executable.
    pub klayout: Option<PathBuf>,
    /// Path to the Lumerical installation root.
    pub lumerical_root: Option<PathBuf>,
    /// Path to the `cml-compiler` executable.
    pub cml_compiler: Option<PathBuf>,
}

/// Tool search settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Directories searched before the platform defaults.
    pub roots: Vec<PathBuf>,
    /// How many levels below each root are searched.
    pub max_depth: Option<usize>,
}

/// DRC settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrcConfig {
    /// How DRC continuation decisions are made.
    pub policy: DrcPolicy,
}

/// Compact model library settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CmlConfig {
    /// Publisher key passed to `cml-compiler`.
    pub publisher_key: Option<String>,
}

/// pdkgen configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Explicit tool locations.
    pub tools: ToolsConfig,
    /// Tool search settings.
    pub search: SearchConfig,
    /// DRC settings.
    pub drc: DrcConfig,
    /// Compact model library settings.
    pub cml: CmlConfig,
    /// The file this configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// The user's home directory.
    #[serde(skip)]
    pub home: Option<PathBuf>,
}

impl Config {
    /// Loads configuration for the current process.
    pub fn load() -> Result<Self> {
        Self::load_with_env(&env::OS_ENV)
    }

    /// Loads configuration using the given environment.
    ///
    /// The nearest `pdkgen.toml` in the working directory or one of its
    /// ancestors is read, then `PDKGEN_*` environment variables are applied on top.
    pub fn load_with_env(env: &dyn Env) -> Result<Self> {
        let cwd = env
            .current_dir()
            .with_context(|| "couldn't get the current directory of the process")?;
        let mut config = match find_config_file(&cwd) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Reads a configuration file.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration at `{}`", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("could not parse `{}` as TOML", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_relative_to(dir);
        }
        config.source = Some(path.to_path_buf());
        tracing::debug!(path = ?path, "loaded configuration");
        Ok(config)
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        for p in [
            &mut self.tools.klayout,
            &mut self.tools.lumerical_root,
            &mut self.tools.cml_compiler,
        ]
        .into_iter()
        .flatten()
        {
            resolve(p);
        }
        self.search.roots.iter_mut().for_each(resolve);
    }

    fn apply_env(&mut self, env: &dyn Env) -> Result<()> {
        let var = |key: &str| env.var_os(key).filter(|v| !v.is_empty());
        if let Some(v) = var("PDKGEN_KLAYOUT") {
            self.tools.klayout = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PDKGEN_LUMERICAL_ROOT") {
            self.tools.lumerical_root = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PDKGEN_CML_COMPILER") {
            self.tools.cml_compiler = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PDKGEN_DRC_POLICY") {
            self.drc.policy = v
                .to_string_lossy()
                .parse()
                .with_context(|| "invalid value for PDKGEN_DRC_POLICY")?;
        }
        if let Some(v) = var("PDKGEN_PUBLISHER_KEY") {
            self.cml.publisher_key = Some(v.to_string_lossy().into_owned());
        }
        if let Some(home) = env.home_dir() {
            self.home = Some(home);
        }
        Ok(())
    }

    /// Builds a [`ToolLocator`] honoring the configured overrides and search roots.
    pub fn locator(&self) -> ToolLocator {
        let mut locator = ToolLocator::platform_default();
        locator.prepend_roots(self.search.roots.iter().cloned());
        if let Some(depth) = self.search.max_depth {
            locator = locator.with_max_depth(depth);
        }
        if let Some(home) = &self.home {
            locator = locator.with_home(home);
        }
        if let Some(p) = &self.tools.klayout {
            locator = locator.with_override(Tool::KLayout, p);
        }
        if let Some(p) = &self.tools.lumerical_root {
            locator = locator.with_override(Tool::LumericalRoot, p);
        }
        if let Some(p) = &self.tools.cml_compiler {
            locator = locator.with_override(Tool::CmlCompiler, p);
        }
        locator
    }

    /// Builds the decider for DRC continuation prompts.
    pub fn decider(&self) -> Box<dyn Decider> {
        self.drc.policy.decider()
    }
}

/// Returns the nearest `pdkgen.toml` in `cwd` or one of its ancestors.
pub fn find_config_file(cwd: &Path) -> Option<PathBuf> {
    paths::ancestors(cwd, None)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|p| p.is_file())
}
