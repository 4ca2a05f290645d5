//! Lower-level utilities for mocking the process environment.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

/// Permits parameterizing configuration loading over the process environment.
pub trait Env {
    /// Return the path to the user's home dir, or `None` if it cannot be determined.
    fn home_dir(&self) -> Option<PathBuf>;
    /// Return the current working directory.
    fn current_dir(&self) -> io::Result<PathBuf>;
    /// Get an environment variable, as per [`std::env::var_os`].
    fn var_os(&self, key: &str) -> Option<OsString>;
}

/// Implements [`Env`] for the OS context.
pub struct OsEnv;

impl Env for OsEnv {
    fn home_dir(&self) -> Option<PathBuf> {
        #[cfg(windows)]
        let var = "USERPROFILE";
        #[cfg(not(windows))]
        let var = "HOME";
        std::env::var_os(var)
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }
    fn current_dir(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }
    fn var_os(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

/// The current OS context.
pub const OS_ENV: OsEnv = OsEnv;

/// An in-memory environment for tests.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    /// Home directory.
    pub home: Option<PathBuf>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Environment variables.
    pub vars: HashMap<String, String>,
}

impl Env for MapEnv {
    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }
    fn current_dir(&self) -> io::Result<PathBuf> {
        Ok(self.cwd.clone())
    }
    fn var_os(&self, key: &str) -> Option<OsString> {
        self.vars.get(key).map(OsString::from)
    }
}
