//! Discovery of locally installed EDA applications.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::paths::{file_name_is, find_path, path_contains};

/// Default depth to which search roots are walked.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// A Lumerical product with its own executable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Product {
    /// FDTD Solutions.
    Fdtd,
    /// MODE Solutions.
    Mode,
    /// INTERCONNECT.
    Interconnect,
}

impl Product {
    /// The executable name inside the installation's `bin` directory.
    pub fn binary(&self) -> &'static str {
        match self {
            Product::Fdtd => "fdtd-solutions",
            Product::Mode => "mode-solutions",
            Product::Interconnect => "interconnect",
        }
    }
}

/// An external tool the pipeline may need.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tool {
    /// The KLayout application binary.
    KLayout,
    /// The KLayout user configuration directory (holds technologies and rule decks).
    KLayoutConfigDir,
    /// The Lumerical installation root (the directory containing `bin/` and `api/`).
    LumericalRoot,
    /// The Lumerical Python API module, `lumapi.py`.
    LumericalApi,
    /// The `cml-compiler` executable.
    CmlCompiler,
    /// A Lumerical product executable.
    Lumerical(Product),
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::KLayout => write!(f, "KLayout"),
            Tool::KLayoutConfigDir => write!(f, "KLayout configuration directory"),
            Tool::LumericalRoot => write!(f, "Lumerical installation"),
            Tool::LumericalApi => write!(f, "lumapi"),
            Tool::CmlCompiler => write!(f, "cml-compiler"),
            Tool::Lumerical(p) => write!(f, "{}", p.binary()),
        }
    }
}

/// Locates external tools on the local filesystem.
///
/// Lookups are cached; the filesystem is walked at most once per tool.
/// Explicit overrides take precedence and are returned without checking
/// that they exist.
#[derive(Debug)]
pub struct ToolLocator {
    roots: Vec<PathBuf>,
    home: Option<PathBuf>,
    max_depth: usize,
    overrides: HashMap<Tool, PathBuf>,
    cache: Mutex<HashMap<Tool, PathBuf>>,
}

impl ToolLocator {
    /// Creates a locator that searches the given roots, in order.
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            home: None,
            max_depth: DEFAULT_MAX_DEPTH,
            overrides: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a locator with the installation roots conventional for the host platform.
    pub fn platform_default() -> Self {
        Self::new(platform_roots())
    }

    /// Sets the user's home directory, searched for per-user configuration.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Sets how many directory levels below each root are searched.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Pins the location of `tool`.
    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool, path.into());
        self
    }

    /// Adds search roots that are consulted before the existing ones.
    pub fn prepend_roots(&mut self, roots: impl IntoIterator<Item = impl Into<PathBuf>>) {
        let mut roots = roots.into_iter().map(Into::into).collect::<Vec<_>>();
        roots.append(&mut self.roots);
        self.roots = roots;
    }

    /// The roots searched, in order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns the location of `tool`, searching the filesystem on first use.
    pub fn locate(&self, tool: Tool) -> Result<PathBuf> {
        if let Some(path) = self.overrides.get(&tool) {
            return Ok(path.clone());
        }
        if let Some(path) = self.cached(tool) {
            return Ok(path);
        }

        let found = match tool {
            Tool::KLayout => self.search(is_klayout_binary).map(resolve_app_bundle),
            Tool::KLayoutConfigDir => self.klayout_config_dir(),
            Tool::LumericalApi => self.search(|p| {
                file_name_is(p, "lumapi.py") && path_contains(p, "lumerical")
            }),
            Tool::LumericalRoot => self.lumerical_root()?,
            Tool::CmlCompiler => self.search(|p| {
                (file_name_is(p, "cml-compiler") || file_name_is(p, "cml-compiler.exe"))
                    && p.is_file()
            }),
            Tool::Lumerical(product) => {
                let root = self.locate(Tool::LumericalRoot)?;
                let bin = root.join("bin");
                [product.binary().to_string(), format!("{}.exe", product.binary())]
                    .into_iter()
                    .map(|name| bin.join(name))
                    .find(|p| p.is_file())
            }
        };

        let path = found.ok_or_else(|| {
            anyhow!(
                "could not find {tool} under any of the search roots {:?}",
                self.roots
            )
        })?;
        tracing::debug!(%tool, path = ?path, "located tool");
        self.cache_insert(tool, path.clone());
        Ok(path)
    }

    fn cached(&self, tool: Tool) -> Option<PathBuf> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&tool).cloned()
    }

    fn cache_insert(&self, tool: Tool, path: PathBuf) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(tool, path);
    }

    fn search(&self, mut predicate: impl FnMut(&Path) -> bool) -> Option<PathBuf> {
        self.roots
            .iter()
            .find_map(|root| find_path(root, self.max_depth, &mut predicate))
    }

    fn klayout_config_dir(&self) -> Option<PathBuf> {
        let has_rc = |p: &Path| p.is_dir() && p.join("klayoutrc").is_file();
        if let Some(home) = &self.home {
            for name in ["KLayout", ".klayout"] {
                let candidate = home.join(name);
                if has_rc(&candidate) {
                    return Some(candidate);
                }
            }
            // The directory exists before KLayout writes its rc file.
            let dot = home.join(".klayout");
            if dot.is_dir() {
                return Some(dot);
            }
        }
        self.search(|p| file_name_is(p, "KLayout") && has_rc(p))
    }

    fn lumerical_root(&self) -> Result<Option<PathBuf>> {
        let api = match self.locate(Tool::LumericalApi) {
            Ok(api) => api,
            Err(_) => return Ok(None),
        };
        Ok(api
            .ancestors()
            .skip(1)
            .find(|dir| dir.join("bin").is_dir())
            .map(Path::to_path_buf))
    }
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::platform_default()
    }
}

fn is_klayout_binary(path: &Path) -> bool {
    if file_name_is(path, "klayout.app") {
        return path.is_dir();
    }
    ["klayout_app.exe", "klayout_app", "klayout"]
        .iter()
        .any(|name| file_name_is(path, name))
        && path.is_file()
}

fn resolve_app_bundle(path: PathBuf) -> PathBuf {
    if file_name_is(&path, "klayout.app") {
        path.join("Contents").join("MacOS").join("klayout")
    } else {
        path
    }
}

/// Installation roots conventional for the host platform.
pub fn platform_roots() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        vec![PathBuf::from(r"C:\Program Files"), PathBuf::from(r"C:\")]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications")]
    } else {
        vec![
            PathBuf::from("/opt"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/usr/bin"),
        ]
    }
}
