//! Building compact model libraries from CML compilations.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::command::CmlCommand;
use crate::compiler::{CmlCompiler, LUMFOUNDRY_TEMPLATE};
use crate::error::{Error, Result};
use crate::foundry::{self, ElementEntry, FoundryXml};

/// Source folder holding compact models created in INTERCONNECT.
pub const USER_CREATED: &str = "user_created";

/// Packages user-created compact models into a design kit.
///
/// `cml-compiler` cannot build a library that only holds user-created
/// models, so that case goes through INTERCONNECT instead.
pub trait DesignKitPackager {
    /// Loads the custom models found under `source`.
    fn load_custom(&mut self, source: &Path) -> Result<()>;
    /// Packages the loaded library `name` as `cml_dir/file_name`.
    fn package_design_kit(&mut self, name: &str, cml_dir: &Path, file_name: &str) -> Result<()>;
    /// Installs `cml_dir/file_name` into INTERCONNECT.
    fn install_design_kit(&mut self, file_name: &str, cml_dir: &Path) -> Result<()>;
}

/// New compact models to add to a library.
#[derive(Debug, Clone)]
pub enum CompactModels {
    /// Model folders mapped to their photonic model.
    Mapped(IndexMap<PathBuf, String>),
    /// Custom model files (`.ice`) to add to the user created models.
    Files(Vec<PathBuf>),
}

impl CompactModels {
    pub fn is_empty(&self) -> bool {
        match self {
            CompactModels::Mapped(m) => m.is_empty(),
            CompactModels::Files(f) => f.is_empty(),
        }
    }
}

/// The default library version, `v{YYYY_MM_DD}` for today.
pub fn default_version() -> String {
    chrono::Local::now().format("v%Y_%m_%d").to_string()
}

fn artifacts_dir(lib_dir: &Path) -> PathBuf {
    lib_dir.join("artifacts").join("interconnect")
}

fn versioned_file_name(name: &str, version: &str) -> String {
    format!("{name}_{version}.cml")
}

/// Recursively copies the contents of `src` into `dst`.
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

impl CmlCompiler {
    /// Compiles library `name`, returning the path of the versioned `.cml` file.
    ///
    /// If the compiler fails on a library without any foundry elements, the
    /// user created models are packaged with `packager` instead.
    pub fn generate_cml(
        &self,
        name: &str,
        version: Option<&str>,
        packager: &mut dyn DesignKitPackager,
    ) -> Result<PathBuf> {
        let version = version.map(str::to_string).unwrap_or_else(default_version);
        let lib_dir = self.library_dir(name);
        if !lib_dir.is_dir() {
            return Err(Error::NotACompilation(lib_dir));
        }
        let cml_dir = artifacts_dir(&lib_dir);
        let file_name = versioned_file_name(name, &version);

        match self.run_in(CmlCommand::All, &lib_dir) {
            Ok(()) => {
                let versioned = cml_dir.join(&file_name);
                fs::rename(cml_dir.join(format!("{name}.cml")), &versioned)?;
                tracing::info!(path = %versioned.display(), "generated CML");
                Ok(versioned)
            }
            Err(err @ Error::Compiler(_)) => {
                let elements = foundry::element_count(FoundryXml::path_in(&lib_dir, name))?;
                if elements > 0 {
                    return Err(err);
                }
                tracing::warn!(
                    "cml-compiler cannot build a library from only user created models; packaging with INTERCONNECT"
                );
                self.package_user_models(name, &lib_dir, &cml_dir, &file_name, packager)?;
                Ok(cml_dir.join(file_name))
            }
            Err(err) => Err(err),
        }
    }

    fn package_user_models(
        &self,
        name: &str,
        lib_dir: &Path,
        cml_dir: &Path,
        file_name: &str,
        packager: &mut dyn DesignKitPackager,
    ) -> Result<()> {
        let source = lib_dir.join("source");
        let user_created = source.join(USER_CREATED);
        let renamed = source.join(name);
        // Models are installed under the name of their folder.
        fs::rename(&user_created, &renamed)?;
        let packaged = (|| {
            packager.load_custom(&source)?;
            fs::create_dir_all(cml_dir)?;
            packager.package_design_kit(name, cml_dir, file_name)
        })();
        fs::rename(&renamed, &user_created)?;
        packaged?;
        tracing::info!(path = %cml_dir.join(file_name).display(), "generated CML");

        packager.install_design_kit(file_name, cml_dir)?;
        tracing::info!("installed CML in INTERCONNECT");
        Ok(())
    }

    /// Creates the compilation directory of library `name` from the
    /// lumfoundry template and writes an empty foundry XML.
    ///
    /// Does nothing if the library already exists.
    pub fn generate_cml_template(&self, name: &str) -> Result<PathBuf> {
        let lib_dir = self.library_dir(name);
        if lib_dir.is_dir() {
            tracing::info!(name, "template has already been generated");
            return Ok(lib_dir);
        }
        self.run(CmlCommand::Template)?;
        fs::rename(self.directory.join(LUMFOUNDRY_TEMPLATE), &lib_dir)?;

        let default_xml = lib_dir.join(format!("{LUMFOUNDRY_TEMPLATE}.xml"));
        if default_xml.exists() {
            fs::remove_file(default_xml)?;
        }
        FoundryXml::new(name).write_to(&lib_dir)?;
        Ok(lib_dir)
    }

    /// Adds compact models to library `name` and recompiles it.
    ///
    /// Creates the library from the template if needed. Returns the path of
    /// the versioned `.cml` file, or `None` if there were no models to add.
    pub fn update_cml_with_new_models(
        &self,
        name: &str,
        models: &CompactModels,
        version: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        if models.is_empty() {
            tracing::info!(name, "no compact models defined; not updating CML");
            return Ok(None);
        }
        let version = version.map(str::to_string).unwrap_or_else(default_version);
        let lib_dir = self.generate_cml_template(name)?;
        let source = lib_dir.join("source");

        match models {
            CompactModels::Mapped(mapping) => {
                let mut elements = Vec::with_capacity(mapping.len());
                for (folder, photonic_model) in mapping.iter() {
                    let model_name = folder
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| {
                            Error::Foundry(format!(
                                "compact model folder `{}` has no name",
                                folder.display()
                            ))
                        })?;
                    copy_dir(folder, &source.join(&model_name))?;
                    tracing::info!(library = name, model = model_name, "added compact model");
                    elements.push(ElementEntry::new(model_name, photonic_model));
                }
                FoundryXml::new(name)
                    .with_elements(elements)
                    .write_to(&lib_dir)?;
            }
            CompactModels::Files(files) => {
                let user_created = source.join(USER_CREATED);
                fs::create_dir_all(&user_created)?;
                for file in files.iter() {
                    let file_name = file.file_name().ok_or_else(|| {
                        Error::Foundry(format!("`{}` is not a file", file.display()))
                    })?;
                    fs::copy(file, user_created.join(file_name))?;
                }
            }
        }

        self.run_in(CmlCommand::All, &lib_dir)?;
        self.run(CmlCommand::Template)?;

        let cml_dir = artifacts_dir(&lib_dir);
        let versioned = cml_dir.join(versioned_file_name(name, &version));
        fs::copy(cml_dir.join(format!("{name}.cml")), &versioned)?;
        tracing::info!(path = %versioned.display(), "updated CML");
        Ok(Some(versioned))
    }
}
