//! Design kit packaging through an INTERCONNECT session.

use std::path::Path;

use cml::DesignKitPackager;

use crate::error::Result;
use crate::session::{Session, Value};

/// Packages and installs compact model libraries with INTERCONNECT's design
/// kit commands.
pub struct InterconnectPackager<S> {
    pub session: S,
}

impl<S: Session> InterconnectPackager<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Keys registered for encrypting design kits.
    pub fn publisher_keys(&mut self) -> Result<String> {
        self.session.get_text("getdesignkitkey()")
    }

    fn load(&mut self, source: &Path) -> Result<()> {
        self.session
            .eval(&format!("loadcustom({});", Value::from(source)))
    }

    fn package(&mut self, name: &str, cml_dir: &Path, file_name: &str) -> Result<()> {
        self.session.eval(&format!(
            "cd({}); packagedesignkit({}, {}, false, true);",
            Value::from(cml_dir),
            Value::from(name),
            Value::from(file_name)
        ))?;
        self.session.flush()?;
        tracing::info!(name, path = %cml_dir.join(file_name).display(), "packaged design kit");
        Ok(())
    }

    fn install(&mut self, file_name: &str, cml_dir: &Path) -> Result<()> {
        self.session.eval(&format!(
            "installdesignkit({}, {}, true);",
            Value::from(file_name),
            Value::from(cml_dir)
        ))?;
        self.session.flush()
    }
}

impl<S: Session> DesignKitPackager for InterconnectPackager<S> {
    fn load_custom(&mut self, source: &Path) -> cml::Result<()> {
        self.load(source).map_err(cml::Error::packager)
    }

    fn package_design_kit(
        &mut self,
        name: &str,
        cml_dir: &Path,
        file_name: &str,
    ) -> cml::Result<()> {
        self.package(name, cml_dir, file_name)
            .map_err(cml::Error::packager)
    }

    fn install_design_kit(&mut self, file_name: &str, cml_dir: &Path) -> cml::Result<()> {
        self.install(file_name, cml_dir)
            .map_err(cml::Error::packager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;

    #[test]
    fn packages_then_installs() -> anyhow::Result<()> {
        let mut packager = InterconnectPackager::new(RecordingSession::new());
        let cml_dir = Path::new("/pdk/EBeam/artifacts/interconnect");
        packager.load_custom(Path::new("/pdk/EBeam/source/custom"))?;
        packager.package_design_kit("EBeam", cml_dir, "EBeam_v2024_01_01.cml")?;
        packager.install_design_kit("EBeam_v2024_01_01.cml", cml_dir)?;

        let commands = &packager.session.commands;
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], "loadcustom(\"/pdk/EBeam/source/custom\");");
        assert_eq!(
            commands[1],
            "cd(\"/pdk/EBeam/artifacts/interconnect\"); packagedesignkit(\"EBeam\", \"EBeam_v2024_01_01.cml\", false, true);"
        );
        assert_eq!(
            commands[2],
            "installdesignkit(\"EBeam_v2024_01_01.cml\", \"/pdk/EBeam/artifacts/interconnect\", true);"
        );
        assert_eq!(packager.session.flushes, 2);
        Ok(())
    }

    #[test]
    fn session_errors_become_packager_errors() {
        let mut packager = InterconnectPackager::new(RecordingSession::new());
        let err = packager.publisher_keys().unwrap_err();
        assert!(matches!(err, crate::Error::Result { .. }));

        struct Broken;
        impl Session for Broken {
            fn eval(&mut self, _code: &str) -> Result<()> {
                Err(crate::Error::Design("closed".into()))
            }
            fn get(&mut self, expr: &str) -> Result<Value> {
                Err(crate::Error::result(expr, "closed"))
            }
        }
        let mut packager = InterconnectPackager::new(Broken);
        let err = packager.load_custom(Path::new("custom")).unwrap_err();
        assert!(matches!(err, cml::Error::Packager(_)));
    }
}
