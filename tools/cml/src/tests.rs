use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use config::FixedDecider;
use indexmap::IndexMap;

use crate::compiler::select_publisher_key;
use crate::error::{Error, Result};
use crate::{
    CmlCommand, CmlCompiler, CompactModels, DesignKitPackager, ElementEntry, FoundryXml, LotGroup,
};

pub const TEST_BUILD_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/build");

/// Sets up a compilations root with a shell script standing in for `cml-compiler`.
///
/// Every invocation is appended to `{root}/calls.log`. `all` fails if a
/// `FAIL` file exists in the compilation directory.
fn stand_in_compiler(name: &str) -> anyhow::Result<(CmlCompiler, PathBuf)> {
    let root = PathBuf::from(TEST_BUILD_PATH).join(name);
    if root.exists() {
        fs::remove_dir_all(&root)?;
    }
    let compilations = root.join("cml_compilations");
    fs::create_dir_all(&compilations)?;
    let log = root.join("calls.log");
    let exe = root.join("cml-compiler");
    fs::write(
        &exe,
        format!(
            r#"#!/bin/sh
here=$(basename "$(pwd -P)")
echo "$here $*" >> "{log}"
case "$1" in
  template)
    mkdir -p lumfoundry_template/source/user_created
    echo "<foundry_data/>" > lumfoundry_template/lumfoundry_template.xml
    ;;
  all)
    if [ -f FAIL ]; then
      echo "no elements" >&2
      exit 1
    fi
    mkdir -p artifacts/interconnect
    echo "library" > "artifacts/interconnect/$here.cml"
    ;;
esac
"#,
            log = log.display()
        ),
    )?;
    let mut perms = fs::metadata(&exe)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&exe, perms)?;
    Ok((CmlCompiler::new(exe, compilations), log))
}

fn calls(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[derive(Default)]
struct RecordingPackager {
    calls: Vec<String>,
    fail_packaging: bool,
}

impl DesignKitPackager for RecordingPackager {
    fn load_custom(&mut self, source: &Path) -> Result<()> {
        let mut dirs: Vec<_> = fs::read_dir(source)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        self.calls.push(format!("loadcustom {}", dirs.join(",")));
        Ok(())
    }

    fn package_design_kit(&mut self, name: &str, cml_dir: &Path, file_name: &str) -> Result<()> {
        if self.fail_packaging {
            return Err(Error::packager("license unavailable"));
        }
        fs::write(cml_dir.join(file_name), "packaged")?;
        self.calls.push(format!("packagedesignkit {name} {file_name}"));
        Ok(())
    }

    fn install_design_kit(&mut self, file_name: &str, _cml_dir: &Path) -> Result<()> {
        self.calls.push(format!("installdesignkit {file_name}"));
        Ok(())
    }
}

#[test]
fn command_verbs() {
    for cmd in CmlCommand::ALL {
        assert_eq!(CmlCommand::from_verb(cmd.verb()), Some(cmd));
        assert_eq!(cmd.to_string().parse::<CmlCommand>().ok(), Some(cmd));
    }
    assert_eq!(CmlCommand::from_verb("compile"), None);
    assert!("compile".parse::<CmlCommand>().is_err());
}

#[test]
fn unsupported_verb_runs_nothing() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("unsupported_verb")?;
    assert!(!compiler.run_verb("compile")?);
    assert!(calls(&log).is_empty());
    assert!(compiler.run_verb("support")?);
    assert_eq!(calls(&log), ["cml_compilations support"]);
    Ok(())
}

#[test]
fn publisher_key_is_passed() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("publisher_key")?;
    let compiler = compiler.with_publisher_key("ABC123");
    compiler.run(CmlCommand::Support)?;
    assert_eq!(calls(&log), ["cml_compilations support --publisher-key ABC123"]);
    Ok(())
}

#[test]
fn compiler_failure_reports_status() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("compiler_failure")?;
    let dir = compiler.directory.join("broken");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("FAIL"), "")?;
    let err = compiler.run_in(CmlCommand::All, &dir).unwrap_err();
    assert!(matches!(err, Error::Compiler(status) if !status.success()));
    Ok(())
}

#[test]
fn template_replaces_stale_lumfoundry_template() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("stale_template")?;
    let stale = compiler.directory.join("lumfoundry_template").join("stale.txt");
    fs::create_dir_all(stale.parent().unwrap())?;
    fs::write(&stale, "old")?;
    compiler.run(CmlCommand::Template)?;
    assert!(!stale.exists());
    assert!(compiler.directory.join("lumfoundry_template/source/user_created").is_dir());
    Ok(())
}

#[test]
fn generate_template() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("generate_template")?;
    let lib_dir = compiler.generate_cml_template("Cheam")?;
    assert_eq!(lib_dir, compiler.directory.join("Cheam"));
    assert!(!compiler.directory.join("lumfoundry_template").exists());
    assert!(!lib_dir.join("lumfoundry_template.xml").exists());
    assert!(lib_dir.join("source/user_created").is_dir());

    let xml = FoundryXml::read(lib_dir.join("Cheam.xml"))?;
    assert_eq!(xml.foundry_name, "Cheam");
    assert!(xml.elements.is_empty());

    // A second call leaves the existing library alone.
    compiler.generate_cml_template("Cheam")?;
    assert_eq!(calls(&log), ["cml_compilations template"]);
    Ok(())
}

#[test]
fn generate_cml_versions_output() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("generate_cml")?;
    compiler.generate_cml_template("Grouse")?;
    let mut packager = RecordingPackager::default();
    let cml = compiler.generate_cml("Grouse", Some("v2020_09_01"), &mut packager)?;

    assert_eq!(
        cml,
        compiler
            .directory
            .join("Grouse/artifacts/interconnect/Grouse_v2020_09_01.cml")
    );
    assert!(cml.exists());
    assert!(!cml.with_file_name("Grouse.cml").exists());
    assert!(packager.calls.is_empty());
    assert_eq!(calls(&log).last().map(String::as_str), Some("Grouse all"));
    Ok(())
}

#[test]
fn generate_cml_requires_compilation() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("missing_compilation")?;
    let mut packager = RecordingPackager::default();
    let err = compiler
        .generate_cml("Missing", None, &mut packager)
        .unwrap_err();
    assert!(matches!(err, Error::NotACompilation(path) if path.ends_with("Missing")));
    assert!(calls(&log).is_empty());
    Ok(())
}

#[test]
fn user_models_are_packaged() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("user_models")?;
    let lib_dir = compiler.generate_cml_template("Cheam")?;
    fs::write(lib_dir.join("FAIL"), "")?;

    let mut packager = RecordingPackager::default();
    let cml = compiler.generate_cml("Cheam", Some("v1"), &mut packager)?;

    assert_eq!(
        packager.calls,
        [
            "loadcustom Cheam",
            "packagedesignkit Cheam Cheam_v1.cml",
            "installdesignkit Cheam_v1.cml",
        ]
    );
    assert_eq!(fs::read_to_string(&cml)?, "packaged");
    assert!(lib_dir.join("source/user_created").is_dir());
    assert!(!lib_dir.join("source/Cheam").exists());
    Ok(())
}

#[test]
fn user_created_folder_is_restored_on_error() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("packaging_error")?;
    let lib_dir = compiler.generate_cml_template("Cheam")?;
    fs::write(lib_dir.join("FAIL"), "")?;

    let mut packager = RecordingPackager {
        fail_packaging: true,
        ..Default::default()
    };
    let err = compiler
        .generate_cml("Cheam", Some("v1"), &mut packager)
        .unwrap_err();
    assert!(matches!(err, Error::Packager(_)));
    assert!(lib_dir.join("source/user_created").is_dir());
    assert!(!lib_dir.join("source/Cheam").exists());
    Ok(())
}

#[test]
fn compiler_error_with_elements_propagates() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("elements_error")?;
    let lib_dir = compiler.generate_cml_template("Cheam")?;
    FoundryXml::new("Cheam")
        .with_elements(vec![ElementEntry::new("wg_strip", "wg_1D")])
        .write_to(&lib_dir)?;
    fs::write(lib_dir.join("FAIL"), "")?;

    let mut packager = RecordingPackager::default();
    let err = compiler
        .generate_cml("Cheam", Some("v1"), &mut packager)
        .unwrap_err();
    assert!(matches!(err, Error::Compiler(_)));
    assert!(packager.calls.is_empty());
    Ok(())
}

#[test]
fn update_with_mapped_models() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("update_mapped")?;
    let model = compiler.directory.parent().unwrap().join("models/wg_strip");
    fs::create_dir_all(model.join("data"))?;
    fs::write(model.join("wg_strip.lsf"), "neff = 2.4;")?;
    fs::write(model.join("data/neff.txt"), "2.4")?;

    let mut mapping = IndexMap::new();
    mapping.insert(model, "wg_1D".to_string());
    let cml = compiler
        .update_cml_with_new_models("Cheam", &CompactModels::Mapped(mapping), Some("v2"))?
        .expect("models were given");

    let lib_dir = compiler.directory.join("Cheam");
    assert!(lib_dir.join("source/wg_strip/wg_strip.lsf").exists());
    assert_eq!(
        fs::read_to_string(lib_dir.join("source/wg_strip/data/neff.txt"))?,
        "2.4"
    );
    let xml = FoundryXml::read(lib_dir.join("Cheam.xml"))?;
    assert_eq!(xml.elements, [ElementEntry::new("wg_strip", "wg_1D")]);

    assert!(cml.ends_with("Cheam_v2.cml"));
    assert!(cml.exists());
    assert!(cml.with_file_name("Cheam.cml").exists());
    assert_eq!(
        calls(&log),
        [
            "cml_compilations template",
            "Cheam all",
            "cml_compilations template",
        ]
    );
    Ok(())
}

#[test]
fn update_with_model_files() -> anyhow::Result<()> {
    let (compiler, _) = stand_in_compiler("update_files")?;
    let ice = compiler.directory.parent().unwrap().join("ring.ice");
    fs::write(&ice, "ice")?;
    compiler.update_cml_with_new_models("Cheam", &CompactModels::Files(vec![ice]), Some("v3"))?;
    assert!(
        compiler
            .directory
            .join("Cheam/source/user_created/ring.ice")
            .exists()
    );
    Ok(())
}

#[test]
fn update_without_models_does_nothing() -> anyhow::Result<()> {
    let (compiler, log) = stand_in_compiler("update_empty")?;
    let out =
        compiler.update_cml_with_new_models("Cheam", &CompactModels::Files(Vec::new()), None)?;
    assert!(out.is_none());
    assert!(calls(&log).is_empty());
    assert!(!compiler.directory.join("Cheam").exists());
    Ok(())
}

#[test]
fn foundry_xml_layout() {
    let mut xml = FoundryXml::new("Cheam");
    xml.version_suffix = "2021-01-01".to_string();
    xml.elements.push(ElementEntry::new("ybranch", "custom"));
    let out = xml.to_xml();
    let expected = r#"<?xml version="1.0" encoding="utf-8"?>
<foundry_data>
    <foundry_name>Cheam</foundry_name>
    <version_suffix>2021-01-01</version_suffix>
    <element_list>
        <element>
            <name>ybranch</name>
            <photonic_model>custom</photonic_model>
            <svg_filename>source/ybranch/ybranch.svg</svg_filename>
            <parameter_filename>source/ybranch/ybranch.lsf</parameter_filename>
            <datafile_directory>source/ybranch</datafile_directory>
        </element>
    </element_list>
    <statistical_data>
        <statistical_parameter_status>open</statistical_parameter_status>
        <nominal_value_type>mode</nominal_value_type>
    </statistical_data>
</foundry_data>
"#;
    assert_eq!(out, expected);
}

#[test]
fn pearson4_moments_are_written_only_for_pearson4() -> anyhow::Result<()> {
    let mut xml = FoundryXml::new("Cheam");
    xml.statistical_data.lotgroups = vec![
        LotGroup {
            name: "thickness".to_string(),
            distribution: "pearson4".to_string(),
            sigma: 0.5,
            gamma1: Some(0.1),
            beta2: Some(3.2),
        },
        LotGroup {
            name: "width".to_string(),
            distribution: "normal".to_string(),
            sigma: 1.0,
            gamma1: Some(0.3),
            beta2: Some(4.0),
        },
    ];
    xml.statistical_data.corners = vec!["FF".to_string(), "SS".to_string()];

    let root = pdkxml::parse(&xml.to_xml())?;
    let groups: Vec<_> = root
        .find("statistical_data")
        .and_then(|s| s.find("LOTGROUP_list"))
        .map(|l| l.find_all("LOTGROUP").collect())
        .unwrap_or_default();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].child_text("gamma1"), Some("0.1"));
    assert_eq!(groups[0].child_text("beta2"), Some("3.2"));
    assert!(groups[1].find("gamma1").is_none());
    assert!(groups[1].find("beta2").is_none());
    assert_eq!(root.count_descendants("corner"), 2);
    Ok(())
}

#[test]
fn publisher_key_selection() {
    let keys = vec!["public".to_string(), "protected".to_string()];
    assert_eq!(
        select_publisher_key(&keys, &mut FixedDecider::always()),
        Some("public".to_string())
    );
    assert_eq!(select_publisher_key(&keys, &mut FixedDecider::never()), None);
    assert_eq!(select_publisher_key(&[], &mut FixedDecider::always()), None);
}
