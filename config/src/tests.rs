use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::env::MapEnv;
use crate::{Config, DrcPolicy, Tool};

fn env_at(cwd: PathBuf, vars: &[(&str, &str)]) -> MapEnv {
    MapEnv {
        home: None,
        cwd,
        vars: HashMap::from_iter(vars.iter().map(|(a, b)| (a.to_string(), b.to_string()))),
    }
}

#[test]
fn test_config_from_ancestor_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let project = dir.path().join("project");
    let nested = project.join("designs").join("ybranch");
    fs::create_dir_all(&nested)?;
    fs::write(
        project.join("pdkgen.toml"),
        r#"
[tools]
klayout = "bin/klayout"

[search]
roots = ["tools", "/opt/eda"]

[drc]
policy = "continue"

[cml]
publisher_key = "abc123"
"#,
    )?;

    let cfg = Config::load_with_env(&env_at(nested, &[]))?;
    assert_eq!(cfg.source, Some(project.join("pdkgen.toml")));
    assert_eq!(cfg.tools.klayout, Some(project.join("bin/klayout")));
    assert_eq!(
        cfg.search.roots,
        vec![project.join("tools"), PathBuf::from("/opt/eda")]
    );
    assert_eq!(cfg.drc.policy, DrcPolicy::Continue);
    assert_eq!(cfg.cml.publisher_key.as_deref(), Some("abc123"));

    let locator = cfg.locator();
    assert_eq!(locator.locate(Tool::KLayout)?, project.join("bin/klayout"));
    assert_eq!(locator.roots()[0], project.join("tools"));
    Ok(())
}

#[test]
fn test_environment_overrides_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("pdkgen.toml"),
        "[drc]\npolicy = \"continue\"\n",
    )?;

    let cfg = Config::load_with_env(&env_at(
        dir.path().to_path_buf(),
        &[
            ("PDKGEN_DRC_POLICY", "abort"),
            ("PDKGEN_CML_COMPILER", "/usr/local/bin/cml-compiler"),
        ],
    ))?;
    assert_eq!(cfg.drc.policy, DrcPolicy::Abort);
    assert_eq!(
        cfg.tools.cml_compiler,
        Some(PathBuf::from("/usr/local/bin/cml-compiler"))
    );
    Ok(())
}

#[test]
fn test_missing_file_gives_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = Config::load_with_env(&env_at(dir.path().to_path_buf(), &[]))?;
    assert_eq!(cfg, Config::default());
    Ok(())
}

#[test]
fn test_unknown_keys_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pdkgen.toml");
    fs::write(&path, "[tools]\nklayot = \"/bin/klayout\"\n")?;
    assert!(Config::from_file(&path).is_err());
    Ok(())
}

#[test]
fn test_invalid_policy_in_environment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let result = Config::load_with_env(&env_at(
        dir.path().to_path_buf(),
        &[("PDKGEN_DRC_POLICY", "sometimes")],
    ));
    assert!(result.is_err());
    Ok(())
}
