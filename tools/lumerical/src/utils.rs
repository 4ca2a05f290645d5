use std::fs;
use std::os::unix::prelude::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tera::Context;

use crate::TEMPLATES;
use crate::error::{Error, Result};

/// Renders the template `name` to `path`.
pub fn render_to(name: &str, context: &Context, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, TEMPLATES.render(name, context)?)?;
    Ok(())
}

/// Renders the template `name` into `work_dir` and makes it executable.
pub fn write_run_script(
    name: &str,
    context: &Context,
    work_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let path = work_dir.as_ref().join(name);
    render_to(name, context, &path)?;

    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Runs a shell script in `work_dir`, capturing its output to
/// `{output_prefix}.out` and `{output_prefix}.err`.
pub fn execute_run_script(
    path: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    output_prefix: &str,
) -> Result<()> {
    let path = path.as_ref();
    let work_dir = work_dir.as_ref();

    let out_file = fs::File::create(work_dir.join(format!("{output_prefix}.out")))?;
    let err_file = fs::File::create(work_dir.join(format!("{output_prefix}.err")))?;

    tracing::debug!(script = %path.display(), "running lumerical");
    let status = Command::new("bash")
        .arg(path)
        .current_dir(work_dir)
        .stdout(out_file)
        .stderr(err_file)
        .status()?;

    if !status.success() {
        return Err(Error::Solver(status));
    }

    Ok(())
}

/// Timestamp prefix for result files, such as `2021-06-26-1303-`.
pub fn timestamp_prefix() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H%M-").to_string()
}
