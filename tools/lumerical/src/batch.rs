//! A [`Session`] that runs Lumerical in batch mode.

use std::fs;
use std::path::{Path, PathBuf};

use config::{Product, Tool, ToolLocator};
use serde::Serialize;
use tera::Context;

use crate::error::{Error, Result};
use crate::session::{Session, Value};
use crate::utils::{execute_run_script, render_to, write_run_script};

pub const RUN_SCRIPT: &str = "run_lumerical.sh";
pub const SESSION_SCRIPT: &str = "batch_session.lsf";
const RESULT_FILE: &str = "pdk_result.txt";

/// Runs script code through a Lumerical product binary.
///
/// Commands are buffered until a value is requested or the session is
/// flushed. Each flush runs one batch job that reloads the project and script
/// variables saved by the previous job, so state carries over between jobs.
pub struct BatchSession {
    product: Product,
    executable: PathBuf,
    work_dir: PathBuf,
    project: PathBuf,
    workspace: PathBuf,
    pending: Vec<String>,
    runs: usize,
}

#[derive(Serialize)]
struct SessionContext<'a> {
    run: usize,
    load_project: bool,
    load_workspace: bool,
    project: &'a Path,
    workspace: &'a Path,
    lines: &'a [String],
    expr: Option<&'a str>,
    text: bool,
    result_path: &'a Path,
}

#[derive(Serialize)]
struct RunContext<'a> {
    executable: &'a Path,
    script_path: &'a Path,
}

fn project_extension(product: Product) -> &'static str {
    match product {
        Product::Fdtd => "fsp",
        Product::Mode => "lms",
        Product::Interconnect => "icp",
    }
}

impl BatchSession {
    pub fn new(product: Product, executable: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let project = work_dir.join(format!("pdk_session.{}", project_extension(product)));
        let workspace = work_dir.join("pdk_session.ldf");
        Self {
            product,
            executable: executable.into(),
            work_dir,
            project,
            workspace,
            pending: Vec::new(),
            runs: 0,
        }
    }

    /// Opens a session with the product binary found by `locator`.
    pub fn from_locator(
        product: Product,
        locator: &ToolLocator,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let executable = locator.locate(Tool::Lumerical(product))?;
        Ok(Self::new(product, executable, work_dir))
    }

    pub fn product(&self) -> Product {
        self.product
    }

    /// The project file that holds the session's layout between jobs.
    pub fn project(&self) -> &Path {
        &self.project
    }

    /// Number of batch jobs run so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    fn execute(&mut self, query: Option<(&str, bool)>) -> Result<Option<String>> {
        fs::create_dir_all(&self.work_dir)?;
        let result_path = self.work_dir.join(RESULT_FILE);
        if result_path.exists() {
            fs::remove_file(&result_path)?;
        }
        self.runs += 1;

        let script_path = self.work_dir.join(SESSION_SCRIPT);
        let context = Context::from_serialize(SessionContext {
            run: self.runs,
            load_project: self.project.exists(),
            load_workspace: self.workspace.exists(),
            project: &self.project,
            workspace: &self.workspace,
            lines: &self.pending,
            expr: query.map(|(expr, _)| expr),
            text: query.is_some_and(|(_, text)| text),
            result_path: &result_path,
        })?;
        render_to(SESSION_SCRIPT, &context, &script_path)?;
        let run_script = write_run_script(
            RUN_SCRIPT,
            &Context::from_serialize(RunContext {
                executable: &self.executable,
                script_path: &script_path,
            })?,
            &self.work_dir,
        )?;

        tracing::debug!(
            product = self.product.binary(),
            run = self.runs,
            commands = self.pending.len(),
            "running batch job"
        );
        execute_run_script(&run_script, &self.work_dir, "lumerical")?;
        self.pending.clear();

        match query {
            None => Ok(None),
            Some((expr, _)) => {
                if !result_path.exists() {
                    return Err(Error::result(expr, "no result was written"));
                }
                Ok(Some(fs::read_to_string(&result_path)?))
            }
        }
    }

    fn query(&mut self, expr: &str, text: bool) -> Result<String> {
        self.execute(Some((expr, text)))?
            .ok_or_else(|| Error::result(expr, "no result was written"))
    }
}

impl Session for BatchSession {
    fn eval(&mut self, code: &str) -> Result<()> {
        self.pending.push(code.to_string());
        Ok(())
    }

    fn get(&mut self, expr: &str) -> Result<Value> {
        let text = self.query(expr, false)?;
        Ok(Value::parse(&text))
    }

    fn get_text(&mut self, expr: &str) -> Result<String> {
        Ok(self.query(expr, true)?.trim_end().to_string())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.execute(None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{test_dir, write_stand_in};

    /// A solver stand-in that copies each script it runs to `scripts.log`
    /// and answers the query with a fixed value.
    fn fake_solver(path: &Path, answer: &str) -> anyhow::Result<()> {
        write_stand_in(
            path,
            &format!(
                r#"while [ $# -gt 0 ]; do
  case "$1" in
    -run) script="$2"; shift ;;
  esac
  shift
done
cat "$script" >> scripts.log
out=$(sed -n 's/^write("\([^"]*\)".*/\1/p' "$script")
[ -n "$out" ] && printf '{answer}\n' > "$out"
exit 0
"#
            ),
        )
    }

    #[test]
    fn commands_are_buffered_until_a_query() -> anyhow::Result<()> {
        let dir = test_dir("commands_are_buffered_until_a_query")?;
        let exe = dir.join("fdtd-solutions");
        fake_solver(&exe, "1.5 2.5")?;
        let mut session = BatchSession::new(Product::Fdtd, &exe, &dir);

        session.add("addfdtd")?;
        session.set("x span", Value::Number(2e-6))?;
        assert_eq!(session.runs(), 0);

        let value = session.get("getresult(\"T\", \"T\")")?;
        assert_eq!(value, Value::Matrix(vec![1.5, 2.5]));
        assert_eq!(session.runs(), 1);

        let script = fs::read_to_string(dir.join(SESSION_SCRIPT))?;
        assert!(script.contains("addfdtd;\nset(\"x span\", 2e-6);\n"));
        assert!(script.contains("save(\""));
        assert!(script.contains("pdk_result = getresult(\"T\", \"T\");"));
        assert!(script.contains("num2str(pdk_result)"));
        assert!(!script.contains("load(\""));
        Ok(())
    }

    #[test]
    fn later_jobs_reload_the_project() -> anyhow::Result<()> {
        let dir = test_dir("later_jobs_reload_the_project")?;
        let exe = dir.join("mode-solutions");
        fake_solver(&exe, "3")?;
        let mut session = BatchSession::new(Product::Mode, &exe, &dir);
        assert!(session.project().to_string_lossy().ends_with(".lms"));

        session.add("findmodes")?;
        session.flush()?;
        // The stand-in does not write projects.
        fs::write(session.project(), "")?;
        fs::write(dir.join("pdk_session.ldf"), "")?;

        assert_eq!(session.get("1 + 2")?, Value::Number(3.));
        let script = fs::read_to_string(dir.join(SESSION_SCRIPT))?;
        assert!(script.contains("load(\""));
        assert!(script.contains("loaddata(\""));
        assert_eq!(session.runs(), 2);
        Ok(())
    }

    #[test]
    fn text_queries_skip_num2str() -> anyhow::Result<()> {
        let dir = test_dir("text_queries_skip_num2str")?;
        let exe = dir.join("interconnect");
        fake_solver(&exe, "publisher-key")?;
        let mut session = BatchSession::new(Product::Interconnect, &exe, &dir);

        assert_eq!(session.get_text("getdesignkitkey()")?, "publisher-key");
        let script = fs::read_to_string(dir.join(SESSION_SCRIPT))?;
        assert!(script.contains("write(\""));
        assert!(script.contains(", pdk_result);"));
        assert!(!script.contains("num2str(pdk_result)"));
        Ok(())
    }

    #[test]
    fn empty_flush_runs_nothing() -> anyhow::Result<()> {
        let dir = test_dir("empty_flush_runs_nothing")?;
        let mut session = BatchSession::new(Product::Fdtd, dir.join("missing"), &dir);
        session.flush()?;
        assert_eq!(session.runs(), 0);
        Ok(())
    }

    #[test]
    fn solver_failure_is_reported() -> anyhow::Result<()> {
        let dir = test_dir("solver_failure_is_reported")?;
        let exe = dir.join("fdtd-solutions");
        write_stand_in(&exe, "exit 3\n")?;
        let mut session = BatchSession::new(Product::Fdtd, &exe, &dir);
        session.run()?;
        let err = session.flush().unwrap_err();
        assert!(matches!(err, Error::Solver(status) if status.code() == Some(3)));
        Ok(())
    }

    #[test]
    fn missing_result_is_an_error() -> anyhow::Result<()> {
        let dir = test_dir("missing_result_is_an_error")?;
        let exe = dir.join("fdtd-solutions");
        write_stand_in(&exe, "exit 0\n")?;
        let mut session = BatchSession::new(Product::Fdtd, &exe, &dir);
        let err = session.get("x").unwrap_err();
        assert!(matches!(err, Error::Result { .. }));
        Ok(())
    }
}
