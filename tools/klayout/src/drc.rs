//! Run design rule checking (DRC) using KLayout in batch mode.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use config::paths::find_path;
use config::{Decider, Tool, ToolLocator};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::error::{Error, Result};
use crate::utils::{execute_run_script, write_run_script};

/// Depth to which the KLayout configuration directory is searched for rule decks.
const RULE_DECK_SEARCH_DEPTH: usize = 8;

/// Parameters for running DRC on a layout.
#[derive(Clone, Debug)]
pub struct DrcParams<'a> {
    /// Technology whose `{tech_name}_DRC` rule deck is run.
    pub tech_name: &'a str,
    /// The GDS layout to check.
    pub layout_path: &'a Path,
    /// Names the results database.
    pub component_name: &'a str,
    /// Where the run script and KLayout's output are written.
    pub work_dir: &'a Path,
}

#[derive(Serialize)]
struct DrcRunsetContext<'a> {
    klayout: &'a Path,
    deck_path: &'a Path,
    layout_path: &'a Path,
    results_path: &'a Path,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrcData {
    pub rule_checks: Vec<RuleCheck>,
}

impl DrcData {
    pub fn total(&self) -> usize {
        self.rule_checks.iter().map(|r| r.num_results).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub category: String,
    pub description: Option<String>,
    pub num_results: usize,
}

/// Why DRC was not run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    MissingLayout(PathBuf),
    MissingRuleDeck(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrcOutcome {
    Skipped(SkipReason),
    Completed {
        total_errors: usize,
        results_path: PathBuf,
        /// Whether the pipeline should continue.
        proceed: bool,
    },
}

impl DrcOutcome {
    /// Whether the pipeline should continue. Skipped runs never continue.
    pub fn proceed(&self) -> bool {
        matches!(self, DrcOutcome::Completed { proceed: true, .. })
    }
}

/// Counts the violations recorded in a KLayout report database (`.lyrdb`).
pub fn get_total_drc_errors(path: impl AsRef<Path>) -> Result<usize> {
    let root = pdkxml::parse_file(path)?;
    Ok(root.count_descendants("item"))
}

fn unquote(category: &str) -> &str {
    let category = category.trim();
    category
        .strip_prefix('\'')
        .and_then(|c| c.strip_suffix('\''))
        .unwrap_or(category)
}

/// Groups the violations of a KLayout report database by rule category.
///
/// Categories without violations are omitted.
pub fn parse_drc_results(path: impl AsRef<Path>) -> Result<DrcData> {
    let root = pdkxml::parse_file(path)?;

    let mut descriptions = HashMap::new();
    if let Some(categories) = root.find("categories") {
        for category in categories.find_all("category") {
            if let Some(name) = category.child_text("name") {
                descriptions.insert(
                    name.trim().to_string(),
                    category.child_text("description").map(str::to_string),
                );
            }
        }
    }

    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for item in root.descendants().filter(|e| e.name == "item") {
        let category = unquote(item.child_text("category").unwrap_or_default());
        *counts.entry(category.to_string()).or_default() += 1;
    }

    let rule_checks = counts
        .into_iter()
        .map(|(category, num_results)| RuleCheck {
            description: descriptions.get(&category).cloned().flatten(),
            category,
            num_results,
        })
        .collect();
    Ok(DrcData { rule_checks })
}

/// Runs DRC, remembering the rule deck found for each technology.
pub struct DrcRunner<'a> {
    locator: &'a ToolLocator,
    decks: HashMap<String, PathBuf>,
}

impl<'a> DrcRunner<'a> {
    pub fn new(locator: &'a ToolLocator) -> Self {
        Self {
            locator,
            decks: HashMap::new(),
        }
    }

    /// Finds the first `*.lydrc` file under the KLayout configuration directory
    /// whose name contains `{tech_name}_DRC`.
    pub fn find_rule_deck(&mut self, tech_name: &str) -> Result<Option<PathBuf>> {
        if let Some(deck) = self.decks.get(tech_name) {
            return Ok(Some(deck.clone()));
        }
        let klayout_dir = self.locator.locate(Tool::KLayoutConfigDir)?;
        let deck = find_rule_deck(&klayout_dir, tech_name);
        if let Some(deck) = &deck {
            tracing::info!(tech = tech_name, deck = %deck.display(), "found DRC rule deck");
            self.decks.insert(tech_name.to_string(), deck.clone());
        }
        Ok(deck)
    }

    /// Runs DRC on a layout and asks `decider` whether to continue.
    ///
    /// The decider is first offered to open the results in KLayout when there are
    /// violations, then asked whether to continue. It is asked even for clean
    /// layouts.
    pub fn run(&mut self, params: &DrcParams, decider: &mut dyn Decider) -> Result<DrcOutcome> {
        if !params.layout_path.exists() {
            tracing::warn!(
                layout = %params.layout_path.display(),
                "layout does not exist; DRC not run"
            );
            return Ok(DrcOutcome::Skipped(SkipReason::MissingLayout(
                params.layout_path.to_path_buf(),
            )));
        }
        let Some(deck_path) = self.find_rule_deck(params.tech_name)? else {
            tracing::error!(tech = params.tech_name, "could not find DRC rule deck");
            return Ok(DrcOutcome::Skipped(SkipReason::MissingRuleDeck(
                params.tech_name.to_string(),
            )));
        };
        let klayout = self.locator.locate(Tool::KLayout)?;

        let results_dir = params
            .layout_path
            .parent()
            .unwrap_or(Path::new("."))
            .join("drc_results");
        fs::create_dir_all(&results_dir)?;
        let results_path = results_dir.join(format!(
            "{}{}_drc_results.lyrdb",
            chrono::Local::now().format("%Y-%m-%d-%H%M-"),
            params.component_name
        ));

        let context = Context::from_serialize(DrcRunsetContext {
            klayout: &klayout,
            deck_path: &deck_path,
            layout_path: params.layout_path,
            results_path: &results_path,
        })?;
        let run_script_path = write_run_script("run_klayout_drc.sh", &context, params.work_dir)?;
        tracing::info!(
            layout = %params.layout_path.display(),
            results = %results_path.display(),
            "running DRC"
        );
        execute_run_script(&run_script_path, params.work_dir, "drc")?;
        if !results_path.exists() {
            return Err(Error::MissingOutput(results_path));
        }

        let total_errors = get_total_drc_errors(&results_path)?;
        tracing::info!(total_errors, "DRC complete");
        if total_errors > 0
            && decider.confirm(&format!(
                "DRC completed with {total_errors} errors.\nOpen KLayout to view layout and DRC results?"
            ))
        {
            open_results(&klayout, params.layout_path, &results_path)?;
        }
        let proceed = decider.confirm(&format!(
            "DRC completed with {total_errors} errors.\nAre you sure you want to continue?"
        ));
        if proceed {
            tracing::info!("continuing");
        } else {
            tracing::info!("exiting");
        }

        Ok(DrcOutcome::Completed {
            total_errors,
            results_path,
            proceed,
        })
    }
}

/// Finds the first `*.lydrc` file below `klayout_dir` whose name contains
/// `{tech_name}_DRC`.
pub fn find_rule_deck(klayout_dir: &Path, tech_name: &str) -> Option<PathBuf> {
    let pattern = format!("{tech_name}_DRC");
    find_path(klayout_dir, RULE_DECK_SEARCH_DEPTH, |path| {
        path.extension().is_some_and(|ext| ext == "lydrc")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(&pattern))
            && path.is_file()
    })
}

/// Opens a layout and its results database in the KLayout GUI without waiting.
fn open_results(klayout: &Path, layout_path: &Path, results_path: &Path) -> Result<()> {
    tracing::info!("opening layout and DRC results");
    Command::new(klayout)
        .arg(layout_path)
        .arg("-m")
        .arg(results_path)
        .spawn()?;
    Ok(())
}

/// Runs DRC once with a fresh rule deck lookup.
pub fn run_drc(
    params: &DrcParams,
    locator: &ToolLocator,
    decider: &mut dyn Decider,
) -> Result<DrcOutcome> {
    DrcRunner::new(locator).run(params, decider)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use super::*;
    use crate::tests::{TEST_BUILD_PATH, write_stand_in};

    const LYRDB: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<report-database>
 <description>DRC</description>
 <categories>
  <category>
   <name>Si width</name>
   <description>Si minimum feature size violation; min 0.06 um</description>
  </category>
  <category>
   <name>Si space</name>
   <description>Si minimum space violation; min 0.06 um</description>
  </category>
 </categories>
 <cells>
  <cell><name>TOP</name></cell>
 </cells>
 <items>
  <item><tags/><category>'Si width'</category><cell>TOP</cell><visited>false</visited><multiplicity>1</multiplicity></item>
  <item><tags/><category>'Si space'</category><cell>TOP</cell><visited>false</visited><multiplicity>1</multiplicity></item>
  <item><tags/><category>'Si width'</category><cell>TOP</cell><visited>false</visited><multiplicity>1</multiplicity></item>
 </items>
</report-database>
"#;

    /// Answers from a queue and remembers the questions.
    #[derive(Default)]
    struct Scripted {
        answers: VecDeque<bool>,
        questions: Vec<String>,
    }

    impl Decider for Scripted {
        fn confirm(&mut self, question: &str) -> bool {
            self.questions.push(question.to_string());
            self.answers.pop_front().unwrap_or(false)
        }

        fn choose(&mut self, prompt: &str, _options: &[String]) -> Option<usize> {
            self.questions.push(prompt.to_string());
            None
        }
    }

    /// A KLayout stand-in that writes `LYRDB` to the requested results path.
    fn fake_klayout(path: &Path) -> anyhow::Result<()> {
        write_stand_in(
            path,
            &format!(
                r#"for arg in "$@"; do
  case "$arg" in
    out_drc_results=*) out="${{arg#out_drc_results=}}" ;;
  esac
done
[ -n "$out" ] || exit 0
cat > "$out" <<'LYRDB'
{LYRDB}LYRDB
"#
            ),
        )
    }

    fn setup(name: &str) -> anyhow::Result<(PathBuf, ToolLocator)> {
        let dir = PathBuf::from(TEST_BUILD_PATH).join(name);
        let _ = fs::remove_dir_all(&dir);
        let klayout_dir = dir.join("KLayout");
        let deck_dir = klayout_dir.join("tech").join("Cheam").join("drc");
        fs::create_dir_all(&deck_dir)?;
        fs::write(klayout_dir.join("klayoutrc"), "")?;
        fs::write(deck_dir.join("Cheam_DRC.lydrc"), "")?;
        fs::write(deck_dir.join("Other_DRC.lydrc"), "")?;
        let klayout = dir.join("bin").join("klayout");
        fake_klayout(&klayout)?;
        let locator = ToolLocator::new(Vec::<PathBuf>::new())
            .with_override(Tool::KLayoutConfigDir, &klayout_dir)
            .with_override(Tool::KLayout, &klayout);
        Ok((dir, locator))
    }

    #[test]
    fn counts_items() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for n in [0, 1, 7] {
            let items = "<item><category>'x'</category></item>".repeat(n);
            let path = dir.path().join(format!("{n}.lyrdb"));
            fs::write(
                &path,
                format!("<report-database><items>{items}</items></report-database>"),
            )?;
            assert_eq!(get_total_drc_errors(&path)?, n);
        }
        Ok(())
    }

    #[test]
    fn groups_results_by_category() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("results.lyrdb");
        fs::write(&path, LYRDB)?;

        let data = parse_drc_results(&path)?;
        assert_eq!(data.total(), 3);
        assert_eq!(
            data.rule_checks,
            vec![
                RuleCheck {
                    category: "Si width".to_string(),
                    description: Some("Si minimum feature size violation; min 0.06 um".to_string()),
                    num_results: 2,
                },
                RuleCheck {
                    category: "Si space".to_string(),
                    description: Some("Si minimum space violation; min 0.06 um".to_string()),
                    num_results: 1,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn finds_and_caches_rule_deck() -> anyhow::Result<()> {
        let (dir, locator) = setup("finds_and_caches_rule_deck")?;
        let mut runner = DrcRunner::new(&locator);

        let deck = runner.find_rule_deck("Cheam")?;
        let expected = dir.join("KLayout/tech/Cheam/drc/Cheam_DRC.lydrc");
        assert_eq!(deck.as_deref(), Some(expected.as_path()));

        fs::remove_file(&expected)?;
        assert_eq!(runner.find_rule_deck("Cheam")?, Some(expected));
        assert_eq!(runner.find_rule_deck("Missing")?, None);
        Ok(())
    }

    #[test]
    fn run_drc_asks_before_continuing() -> anyhow::Result<()> {
        let (dir, locator) = setup("run_drc_asks_before_continuing")?;
        let layout_path = dir.join("layout").join("y_branch.gds");
        fs::create_dir_all(layout_path.parent().unwrap())?;
        fs::write(&layout_path, "")?;
        let work_dir = dir.join("work");

        let params = DrcParams {
            tech_name: "Cheam",
            layout_path: &layout_path,
            component_name: "y_branch",
            work_dir: &work_dir,
        };
        let mut decider = Scripted {
            answers: VecDeque::from([false, true]),
            ..Default::default()
        };
        let outcome = run_drc(&params, &locator, &mut decider)?;

        let DrcOutcome::Completed {
            total_errors,
            results_path,
            proceed,
        } = &outcome
        else {
            panic!("expected DRC to run, got {outcome:?}");
        };
        assert_eq!(*total_errors, 3);
        assert!(*proceed);
        assert!(outcome.proceed());
        assert_eq!(results_path.parent(), Some(dir.join("layout/drc_results").as_path()));
        assert!(
            results_path
                .to_string_lossy()
                .ends_with("y_branch_drc_results.lyrdb")
        );
        assert!(work_dir.join("run_klayout_drc.sh").exists());
        assert!(work_dir.join("drc.out").exists());

        assert_eq!(decider.questions.len(), 2);
        assert!(decider.questions[0].contains("Open KLayout"));
        assert!(decider.questions[1].contains("3 errors"));
        assert!(decider.questions[1].contains("continue"));
        Ok(())
    }

    #[test]
    fn run_drc_skips_missing_inputs() -> anyhow::Result<()> {
        let (dir, locator) = setup("run_drc_skips_missing_inputs")?;
        let work_dir = dir.join("work");
        let mut decider = Scripted::default();

        let missing = dir.join("missing.gds");
        let outcome = run_drc(
            &DrcParams {
                tech_name: "Cheam",
                layout_path: &missing,
                component_name: "missing",
                work_dir: &work_dir,
            },
            &locator,
            &mut decider,
        )?;
        assert_eq!(outcome, DrcOutcome::Skipped(SkipReason::MissingLayout(missing)));
        assert!(!outcome.proceed());

        let layout = dir.join("layout.gds");
        fs::write(&layout, "")?;
        let outcome = run_drc(
            &DrcParams {
                tech_name: "Nowhere",
                layout_path: &layout,
                component_name: "layout",
                work_dir: &work_dir,
            },
            &locator,
            &mut decider,
        )?;
        assert_eq!(
            outcome,
            DrcOutcome::Skipped(SkipReason::MissingRuleDeck("Nowhere".to_string()))
        );
        assert!(decider.questions.is_empty());
        Ok(())
    }
}
