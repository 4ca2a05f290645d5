//! Decision points that would otherwise block on an operator.
//!
//! Pipelines ask a [`Decider`] instead of reading the terminal directly so that
//! automated runs can supply a fixed policy.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Answers yes/no questions and picks among options.
pub trait Decider {
    /// Asks a yes/no question.
    fn confirm(&mut self, question: &str) -> bool;

    /// Asks the decider to pick one of `options`, returning its index.
    ///
    /// Returns `None` if no option was chosen.
    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize>;
}

/// Returns `true` for the affirmative answers `yes` and `y`, ignoring case and surrounding whitespace.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}

/// Prompts on stderr and reads answers line by line.
pub struct ConsoleDecider {
    input: Box<dyn BufRead>,
}

impl ConsoleDecider {
    /// Reads answers from standard input.
    pub fn stdin() -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    /// Reads answers from an arbitrary reader.
    pub fn from_reader(reader: impl BufRead + 'static) -> Self {
        Self {
            input: Box::new(reader),
        }
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

impl fmt::Debug for ConsoleDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleDecider").finish_non_exhaustive()
    }
}

impl Decider for ConsoleDecider {
    fn confirm(&mut self, question: &str) -> bool {
        eprintln!("{question}");
        eprint!("Enter 'Yes' or 'No': ");
        let _ = io::stderr().flush();
        self.read_line().map(|l| is_affirmative(&l)).unwrap_or(false)
    }

    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        eprintln!("{prompt}");
        for (i, option) in options.iter().enumerate() {
            eprintln!("  [{}] {}", i + 1, option);
        }
        eprint!("Selection: ");
        let _ = io::stderr().flush();
        let line = self.read_line()?;
        let idx = line.trim().parse::<usize>().ok()?;
        (1..=options.len()).contains(&idx).then(|| idx - 1)
    }
}

/// Gives the same answer to every question.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedDecider {
    /// The answer to every yes/no question.
    pub answer: bool,
}

impl FixedDecider {
    /// A decider that always proceeds.
    pub fn always() -> Self {
        Self { answer: true }
    }

    /// A decider that always stops.
    pub fn never() -> Self {
        Self { answer: false }
    }
}

impl Decider for FixedDecider {
    fn confirm(&mut self, question: &str) -> bool {
        tracing::info!(answer = self.answer, "{question}");
        self.answer
    }

    /// Picks the first option when proceeding and nothing otherwise.
    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        tracing::info!(answer = self.answer, "{prompt}");
        (self.answer && !options.is_empty()).then_some(0)
    }
}

/// How operator decisions are made.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrcPolicy {
    /// Ask on the console.
    #[default]
    Prompt,
    /// Always continue.
    Continue,
    /// Always stop.
    Abort,
}

impl DrcPolicy {
    /// Builds the decider implementing this policy.
    pub fn decider(&self) -> Box<dyn Decider> {
        match self {
            DrcPolicy::Prompt => Box::new(ConsoleDecider::stdin()),
            DrcPolicy::Continue => Box::new(FixedDecider::always()),
            DrcPolicy::Abort => Box::new(FixedDecider::never()),
        }
    }
}

impl FromStr for DrcPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(DrcPolicy::Prompt),
            "continue" => Ok(DrcPolicy::Continue),
            "abort" => Ok(DrcPolicy::Abort),
            other => Err(anyhow!(
                "unknown decision policy `{other}`; expected prompt, continue or abort"
            )),
        }
    }
}

impl fmt::Display for DrcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DrcPolicy::Prompt => "prompt",
            DrcPolicy::Continue => "continue",
            DrcPolicy::Abort => "abort",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("Yes\n"));
        assert!(is_affirmative(" y "));
        assert!(is_affirmative("YES"));
        assert!(!is_affirmative("No"));
        assert!(!is_affirmative("yeah"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn console_decider_reads_answers_in_order() {
        let mut decider = ConsoleDecider::from_reader(Cursor::new("yes\nno\n2\n"));
        assert!(decider.confirm("continue?"));
        assert!(!decider.confirm("continue?"));
        let options = vec!["a".to_string(), "b".to_string()];
        assert_eq!(decider.choose("pick", &options), Some(1));
        // Input is exhausted.
        assert!(!decider.confirm("continue?"));
    }

    #[test]
    fn console_decider_rejects_out_of_range_choice() {
        let mut decider = ConsoleDecider::from_reader(Cursor::new("3\n0\n"));
        let options = vec!["a".to_string(), "b".to_string()];
        assert_eq!(decider.choose("pick", &options), None);
        assert_eq!(decider.choose("pick", &options), None);
    }

    #[test]
    fn fixed_deciders() {
        let options = vec!["only".to_string()];
        assert!(FixedDecider::always().confirm("q"));
        assert_eq!(FixedDecider::always().choose("p", &options), Some(0));
        assert!(!FixedDecider::never().confirm("q"));
        assert_eq!(FixedDecider::never().choose("p", &options), None);
    }

    #[test]
    fn policy_parsing() -> anyhow::Result<()> {
        assert_eq!("Continue".parse::<DrcPolicy>()?, DrcPolicy::Continue);
        assert_eq!("abort".parse::<DrcPolicy>()?, DrcPolicy::Abort);
        assert!("maybe".parse::<DrcPolicy>().is_err());
        Ok(())
    }
}
