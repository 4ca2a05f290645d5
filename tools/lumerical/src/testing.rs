//! A [`Session`] that records commands instead of running them.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::session::{Session, Value};

type Hook = Box<dyn FnMut(&str)>;

/// Records every command and answers queries from a queue of canned values.
#[derive(Default)]
pub struct RecordingSession {
    /// Evaluated script code, in order.
    pub commands: Vec<String>,
    /// Queried expressions, in order.
    pub queries: Vec<String>,
    /// Answers returned by [`Session::get`], front first.
    pub answers: VecDeque<Value>,
    pub flushes: usize,
    hook: Option<Hook>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answers(answers: impl IntoIterator<Item = Value>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn answer(&mut self, value: impl Into<Value>) {
        self.answers.push_back(value.into());
    }

    /// Calls `hook` with every evaluated command, such as to create the files
    /// a solver would write.
    pub fn on_eval(mut self, hook: impl FnMut(&str) + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Whether any command contains `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.commands.iter().any(|c| c.contains(needle))
    }

    /// Number of commands containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.commands.iter().filter(|c| c.contains(needle)).count()
    }
}

impl Session for RecordingSession {
    fn eval(&mut self, code: &str) -> Result<()> {
        if let Some(hook) = self.hook.as_mut() {
            hook(code);
        }
        self.commands.push(code.to_string());
        Ok(())
    }

    fn get(&mut self, expr: &str) -> Result<Value> {
        self.queries.push(expr.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| Error::result(expr, "no recorded answer"))
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_render_script_syntax() -> anyhow::Result<()> {
        let mut session = RecordingSession::new();
        session.add("addpower")?;
        session.set("name", "transmission".into())?;
        session.set_named("expansion", "frequency points", Value::Number(5.))?;
        session.putv("theta", Value::Number(1.5707963267948966))?;
        session.putv("v", Value::Matrix(vec![1., 0.25]))?;
        session.putv("vertices", Value::Points(vec![[0., 1.], [2., 3.]]))?;

        assert_eq!(
            session.commands,
            [
                "addpower;",
                "set(\"name\", \"transmission\");",
                "setnamed(\"expansion\", \"frequency points\", 5);",
                "theta = 1.5707963267948966e0;",
                "v = [1; 2.5e-1];",
                "vertices = [0, 1; 2, 3];",
            ]
        );
        Ok(())
    }

    #[test]
    fn answers_are_consumed_in_order() -> anyhow::Result<()> {
        let mut session = RecordingSession::with_answers([Value::Number(1.), Value::Number(2.)]);
        assert_eq!(session.get_f64("a")?, 1.);
        assert_eq!(session.get_f64("b")?, 2.);
        assert!(matches!(session.get("c"), Err(Error::Result { .. })));
        assert_eq!(session.queries, ["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn parses_solver_output() {
        assert_eq!(Value::parse("2\n"), Value::Number(2.));
        assert_eq!(Value::parse("1 2\n3"), Value::Matrix(vec![1., 2., 3.]));
        assert_eq!(Value::parse("EBeam\n"), Value::Text("EBeam".into()));
        assert_eq!(Value::parse(""), Value::Text(String::new()));
    }
}
