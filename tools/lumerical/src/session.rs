//! Scripting sessions with Lumerical products.

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// A value exchanged with a Lumerical script.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    /// A column vector.
    Matrix(Vec<f64>),
    /// An `N x 2` matrix of `(x, y)` pairs, such as polygon vertices.
    Points(Vec<[f64; 2]>),
}

/// Formats a number so that Lumerical script parses it back exactly.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value}")
    } else {
        format!("{value:e}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "\"{}\"", s.replace('"', "'")),
            Value::Matrix(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", format_number(*v))?;
                }
                write!(f, "]")
            }
            Value::Points(points) => {
                write!(f, "[")?;
                for (i, [x, y]) in points.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}, {}", format_number(*x), format_number(*y))?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Value {
    /// The value as a scalar. Matrices yield their first element.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Matrix(values) => values.first().copied(),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Points(_) => None,
        }
    }

    /// The value as a flat list of numbers.
    pub fn to_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Number(n) => Some(vec![*n]),
            Value::Matrix(values) => Some(values.clone()),
            Value::Points(points) => Some(points.iter().flatten().copied().collect()),
            Value::Text(_) => None,
        }
    }

    /// Parses the text Lumerical's `num2str` writes: numbers separated by
    /// whitespace. Anything else is kept as text.
    pub fn parse(text: &str) -> Value {
        let numbers: std::result::Result<Vec<f64>, _> =
            text.split_whitespace().map(str::parse::<f64>).collect();
        match numbers {
            Ok(mut numbers) if numbers.len() == 1 => Value::Number(numbers.remove(0)),
            Ok(numbers) if !numbers.is_empty() => Value::Matrix(numbers),
            _ => Value::Text(text.trim_end().to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Number(if value { 1. } else { 0. })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&Path> for Value {
    fn from(value: &Path) -> Self {
        Value::Text(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Matrix(value)
    }
}

impl From<Vec<[f64; 2]>> for Value {
    fn from(value: Vec<[f64; 2]>) -> Self {
        Value::Points(value)
    }
}

/// A scripting session with a Lumerical product.
///
/// Only [`Session::eval`] and [`Session::get`] talk to the product; every
/// other command is built from script text.
pub trait Session {
    /// Runs Lumerical script code.
    fn eval(&mut self, code: &str) -> Result<()>;

    /// Evaluates a numeric expression and returns its value.
    fn get(&mut self, expr: &str) -> Result<Value>;

    /// Evaluates an expression that produces a string.
    fn get_text(&mut self, expr: &str) -> Result<String> {
        Ok(match self.get(expr)? {
            Value::Text(s) => s,
            other => other.to_string(),
        })
    }

    /// Makes sure every command so far has been executed.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sets a property of the selected objects.
    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        self.eval(&format!("set(\"{property}\", {value});"))
    }

    fn run(&mut self) -> Result<()> {
        self.eval("run;")
    }

    /// Calls a command without arguments, such as `addfdtd` or `findmodes`.
    fn add(&mut self, command: &str) -> Result<()> {
        self.eval(&format!("{command};"))
    }

    /// Sets a property of the object called `name`.
    fn set_named(&mut self, name: &str, property: &str, value: Value) -> Result<()> {
        self.eval(&format!("setnamed(\"{name}\", \"{property}\", {value});"))
    }

    fn switch_to_layout(&mut self) -> Result<()> {
        self.eval("switchtolayout;")
    }

    fn select_all(&mut self) -> Result<()> {
        self.eval("selectall;")
    }

    fn delete(&mut self) -> Result<()> {
        self.eval("delete;")
    }

    /// Clears the layout for a new simulation.
    fn new_project(&mut self) -> Result<()> {
        self.eval("newproject; switchtolayout; redrawoff; selectall; delete;")
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.eval(&format!("save({});", Value::from(path)))
    }

    /// Assigns a script variable.
    fn putv(&mut self, name: &str, value: Value) -> Result<()> {
        self.eval(&format!("{name} = {value};"))
    }

    /// Evaluates `expr` and requires a scalar result.
    fn get_f64(&mut self, expr: &str) -> Result<f64> {
        self.get(expr)?
            .as_f64()
            .ok_or_else(|| Error::result(expr, "expected a number"))
    }
}

impl<S: Session + ?Sized> Session for &mut S {
    fn eval(&mut self, code: &str) -> Result<()> {
        (**self).eval(code)
    }

    fn get(&mut self, expr: &str) -> Result<Value> {
        (**self).get(expr)
    }

    fn get_text(&mut self, expr: &str) -> Result<String> {
        (**self).get_text(expr)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
