//! A small XML element tree for EDA technology and metadata files.
//!
//! KLayout layer properties, technology descriptors, DRC macros, and Lumerical
//! foundry and process files are all plain element trees without mixed content.
//! This crate reads and writes that subset, and pretty-prints it in a canonical
//! form: reformatting already pretty-printed output is a no-op.
#![warn(missing_docs)]

use std::path::Path;

use indexmap::IndexMap;

pub mod error;
mod reader;
mod writer;

pub use error::{Error, Result};

/// The XML declaration written at the top of every document.
pub const DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// An XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// The tag name.
    pub name: String,
    /// Attributes, in document order.
    pub attrs: IndexMap<String, String>,
    /// Character content, if any.
    ///
    /// Whitespace-only content is never stored.
    pub text: Option<String>,
    /// Child elements, in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets an attribute, returning the modified element.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attrs.insert(key.into(), value.to_string());
        self
    }

    /// Sets the character content, returning the modified element.
    pub fn with_text(mut self, text: impl ToString) -> Self {
        self.set_text(text);
        self
    }

    /// Appends a child, returning the modified element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Sets the character content.
    pub fn set_text(&mut self, text: impl ToString) {
        let text = text.to_string();
        self.text = (!text.trim().is_empty()).then_some(text);
    }

    /// Appends a child.
    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Appends a new empty child named `name` and returns a reference to it.
    pub fn child(&mut self, name: impl Into<String>) -> &mut Element {
        self.children.push(Element::new(name));
        let idx = self.children.len() - 1;
        &mut self.children[idx]
    }

    /// Appends a child named `name` holding `text`.
    pub fn text_child(&mut self, name: impl Into<String>, text: impl ToString) -> &mut Element {
        let child = self.child(name);
        child.set_text(text);
        child
    }

    /// Returns the first direct child named `name`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns the first direct child named `name`, mutably.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Iterates over the direct children named `name`.
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Returns the text of the first direct child named `name`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|c| c.text.as_deref())
    }

    /// Returns the attribute `key`, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Iterates over all elements below this one, depth-first in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Counts the elements below this one named `name`.
    pub fn count_descendants(&self, name: &str) -> usize {
        self.descendants().filter(|e| e.name == name).count()
    }

    /// Serializes this element as a pretty-printed document.
    ///
    /// Each nesting level is indented by `indent` spaces.
    pub fn to_pretty_string(&self, indent: usize) -> String {
        writer::write_document(self, indent)
    }

    /// Serializes this element like [`Element::to_pretty_string`], without the
    /// XML declaration.
    pub fn to_pretty_fragment(&self, indent: usize) -> String {
        writer::write_fragment(self, indent)
    }

    /// Writes this element as a pretty-printed document to `path`.
    pub fn write_pretty(&self, path: impl AsRef<Path>, indent: usize) -> Result<()> {
        std::fs::write(path, self.to_pretty_string(indent))?;
        Ok(())
    }
}

/// Depth-first iterator returned by [`Element::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Parses an XML document, returning its root element.
pub fn parse(input: &str) -> Result<Element> {
    reader::Reader::new(input).document()
}

/// Reads and parses the XML document at `path`.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Element> {
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

/// Reformats an XML document in canonical pretty-printed form.
pub fn prettify(input: &str, indent: usize) -> Result<String> {
    Ok(parse(input)?.to_pretty_string(indent))
}
