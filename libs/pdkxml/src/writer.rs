use std::fmt::Write;

use crate::{DECLARATION, Element};

pub(crate) fn write_document(root: &Element, indent: usize) -> String {
    let mut out = String::new();
    out.push_str(DECLARATION);
    out.push('\n');
    write_element(&mut out, root, 0, indent);
    out
}

pub(crate) fn write_fragment(root: &Element, indent: usize) -> String {
    let mut out = String::new();
    write_element(&mut out, root, 0, indent);
    out
}

fn write_element(out: &mut String, elem: &Element, depth: usize, indent: usize) {
    let pad = " ".repeat(depth * indent);
    out.push_str(&pad);
    out.push('<');
    out.push_str(&elem.name);
    for (key, value) in elem.attrs.iter() {
        // Writing to a `String` cannot fail.
        let _ = write!(out, " {}=\"{}\"", key, escape_attr(value));
    }

    let text = elem.text.as_deref().filter(|t| !t.trim().is_empty());
    if elem.children.is_empty() {
        match text {
            Some(text) => {
                let _ = writeln!(out, ">{}</{}>", escape_text(text), elem.name);
            }
            None => out.push_str("/>\n"),
        }
        return;
    }

    out.push_str(">\n");
    if let Some(text) = text {
        let _ = writeln!(
            out,
            "{}{}",
            " ".repeat((depth + 1) * indent),
            escape_text(text.trim())
        );
    }
    for child in elem.children.iter() {
        write_element(out, child, depth + 1, indent);
    }
    let _ = writeln!(out, "{}</{}>", pad, elem.name);
}

pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
