//! Generates KLayout and Lumerical technology files from a Process YAML.
//!
//! A single Process YAML describes the layers of a photonic fabrication
//! process. From it this crate derives:
//!
//! * the layer properties file (`.lyp`),
//! * the technology descriptor (`.lyt`),
//! * a DRC rule deck wrapped in a KLayout macro (`.lydrc`) and its DRC YAML,
//! * a cross-section script (`.xs`) with its keybinding macro (`.lym`),
//! * the Lumerical layer builder process file (`.lbr`).
//!
//! [`assemble`] writes all of them into a technology folder.

use serde_yaml::Value;

pub mod assemble;
pub mod error;
pub mod lbr;
pub mod lydrc;
pub mod lyp;
pub mod lyt;
pub mod process;
pub mod rules;
pub mod xsection;

pub use assemble::{AssembleParams, TechFiles, assemble};
pub use error::{Error, Result};
pub use process::{Layer, LayerSource, Mask, Process};
pub use rules::DrcRules;

/// Converts a layer name into a Ruby variable name.
///
/// Spaces become underscores, `+` becomes `p` and `-` becomes `n`, so
/// `"N++ Implant"` maps to `layer_Npp_Implant`.
pub fn ruby_layer_name(name: &str) -> String {
    let mut out = String::from("layer");
    for part in name.split(' ') {
        out.push('_');
        out.push_str(part);
    }
    out.replace('+', "p").replace('-', "n")
}

/// Formats a float the way the generated scripts expect: integral values keep
/// a trailing `.0`.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Renders a YAML scalar as text.
///
/// Booleans are lowercase and null is `None`, which callers turn into an
/// empty element. Collections have no scalar text.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() => format_float(f),
            _ => n.to_string(),
        }),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Appends `value` to `parent` as one or more children named `tag`.
///
/// Mappings nest, sequences repeat the tag, and scalars become text.
pub(crate) fn append_value(parent: &mut pdkxml::Element, tag: &str, value: &Value) {
    match value {
        Value::Mapping(map) => {
            let elem = parent.child(tag);
            for (key, value) in map {
                if let Some(key) = scalar_text(key) {
                    append_value(elem, &key, value);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                append_value(parent, tag, item);
            }
        }
        Value::Tagged(tagged) => append_value(parent, tag, &tagged.value),
        scalar => {
            let elem = parent.child(tag);
            if let Some(text) = scalar_text(scalar) {
                elem.set_text(text);
            }
        }
    }
}
