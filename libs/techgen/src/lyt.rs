//! KLayout technology descriptors (`.lyt`).

use lazy_static::lazy_static;
use pdkxml::Element;
use serde_yaml::{Mapping, Value};

use crate::append_value;

const DEFAULT_TECHNOLOGY_YAML: &str = include_str!("../templates/technology.yaml");

lazy_static! {
    static ref DEFAULT_TECHNOLOGY: Mapping = {
        match serde_yaml::from_str(DEFAULT_TECHNOLOGY_YAML) {
            Ok(t) => t,
            Err(e) => {
                panic!("Encountered errors while parsing the default technology: {e}");
            }
        }
    };
}

/// A technology descriptor tree.
///
/// Starts from KLayout's defaults; only keys present in the defaults may be
/// overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct Technology {
    tree: Mapping,
}

impl Default for Technology {
    fn default() -> Self {
        Self {
            tree: DEFAULT_TECHNOLOGY.clone(),
        }
    }
}

impl Technology {
    /// The default technology updated with `params`.
    pub fn with_params(params: &Mapping) -> Self {
        let mut tech = Self::default();
        tech.update(params);
        tech
    }

    /// Recursively overrides entries with `params`.
    ///
    /// Keys absent from the tree are logged and skipped. Mappings merge key by
    /// key and sequences merge element by element.
    pub fn update(&mut self, params: &Mapping) {
        update_mapping(&mut self.tree, params, "technology");
    }

    /// Looks up a value by its key path.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut map = &self.tree;
        for key in parents {
            map = map.get(*key)?.as_mapping()?;
        }
        map.get(*last)
    }

    /// Sets a scalar by its key path, creating nothing: the path must exist.
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut map = &mut self.tree;
        for key in parents {
            match map.get_mut(*key).and_then(Value::as_mapping_mut) {
                Some(next) => map = next,
                None => return false,
            }
        }
        match map.get_mut(*last) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// The technology name.
    pub fn name(&self) -> &str {
        self.get(&["name"]).and_then(Value::as_str).unwrap_or("")
    }

    /// Points the descriptor at a technology folder and its companion files.
    pub fn configure_for(&mut self, tech_name: &str, base_path: &str) {
        self.set(&["name"], tech_name);
        self.set(&["original-base-path"], base_path);
        self.set(&["layer-properties_file"], format!("{tech_name}.lyp"));
        self.set(
            &["writer-options", "gds2", "libname"],
            format!("{tech_name}_Library"),
        );
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("technology");
        for (key, value) in self.tree.iter() {
            if let Some(key) = key.as_str() {
                append_value(&mut root, key, value);
            }
        }
        root
    }

    /// Renders the `.lyt` document.
    pub fn to_xml(&self) -> String {
        self.to_element().to_pretty_string(2)
    }
}

fn update_mapping(tree: &mut Mapping, params: &Mapping, at: &str) {
    for (key, value) in params {
        let key_name = key.as_str().unwrap_or_default();
        match tree.get_mut(key) {
            Some(slot) => update_value(slot, value, key_name),
            None => tracing::error!(at, "\"{key_name}\" not in technology data structure"),
        }
    }
}

fn update_value(slot: &mut Value, value: &Value, key: &str) {
    match (slot, value) {
        (_, Value::Null) => {}
        (Value::Mapping(tree), Value::Mapping(params)) => update_mapping(tree, params, key),
        (Value::Sequence(items), Value::Sequence(params)) => {
            for (i, param) in params.iter().enumerate() {
                match items.get_mut(i) {
                    Some(item) => update_value(item, param, key),
                    None => tracing::error!(
                        at = key,
                        "entry {i} not in technology data structure"
                    ),
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
