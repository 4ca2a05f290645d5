//! KLayout layer properties (`.lyp`).

use indexmap::IndexMap;
use pdkxml::Element;
use serde_yaml::Mapping;

use crate::process::{Layer, Process};
use crate::scalar_text;

/// Display properties every layer starts from, in file order.
pub const DEFAULT_PROPERTIES: [(&str, &str); 13] = [
    ("frame-color", "#000000"),
    ("fill-color", "#000000"),
    ("frame-brightness", "0"),
    ("fill-brightness", "0"),
    ("dither-pattern", ""),
    ("line-style", ""),
    ("valid", "true"),
    ("visible", "true"),
    ("transparent", "false"),
    ("width", ""),
    ("marked", "false"),
    ("xfill", "false"),
    ("animation", "0"),
];

/// Display properties of one layer or group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
    pub name: String,
    pub source: String,
    /// Property values keyed by tag, in [`DEFAULT_PROPERTIES`] order.
    pub props: IndexMap<String, String>,
    /// Members of a group. Empty for plain layers.
    pub members: Vec<LayerProperties>,
}

impl LayerProperties {
    fn from_yaml(name: &str, source: &str, overrides: &Mapping) -> Self {
        let mut props: IndexMap<String, String> = DEFAULT_PROPERTIES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (key, value) in overrides {
            let Some(key) = key.as_str() else {
                continue;
            };
            match props.get_mut(key) {
                Some(slot) => *slot = scalar_text(value).unwrap_or_default(),
                None => tracing::error!(layer = name, "\"{key}\" does not exist in layer properties"),
            }
        }
        Self {
            name: name.to_string(),
            source: source.to_string(),
            props,
            members: Vec::new(),
        }
    }

    fn is_group(&self) -> bool {
        !self.members.is_empty()
    }

    fn to_element(&self, tag: &str) -> Element {
        let mut elem = Element::new(tag);
        for (key, value) in self.props.iter() {
            elem.text_child(key.as_str(), value);
        }
        elem.text_child("name", &self.name);
        elem.text_child("source", &self.source);
        for member in self.members.iter() {
            elem.push(member.to_element("group-members"));
        }
        elem
    }
}

struct Group<'a> {
    layer: &'a Layer,
    name: &'a str,
}

/// Builds the ordered list of top-level layer properties for a process.
///
/// Only layers with `layer-properties` and `include-layer` set are listed. A
/// group takes the position of its earliest member; members move inside it.
pub fn layer_properties(process: &Process) -> Vec<LayerProperties> {
    let mut layers: IndexMap<&str, LayerProperties> = IndexMap::new();
    let mut groups = Vec::new();

    for layer in process.layers.iter().filter(|l| l.include_layer) {
        let Some(overrides) = layer.layer_properties.as_ref() else {
            continue;
        };
        let source = layer.source.as_deref().unwrap_or_default();
        if let Some(name) = layer.name.as_deref() {
            layers.insert(name, LayerProperties::from_yaml(name, source, overrides));
        } else if let Some(name) = layer.group_name.as_deref() {
            groups.push(Group { layer, name });
        }
    }

    let mut sequence: Vec<LayerProperties> = layers.values().cloned().collect();
    for group in groups {
        let mut props = LayerProperties::from_yaml(
            group.name,
            group.layer.source.as_deref().unwrap_or_default(),
            group.layer.layer_properties.as_ref().unwrap_or(&Mapping::new()),
        );
        // Members keep their `group-members` order rather than layer order.
        let mut insert_at = None::<usize>;
        for member in group.layer.group_members.iter() {
            let found = sequence
                .iter()
                .position(|p| !p.is_group() && &p.name == member);
            match found {
                Some(idx) => {
                    insert_at = Some(insert_at.map_or(idx, |i| i.min(idx)));
                    props.members.push(sequence.remove(idx));
                }
                None => tracing::warn!(
                    group = group.name,
                    "\"{member}\" layer in group \"{}\" is not included or cannot be found in layer definitions; skipping",
                    group.name
                ),
            }
        }
        let idx = insert_at.unwrap_or(sequence.len()).min(sequence.len());
        sequence.insert(idx, props);
    }
    sequence
}

/// Builds the `.lyp` document for a process.
pub fn lyp_element(process: &Process) -> Element {
    let mut root = Element::new("layer-properties");
    for props in layer_properties(process) {
        root.push(props.to_element("properties"));
    }
    root
}

/// Renders the `.lyp` document for a process.
pub fn lyp_file(process: &Process) -> String {
    lyp_element(process).to_pretty_string(2)
}

/// Reads layer names and sources back out of a `.lyp` document, descending
/// into groups.
pub fn read_sources(root: &Element) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for elem in root.descendants() {
        if elem.name != "properties" && elem.name != "group-members" {
            continue;
        }
        if elem.find("group-members").is_some() {
            continue;
        }
        if let (Some(name), Some(source)) = (elem.child_text("name"), elem.child_text("source")) {
            out.push((name.to_string(), source.to_string()));
        }
    }
    out
}
