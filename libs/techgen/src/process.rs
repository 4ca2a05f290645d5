//! The Process YAML: a hand-authored description of a fabrication process.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// A parsed Process YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Process {
    /// Overrides for the KLayout technology descriptor.
    #[serde(default)]
    pub technology: Mapping,
    /// Length units used by every dimension in the file.
    #[serde(default = "default_units")]
    pub units: String,
    /// Layers, in stacking and display order.
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Chip outlines.
    #[serde(default)]
    pub chip: Option<Chip>,
}

fn default_units() -> String {
    "um".to_string()
}

fn default_true() -> bool {
    true
}

impl Process {
    /// Reads and parses the Process YAML at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        contents.parse()
    }

    /// The technology name, or an empty string if none is given.
    pub fn tech_name(&self) -> &str {
        self.technology
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Returns the named layer.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name.as_deref() == Some(name))
    }

    /// Scale factor converting process units to meters.
    pub fn meters_per_unit(&self) -> Result<f64> {
        match self.units.as_str() {
            "um" => Ok(1e-6),
            "nm" => Ok(1e-9),
            "mm" => Ok(1e-3),
            "m" => Ok(1.),
            other => Err(Error::Config(format!("unsupported units `{other}`"))),
        }
    }
}

impl FromStr for Process {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }
}

/// Resist polarity of a mask step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mask {
    /// Exposed regions are removed.
    Positive,
    /// Exposed regions remain.
    Negative,
}

/// One entry of the `layers` list.
///
/// An entry is either a drawn layer (it has a `name`) or a display group
/// (it has a `group-name` and `group-members`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Layer {
    pub name: Option<String>,
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_members: Vec<String>,
    /// Raw source string, such as `1/0@1`. Groups may use wildcards.
    pub source: Option<String>,
    pub layer_properties: Option<Mapping>,
    #[serde(default = "default_true")]
    pub include_layer: bool,
    /// Whether the layer appears in cross sections.
    pub xsection_layer: Option<bool>,
    #[serde(default)]
    pub lumerical_layer: bool,
    pub is_device_layer: Option<bool>,
    pub material: Option<String>,

    pub min_feature_size: Option<f64>,
    pub min_spacing: Option<f64>,
    pub min_exclusion: Option<IndexMap<String, f64>>,
    pub min_overlap: Option<IndexMap<String, f64>>,
    pub min_enclosing: Option<IndexMap<String, f64>>,

    pub mask: Option<Mask>,
    pub grow_entire_layer: Option<Vec<Value>>,
    pub grow: Option<Vec<Value>>,
    pub etch: Option<Vec<Value>>,
    pub output: Option<String>,
    pub bias: Option<Value>,
    pub sidewall_angle: Option<f64>,
}

impl Layer {
    /// Parses this layer's source.
    pub fn layer_source(&self) -> Result<LayerSource> {
        match &self.source {
            Some(source) => source.parse(),
            None => Err(Error::Config(format!(
                "layer `{}` has no source",
                self.name.as_deref().unwrap_or_default()
            ))),
        }
    }

    /// The source with any `@index` suffix removed.
    pub fn source_without_index(&self) -> Option<&str> {
        self.source
            .as_deref()
            .map(|s| s.split('@').next().unwrap_or(s))
    }

    /// Whether any DRC rule applies to this layer.
    pub fn has_drc_rules(&self) -> bool {
        self.is_device_layer.is_some()
            || self.min_feature_size.is_some()
            || self.min_spacing.is_some()
            || self.min_exclusion.is_some()
            || self.min_overlap.is_some()
            || self.min_enclosing.is_some()
    }

    /// Whether this layer takes part in cross-section generation.
    pub fn in_xsection(&self) -> bool {
        self.xsection_layer.unwrap_or(false)
    }
}

/// A GDS layer/datatype pair, optionally tagged with a layout index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerSource {
    pub layer: u16,
    pub datatype: u16,
    pub index: Option<u32>,
}

impl LayerSource {
    pub fn new(layer: u16, datatype: u16) -> Self {
        Self {
            layer,
            datatype,
            index: None,
        }
    }

    /// The `(layer, datatype)` pair.
    pub fn pair(&self) -> (u16, u16) {
        (self.layer, self.datatype)
    }
}

impl FromStr for LayerSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSource(s.to_string());
        let (spec, index) = match s.trim().split_once('@') {
            Some((spec, index)) => (spec, Some(index.trim().parse().map_err(|_| invalid())?)),
            None => (s.trim(), None),
        };
        let (layer, datatype) = spec.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            layer: layer.trim().parse().map_err(|_| invalid())?,
            datatype: datatype.trim().parse().map_err(|_| invalid())?,
            index,
        })
    }
}

/// Formats as `layer/datatype`, the form used by DRC and cross-section scripts.
impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

/// Chip outline definitions, keyed by chip type.
#[derive(Debug, Clone, Deserialize)]
pub struct Chip {
    /// The chip type in use.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub variants: IndexMap<String, ChipVariant>,
}

impl Chip {
    /// The design area of the selected chip type.
    pub fn design_area(&self) -> Option<DesignArea> {
        self.variants.get(&self.kind).and_then(|v| v.design_area)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChipVariant {
    pub design_area: Option<DesignArea>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DesignArea {
    pub dx: f64,
    pub dy: f64,
}
