//! The DRC YAML: per-layer design rules shipped with a technology.

use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::process::{Mask, Process};

/// Design rules for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Mask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_feature_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_spacing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_overlap: Option<IndexMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_enclosing: Option<IndexMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_exclusion: Option<IndexMap<String, f64>>,
}

/// Design rules for a technology, keyed by layer name.
///
/// Serialized as a flat mapping: `units` followed by one entry per layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrcRules {
    pub units: String,
    #[serde(flatten)]
    pub layers: IndexMap<String, LayerRules>,
}

impl DrcRules {
    /// Extracts the rules of every layer that takes part in DRC.
    pub fn from_process(process: &Process) -> Result<Self> {
        let mut layers = IndexMap::new();
        for layer in crate::lydrc::drc_layers(process) {
            let Some(name) = layer.name.as_deref() else {
                continue;
            };
            let source = layer.layer_source()?;
            layers.insert(
                name.to_string(),
                LayerRules {
                    source: Some(source.to_string()),
                    mask: layer.mask,
                    min_feature_size: layer.min_feature_size,
                    min_spacing: layer.min_spacing,
                    min_overlap: layer.min_overlap.clone().filter(|m| !m.is_empty()),
                    min_enclosing: layer.min_enclosing.clone().filter(|m| !m.is_empty()),
                    min_exclusion: layer.min_exclusion.clone().filter(|m| !m.is_empty()),
                },
            );
        }
        Ok(Self {
            units: process.units.clone(),
            layers,
        })
    }

    /// Reads and parses the DRC YAML at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Renders the DRC YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Names of layers that have a source.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|(_, rules)| rules.source.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn source(&self, layer: &str) -> Result<&str> {
        self.lookup(layer, "layer source", |r| r.source.as_deref())
    }

    pub fn mask(&self, layer: &str) -> Result<Mask> {
        self.lookup(layer, "layer mask", |r| r.mask)
    }

    pub fn min_feature_size(&self, layer: &str) -> Result<f64> {
        self.lookup(layer, "min feature size", |r| r.min_feature_size)
    }

    pub fn min_spacing(&self, layer: &str) -> Result<f64> {
        self.lookup(layer, "min spacing", |r| r.min_spacing)
    }

    /// The amount by which `layer1` must overlap `layer2`.
    pub fn min_overlap(&self, layer1: &str, layer2: &str) -> Result<f64> {
        self.pairwise(layer1, layer2, "overlap", |r| r.min_overlap.as_ref())
    }

    /// The amount by which `layer1` must enclose `layer2`.
    pub fn min_enclosing(&self, layer1: &str, layer2: &str) -> Result<f64> {
        self.pairwise(layer1, layer2, "enclosing", |r| r.min_enclosing.as_ref())
    }

    /// The separation required between two layers.
    ///
    /// Exclusion is symmetric: a rule declared on either layer applies.
    pub fn min_exclusion(&self, layer1: &str, layer2: &str) -> Result<f64> {
        let get = |a: &str, b: &str| {
            self.layers
                .get(a)
                .and_then(|r| r.min_exclusion.as_ref())
                .and_then(|m| m.get(b))
                .copied()
        };
        if let Some(value) = get(layer1, layer2).or_else(|| get(layer2, layer1)) {
            return Ok(value);
        }
        let has_any = self
            .layers
            .get(layer1)
            .and_then(|r| r.min_exclusion.as_ref())
            .is_some();
        Err(Error::Rule(if has_any {
            format!(
                "{layer2} (L2) is an invalid layer and does not have a min exclusion param with {layer1} (L1)"
            )
        } else {
            format!("{layer1} (L1) is an invalid layer that does not have a min exclusion param")
        }))
    }

    fn lookup<'s, T>(
        &'s self,
        layer: &str,
        what: &str,
        get: impl Fn(&'s LayerRules) -> Option<T>,
    ) -> Result<T> {
        if let Some(value) = self.layers.get(layer).and_then(&get) {
            return Ok(value);
        }
        let available = self
            .layers
            .iter()
            .filter(|(_, rules)| get(rules).is_some())
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::Rule(format!(
            "{layer} is not a valid layer that has a {what}. Available layers with a {what} are: {available}"
        )))
    }

    fn pairwise<'s>(
        &'s self,
        layer1: &str,
        layer2: &str,
        verb: &str,
        get: impl Fn(&'s LayerRules) -> Option<&'s IndexMap<String, f64>>,
    ) -> Result<f64> {
        let rules = |name: &str| self.layers.get(name).and_then(&get);
        if let Some(value) = rules(layer1).and_then(|m| m.get(layer2)) {
            return Ok(*value);
        }
        Err(Error::Rule(
            if rules(layer2).and_then(|m| m.get(layer1)).is_some() {
                format!(
                    "{layer1} (L1) has no min {verb} rule with {layer2} (L2). Did you mean {layer2} (L2) with {layer1} (L1)?"
                )
            } else if rules(layer1).is_some() {
                format!(
                    "{layer2} (L2) is an invalid layer and does not have a min {verb} param with {layer1} (L1)"
                )
            } else {
                format!("{layer1} (L1) is an invalid layer that does not have a min {verb} param")
            },
        ))
    }
}

impl FromStr for DrcRules {
    type Err = Error;

    /// Parses a DRC YAML. Entries other than `units` that are not mappings
    /// are ignored.
    fn from_str(s: &str) -> Result<Self> {
        let data: Mapping = serde_yaml::from_str(s)?;
        let mut rules = DrcRules::default();
        for (key, value) in data {
            let Some(key) = key.as_str() else {
                continue;
            };
            match value {
                Value::String(units) if key == "units" => rules.units = units,
                value @ Value::Mapping(_) => {
                    rules
                        .layers
                        .insert(key.to_string(), serde_yaml::from_value(value)?);
                }
                _ => {}
            }
        }
        Ok(rules)
    }
}
