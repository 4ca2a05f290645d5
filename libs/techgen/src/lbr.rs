//! Lumerical layer builder process files (`.lbr`).

use std::path::Path;

use indexmap::IndexMap;
use pdkxml::Element;

use crate::error::{Error, Result};
use crate::process::Process;

/// Name given to the port layer in the layer builder.
pub const PORTS: &str = "Ports";

const PIN_REC: &str = "PinRec";

/// Which process layers play the waveguide and port roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMapping {
    pub waveguide: String,
    pub ports: String,
}

impl LayerMapping {
    pub fn new(waveguide: impl Into<String>, ports: impl Into<String>) -> Self {
        Self {
            waveguide: waveguide.into(),
            ports: ports.into(),
        }
    }

    /// Picks the first Lumerical layer other than `PinRec` as the waveguide
    /// layer and `PinRec` as the port layer.
    pub fn infer(process: &Process) -> Option<Self> {
        let waveguide = process
            .layers
            .iter()
            .filter(|l| l.lumerical_layer)
            .filter_map(|l| l.name.as_deref())
            .find(|name| *name != PIN_REC)?;
        Some(Self::new(waveguide, PIN_REC))
    }
}

/// One layer of the layer builder stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackLayer {
    pub name: String,
    /// Source as `layer:datatype`.
    pub source: String,
    pub material: String,
    /// Thicknesses in meters from `grow-entire-layer`, `grow` and `etch`.
    pub thicknesses: [f64; 3],
    pub sidewall_angle: f64,
}

impl StackLayer {
    /// The first positive thickness in priority order, or the etch depth.
    pub fn thickness(&self) -> f64 {
        self.thicknesses
            .iter()
            .copied()
            .find(|t| *t > 0.)
            .unwrap_or(self.thicknesses[2])
    }
}

/// A Lumerical layer builder stack.
#[derive(Debug, Clone)]
pub struct LayerStack {
    pub process_name: String,
    pub layers: Vec<StackLayer>,
    pub mapping: LayerMapping,
}

impl LayerStack {
    /// Collects every layer flagged `lumerical-layer`.
    pub fn from_process(process: &Process, mapping: LayerMapping) -> Result<Self> {
        let scale = process.meters_per_unit()?;
        let first = |values: &Option<Vec<serde_yaml::Value>>| {
            values
                .as_ref()
                .and_then(|v| v.first())
                .and_then(serde_yaml::Value::as_f64)
                .unwrap_or(0.)
                * scale
        };
        let layers = process
            .layers
            .iter()
            .filter(|l| l.lumerical_layer)
            .map(|l| StackLayer {
                name: l.name.clone().unwrap_or_default(),
                source: l.source_without_index().unwrap_or_default().replace('/', ":"),
                material: l.material.clone().unwrap_or_default(),
                thicknesses: [first(&l.grow_entire_layer), first(&l.grow), first(&l.etch)],
                sidewall_angle: l.sidewall_angle.unwrap_or(90.),
            })
            .collect();
        Ok(Self {
            process_name: process.tech_name().to_string(),
            layers,
            mapping,
        })
    }

    fn is_port_layer(&self, layer: &StackLayer) -> bool {
        layer.name == self.mapping.ports || layer.name == PIN_REC
    }

    pub fn to_element(&self) -> Result<Element> {
        let mut root = Element::new("layer_builder");
        root.text_child("process_name", &self.process_name);
        let layers = root.child("layers");
        for layer in self.layers.iter() {
            let (name, enabled, thickness) = if self.is_port_layer(layer) {
                // Ports take the waveguide thickness so they span the core.
                let waveguide = self
                    .layers
                    .iter()
                    .find(|l| l.name == self.mapping.waveguide)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "waveguide layer `{}` is not a Lumerical layer",
                            self.mapping.waveguide
                        ))
                    })?;
                (PORTS, 0, waveguide.thickness())
            } else {
                (layer.name.as_str(), 1, layer.thickness())
            };
            layers.push(
                Element::new("layer")
                    .with_attr("enabled", enabled)
                    .with_attr("thickness", format!("{thickness:e}"))
                    .with_attr("pattern_alpha", "0.8")
                    .with_attr("material", "")
                    .with_attr("sidewall_angle", crate::format_float(layer.sidewall_angle))
                    .with_attr("start_position_auto", "0")
                    .with_attr("process", "Grow")
                    .with_attr("background_alpha", "0.3")
                    .with_attr("start_position", "0")
                    .with_attr("pattern_negative", "0")
                    .with_attr("pattern_material", &layer.material)
                    .with_attr("layer_name", &layer.source)
                    .with_attr("pattern_material_index", "0")
                    .with_attr("pattern_growth_delta", "0")
                    .with_attr("material_index", "0")
                    .with_attr("name", name),
            );
        }
        Ok(root)
    }

    /// Renders the `.lbr` file. Lumerical expects no XML declaration.
    pub fn to_xml(&self) -> Result<String> {
        Ok(self.to_element()?.to_pretty_fragment(2))
    }
}

/// Reads layer thicknesses (in meters) back out of a `.lbr` file, keyed by
/// layer name.
pub fn read_thicknesses(path: impl AsRef<Path>) -> Result<IndexMap<String, f64>> {
    let root = pdkxml::parse_file(path)?;
    let mut out = IndexMap::new();
    let Some(layers) = root.find("layers") else {
        return Ok(out);
    };
    for layer in layers.find_all("layer") {
        let (Some(name), Some(thickness)) = (layer.attr("name"), layer.attr("thickness")) else {
            continue;
        };
        let thickness = thickness.parse().map_err(|_| {
            Error::Config(format!("layer `{name}` has invalid thickness `{thickness}`"))
        })?;
        out.insert(name.to_string(), thickness);
    }
    Ok(out)
}
