//! Cross-section scripts (`.xs`) for the KLayout XSection tool.

use std::collections::HashSet;
use std::fmt::Write;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::process::{Mask, Process};
use crate::{format_float, ruby_layer_name, scalar_text};

/// Default height of the processing window. Anything above it is not drawn.
pub const DEFAULT_HEIGHT: f64 = 7.5;

/// A process step, listed in the order steps are applied within a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    GrowEntireLayer(Vec<String>),
    Mask(Mask),
    Grow(Vec<String>),
    Etch(Vec<String>),
    /// Emits the material built by the named layer.
    Output(String),
}

impl Step {
    fn is_patterned(&self) -> bool {
        matches!(self, Step::Grow(_) | Step::Etch(_))
    }
}

/// The cross-section recipe of a process.
#[derive(Debug, Clone)]
pub struct XSection {
    pub height: f64,
    /// Layer sources (`layer/datatype`) keyed by layer name, in process order.
    pub sources: IndexMap<String, String>,
    /// Steps per layer, in process order.
    pub steps: IndexMap<String, Vec<Step>>,
}

fn params(values: &[Value]) -> Vec<String> {
    values.iter().filter_map(scalar_text).collect()
}

fn with_options(
    layer: &str,
    mut args: Vec<String>,
    bias: Option<&Value>,
    sidewall_angle: Option<f64>,
) -> Result<Vec<String>> {
    let bias = bias.and_then(scalar_text).unwrap_or_else(|| "0".to_string());
    args.push(format!(":bias => {bias}"));
    if let Some(angle) = sidewall_angle {
        if args.iter().any(|a| a.contains(":mode")) {
            return Err(Error::Config(format!(
                "layer `{layer}`: mode and taper cannot be specified in the same command"
            )));
        }
        args.push(format!(":taper => {}", format_float(90.0 - angle)));
    }
    Ok(args)
}

/// Name of the Ruby variable holding the material built by a layer.
fn material_name(layer: &str) -> String {
    format!("x_{}", layer.replace(' ', "_"))
}

impl XSection {
    /// Collects the cross-section steps of every layer marked for cross sections.
    pub fn from_process(process: &Process) -> Result<Self> {
        let mut sources = IndexMap::new();
        let mut steps = IndexMap::new();
        for layer in process.layers.iter().filter(|l| l.in_xsection()) {
            let Some(name) = layer.name.as_deref() else {
                continue;
            };
            let source = layer.source_without_index().ok_or_else(|| {
                Error::Config(format!("cross-section layer `{name}` has no source"))
            })?;
            sources.insert(name.to_string(), source.to_string());

            let mut layer_steps = Vec::new();
            if let Some(args) = &layer.grow_entire_layer {
                layer_steps.push(Step::GrowEntireLayer(params(args)));
            }
            if let Some(mask) = layer.mask {
                layer_steps.push(Step::Mask(mask));
            }
            if let Some(args) = &layer.grow {
                layer_steps.push(Step::Grow(with_options(
                    name,
                    params(args),
                    layer.bias.as_ref(),
                    layer.sidewall_angle,
                )?));
            }
            if let Some(args) = &layer.etch {
                layer_steps.push(Step::Etch(with_options(
                    name,
                    params(args),
                    layer.bias.as_ref(),
                    layer.sidewall_angle,
                )?));
            }
            if let Some(output) = &layer.output {
                layer_steps.push(Step::Output(output.clone()));
            }
            steps.insert(name.to_string(), layer_steps);
        }
        Ok(Self {
            height: DEFAULT_HEIGHT,
            sources,
            steps,
        })
    }

    /// Joins step arguments, turning references to earlier layers into
    /// `:into` targets.
    fn join_args(&self, args: &[String], materials: &HashSet<String>, layer: &str) -> String {
        let mut out = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push(',');
                if self.sources.contains_key(arg) {
                    let material = material_name(arg);
                    if materials.contains(&material) {
                        let _ = write!(out, " :into => {material}");
                    } else {
                        tracing::error!(layer, "layer object `{material}` not available");
                    }
                    continue;
                }
            }
            out.push_str(arg);
        }
        out
    }

    /// Generates the `.xs` script.
    pub fn script(&self) -> String {
        let mut out = String::new();
        // Writing to a `String` cannot fail.
        let _ = writeln!(
            out,
            "## = Cross-Section\n\
             #  ---\n\
             #  Creates a cross section view based on a layout\n\
             #  XSection Tool: https://klayoutmatthias.github.io/xsection/DocIntro\n\
             \n\
             # Configure processing window\n\
             height({}) # Anything above this will not appear in cross section\n",
            format_float(self.height)
        );
        for (name, source) in self.sources.iter() {
            let _ = writeln!(out, "{} = layer(\"{source}\")", ruby_layer_name(name));
        }
        out.push_str("\noutput(\"0/0\", bulk)\n");

        let mut materials = HashSet::new();
        for (name, steps) in self.steps.iter() {
            let layer_var = ruby_layer_name(name);
            let material = material_name(name);
            let mut mask_expr = layer_var.clone();
            for (i, step) in steps.iter().enumerate() {
                match step {
                    Step::Mask(mask) => {
                        // Polarity depends on whether the masked step adds or removes material.
                        let next = steps[i + 1..].iter().find(|s| s.is_patterned());
                        let inverted = match (mask, next) {
                            (Mask::Negative, Some(Step::Etch(_))) => true,
                            (Mask::Positive, Some(Step::Grow(_))) => true,
                            _ => false,
                        };
                        mask_expr = if inverted {
                            format!("{layer_var}.inverted")
                        } else {
                            layer_var.clone()
                        };
                    }
                    Step::GrowEntireLayer(args) => {
                        let expr = format!("grow({})", args.join(","));
                        assign(&mut out, &mut materials, &material, expr);
                    }
                    Step::Grow(args) => {
                        let expr = format!(
                            "mask({mask_expr}).grow({})",
                            self.join_args(args, &materials, name)
                        );
                        assign(&mut out, &mut materials, &material, expr);
                    }
                    Step::Etch(args) => {
                        let _ = writeln!(
                            out,
                            "mask({mask_expr}).etch({})",
                            self.join_args(args, &materials, name)
                        );
                    }
                    Step::Output(target) => {
                        let target_material = material_name(target);
                        match self.sources.get(target) {
                            Some(source) if materials.contains(&target_material) => {
                                let _ = writeln!(out, "output(\"{source}\", {target_material})\n");
                            }
                            _ => tracing::error!(
                                layer = name.as_str(),
                                "layer object `{target_material}` not available for output"
                            ),
                        }
                    }
                }
            }
        }
        out
    }
}

/// Assigns `expr` to a material, merging with what the layer already built.
fn assign(out: &mut String, materials: &mut HashSet<String>, material: &str, expr: String) {
    if materials.contains(material) {
        let _ = writeln!(out, "{material} = {material}.or({expr})");
    } else {
        let _ = writeln!(out, "{material} = {expr}");
        materials.insert(material.to_string());
    }
}
