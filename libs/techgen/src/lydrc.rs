//! KLayout macros and the generated DRC rule deck (`.lydrc`).

use std::fmt::Write;

use indexmap::IndexMap;
use pdkxml::Element;

use crate::error::Result;
use crate::format_float;
use crate::process::{Layer, Process};
use crate::ruby_layer_name;

/// Tolerance subtracted from every rule value. Designs usually aim for exactly
/// the minimum feature, which produces false errors along curves.
pub const TOLERANCE: f64 = 1e-3;

/// Edges meeting at angles above this limit are not checked against each other.
pub const ANGLE_LIMIT: u32 = 80;

const FLOOR_PLAN: &str = "FloorPlan";
const DEV_REC: &str = "DevRec";

/// Metadata and body of a KLayout macro (`.lym`/`.lydrc`).
///
/// Every field is written, in this order; unset fields become empty elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroConfig {
    pub description: Option<String>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub prolog: Option<String>,
    pub epilog: Option<String>,
    pub doc: Option<String>,
    pub autorun: bool,
    pub autorun_early: bool,
    pub shortcut: Option<String>,
    pub show_in_menu: bool,
    pub group_name: Option<String>,
    pub menu_path: Option<String>,
    pub interpreter: Option<String>,
    pub dsl_interpreter_name: Option<String>,
    /// The macro source code.
    pub text: String,
}

impl MacroConfig {
    /// Defaults for a technology's DRC deck.
    pub fn drc(tech_name: &str, text: impl Into<String>) -> Self {
        Self {
            description: Some(format!("KLayout Manufacturing DRC - {tech_name}")),
            category: Some("drc".to_string()),
            shortcut: Some("D".to_string()),
            show_in_menu: true,
            group_name: Some("drc_scripts".to_string()),
            menu_path: Some("siepic_menu.verification.begin".to_string()),
            interpreter: Some("dsl".to_string()),
            dsl_interpreter_name: Some("drc-dsl-xml".to_string()),
            text: text.into(),
            ..Default::default()
        }
    }

    /// A Ruby keybinding that runs a cross-section script stored beside the
    /// macro folder.
    pub fn xsection_keybinding(tech_name: &str, xs_file_name: &str) -> Self {
        let text = format!(
            "# Key Binding for XSection\n\
             include RBA\n\
             fn = File.join(File.expand_path(File.dirname(__FILE__)), \"../{xs_file_name}\")\n\
             print(fn)\n\
             $xsection_processing_environment.run_script(fn)"
        );
        Self {
            description: Some(format!("XSection - {tech_name} Process")),
            shortcut: Some("Shift+X".to_string()),
            show_in_menu: true,
            menu_path: Some("siepic_menu.layout.begin".to_string()),
            interpreter: Some("ruby".to_string()),
            text,
            ..Default::default()
        }
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("klayout-macro");
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let fields = [
            ("description", opt(&self.description)),
            ("version", opt(&self.version)),
            ("category", opt(&self.category)),
            ("prolog", opt(&self.prolog)),
            ("epilog", opt(&self.epilog)),
            ("doc", opt(&self.doc)),
            ("autorun", self.autorun.to_string()),
            ("autorun-early", self.autorun_early.to_string()),
            ("shortcut", opt(&self.shortcut)),
            ("show-in-menu", self.show_in_menu.to_string()),
            ("group-name", opt(&self.group_name)),
            ("menu-path", opt(&self.menu_path)),
            ("interpreter", opt(&self.interpreter)),
            ("dsl-interpreter-name", opt(&self.dsl_interpreter_name)),
            ("text", self.text.clone()),
        ];
        for (tag, value) in fields {
            root.text_child(tag, value);
        }
        root
    }

    /// Renders the macro file.
    pub fn to_xml(&self) -> String {
        self.to_element().to_pretty_string(2)
    }
}

/// Layers that take part in DRC: those with a rule or device flag, plus the
/// floor plan and device recognition layers.
pub fn drc_layers(process: &Process) -> impl Iterator<Item = &Layer> {
    process.layers.iter().filter(|layer| {
        let Some(name) = layer.name.as_deref() else {
            return false;
        };
        layer.include_layer && (layer.has_drc_rules() || name == FLOOR_PLAN || name == DEV_REC)
    })
}

/// A DRC rule deck in KLayout's Ruby DRC language.
#[derive(Debug, Clone, Default)]
pub struct DrcDeck {
    pub tech_name: String,
    pub units: String,
    /// Input layers and their `(layer, datatype)` pairs, in process order.
    pub inputs: IndexMap<String, (u16, u16)>,
    pub devices: Vec<String>,
    pub min_feature_sizes: IndexMap<String, f64>,
    pub min_spacings: IndexMap<String, f64>,
    pub min_exclusions: IndexMap<String, IndexMap<String, f64>>,
    pub min_overlaps: IndexMap<String, IndexMap<String, f64>>,
    pub min_enclosings: IndexMap<String, IndexMap<String, f64>>,
}

impl DrcDeck {
    /// Collects the rules of a process.
    pub fn from_process(process: &Process) -> Result<Self> {
        let mut deck = DrcDeck {
            tech_name: process.tech_name().to_string(),
            units: process.units.clone(),
            ..Default::default()
        };
        for layer in drc_layers(process) {
            let Some(name) = layer.name.clone() else {
                continue;
            };
            deck.inputs
                .insert(name.clone(), layer.layer_source()?.pair());
            if layer.is_device_layer == Some(true) {
                deck.devices.push(name.clone());
            }
            if let Some(v) = layer.min_feature_size {
                deck.min_feature_sizes.insert(name.clone(), v);
            }
            if let Some(v) = layer.min_spacing {
                deck.min_spacings.insert(name.clone(), v);
            }
            if let Some(v) = &layer.min_exclusion {
                deck.min_exclusions.insert(name.clone(), v.clone());
            }
            if let Some(v) = &layer.min_overlap {
                deck.min_overlaps.insert(name.clone(), v.clone());
            }
            if let Some(v) = &layer.min_enclosing {
                deck.min_enclosings.insert(name, v.clone());
            }
        }
        Ok(deck)
    }

    /// Generates the rule deck source.
    pub fn script(&self) -> String {
        let mut out = String::new();
        let lines = [
            "## = DRC Implementation",
            "#  ---",
            "#  Implements DRC based on a YAML DRC file",
            "",
            "# Run DRC",
            "# Specify a source GDS file and an output results database file to run the DRC in command line",
            "source($in_gdsfile)",
            "report(\"DRC\", $out_drc_results)",
            "",
        ];
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }

        // Writing to a `String` cannot fail.
        if !self.inputs.is_empty() {
            out.push_str("# Get layers from layout\n");
            for (name, (layer, datatype)) in self.inputs.iter() {
                let _ = writeln!(out, "{} = input({layer},{datatype})", ruby_layer_name(name));
            }
        }

        out.push_str("\n#################\n# non-physical checks\n#################\n\n");
        if self.inputs.contains_key(DEV_REC) {
            out.push_str("# Check device overlaps (functional check)\n");
            let _ = writeln!(out, "overlaps = {}.merged(2)", ruby_layer_name(DEV_REC));
            out.push_str("output(overlaps, \"Devices\",\"Devices cannot be overlapping\")\n\n");
        }
        if self.inputs.contains_key(FLOOR_PLAN) && !self.devices.is_empty() {
            out.push_str("# Make sure devices are within floor plan layer region\n");
            for name in self.devices.iter() {
                let _ = writeln!(
                    out,
                    "{}.outside({}).output(\"Boundary\",\"{name} devices are out of boundary\")",
                    ruby_layer_name(name),
                    ruby_layer_name(FLOOR_PLAN),
                );
            }
        }

        out.push_str("\n#################\n# physical checks\n#################\n\n");
        let _ = writeln!(out, "tol = {TOLERANCE}\n");

        let units = &self.units;
        if !self.min_feature_sizes.is_empty() {
            out.push_str("# Perform min feature size check\n");
            for (name, v) in self.min_feature_sizes.iter() {
                let v = format_float(*v);
                let _ = writeln!(
                    out,
                    "{}.width({v}-tol,angle_limit({ANGLE_LIMIT}), projection).output(\"{name} width\", \"{name} minimum feature size violation; min {v} {units}\")",
                    ruby_layer_name(name),
                );
            }
        }
        out.push('\n');

        if !self.min_spacings.is_empty() {
            out.push_str("# Perform min spacing check\n");
            for (name, v) in self.min_spacings.iter() {
                let v = format_float(*v);
                let _ = writeln!(
                    out,
                    "{}.space({v}-tol,angle_limit({ANGLE_LIMIT}), projection).output(\"{name} space\", \"{name} minimum space violation; min {v} {units}\")",
                    ruby_layer_name(name),
                );
            }
        }
        out.push('\n');

        self.pairwise_checks(&mut out, "exclusion", "separation", &self.min_exclusions);
        self.pairwise_checks(&mut out, "overlap", "overlap", &self.min_overlaps);
        self.pairwise_checks(&mut out, "enclosing", "enclosing", &self.min_enclosings);
        out
    }

    fn pairwise_checks(
        &self,
        out: &mut String,
        rule: &str,
        method: &str,
        rules: &IndexMap<String, IndexMap<String, f64>>,
    ) {
        let label = match method {
            "enclosing" => "enclosure",
            other => other,
        };
        if !rules.is_empty() {
            let _ = writeln!(out, "# Perform min {rule} check");
            for (layer1, others) in rules.iter() {
                for (layer2, v) in others.iter() {
                    let v = format_float(*v);
                    let _ = writeln!(
                        out,
                        "{}.{method}({}, {v}-tol, projection).output(\"{layer1}-{layer2} {label}\",\"{layer1}-{layer2} minimum {label} violation; min {v} {}\")",
                        ruby_layer_name(layer1),
                        ruby_layer_name(layer2),
                        self.units,
                    );
                }
            }
        }
        out.push('\n');
    }

    /// Wraps the deck in a KLayout DRC macro.
    pub fn to_macro(&self) -> MacroConfig {
        MacroConfig::drc(&self.tech_name, self.script())
    }
}
