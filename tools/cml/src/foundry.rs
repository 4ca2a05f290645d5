//! The foundry XML file describing a CML compilation.

use std::path::{Path, PathBuf};

use pdkxml::Element;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Indentation of the foundry XML file.
pub const INDENT: usize = 4;

/// A container element's sub-element and the script that selects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubElement {
    pub name: String,
    pub selection_code: String,
}

/// One compact model in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEntry {
    pub name: String,
    pub photonic_model: String,
    /// Extension of the parameter file, including the dot.
    pub parameter_extension: String,
    #[serde(default)]
    pub remove_sub_elements: Option<bool>,
    #[serde(default)]
    pub sub_elements: Vec<SubElement>,
}

impl ElementEntry {
    /// A model whose parameters live in `source/{name}/{name}.lsf`.
    pub fn new(name: impl Into<String>, photonic_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            photonic_model: photonic_model.into(),
            parameter_extension: ".lsf".to_string(),
            remove_sub_elements: None,
            sub_elements: Vec::new(),
        }
    }

    fn to_element(&self) -> Element {
        let name = &self.name;
        let mut el = Element::new("element");
        el.text_child("name", name);
        el.text_child("photonic_model", &self.photonic_model);
        el.text_child("svg_filename", format!("source/{name}/{name}.svg"));
        el.text_child(
            "parameter_filename",
            format!("source/{name}/{name}{}", self.parameter_extension),
        );
        el.text_child("datafile_directory", format!("source/{name}"));
        if !self.sub_elements.is_empty() {
            if let Some(remove) = self.remove_sub_elements {
                el.text_child("remove_sub_elements", if remove { "True" } else { "False" });
            }
            let list = el.child("sub_element_list");
            for sub in self.sub_elements.iter() {
                let child = list.child("sub_element");
                child.text_child("name", &sub.name);
                child.text_child("selection_code", &sub.selection_code);
            }
        }
        el
    }

    fn from_element(el: &Element) -> Result<Self> {
        let text = |tag: &str| {
            el.child_text(tag)
                .map(str::to_string)
                .ok_or_else(|| Error::Foundry(format!("element is missing `{tag}`")))
        };
        let name = text("name")?;
        let parameter_extension = el
            .child_text("parameter_filename")
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| format!(".{ext}"))
            .unwrap_or_else(|| ".lsf".to_string());
        let sub_elements = match el.find("sub_element_list") {
            Some(list) => list
                .find_all("sub_element")
                .map(|sub| {
                    Ok(SubElement {
                        name: sub.child_text("name").unwrap_or_default().to_string(),
                        selection_code: sub
                            .child_text("selection_code")
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            photonic_model: text("photonic_model")?,
            name,
            parameter_extension,
            remove_sub_elements: el
                .child_text("remove_sub_elements")
                .map(|v| v.eq_ignore_ascii_case("true")),
            sub_elements,
        })
    }
}

/// A statistical process variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotGroup {
    pub name: String,
    /// `normal`, `uniform` or `pearson4`.
    pub distribution: String,
    pub sigma: f64,
    /// Only written for `pearson4` distributions.
    pub gamma1: Option<f64>,
    /// Only written for `pearson4` distributions.
    pub beta2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalData {
    /// `open`, `hidden` or `protected`.
    pub parameter_status: String,
    /// `mean` or `mode`.
    pub nominal_value_type: String,
    pub lotgroups: Vec<LotGroup>,
    pub corners: Vec<String>,
}

impl Default for StatisticalData {
    fn default() -> Self {
        Self {
            parameter_status: "open".to_string(),
            nominal_value_type: "mode".to_string(),
            lotgroups: Vec::new(),
            corners: Vec::new(),
        }
    }
}

/// The `foundry_data` document of a CML compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundryXml {
    pub foundry_name: String,
    pub version_suffix: String,
    pub elements: Vec<ElementEntry>,
    pub statistical_data: StatisticalData,
}

impl FoundryXml {
    /// An empty library versioned with today's date.
    pub fn new(foundry_name: impl Into<String>) -> Self {
        Self {
            foundry_name: foundry_name.into(),
            version_suffix: chrono::Local::now().format("%Y-%m-%d").to_string(),
            elements: Vec::new(),
            statistical_data: StatisticalData::default(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<ElementEntry>) -> Self {
        self.elements = elements;
        self
    }

    /// The conventional location of the foundry XML in a compilation directory.
    pub fn path_in(dir: &Path, foundry_name: &str) -> PathBuf {
        dir.join(format!("{foundry_name}.xml"))
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("foundry_data");
        root.text_child("foundry_name", &self.foundry_name);
        root.text_child("version_suffix", &self.version_suffix);
        let list = root.child("element_list");
        for element in self.elements.iter() {
            list.push(element.to_element());
        }

        let stats = &self.statistical_data;
        let stat = root.child("statistical_data");
        stat.text_child("statistical_parameter_status", &stats.parameter_status);
        stat.text_child("nominal_value_type", &stats.nominal_value_type);
        if !stats.lotgroups.is_empty() {
            let list = stat.child("LOTGROUP_list");
            for lg in stats.lotgroups.iter() {
                let group = list.child("LOTGROUP");
                group.text_child("name", &lg.name);
                group.text_child("distribution", &lg.distribution);
                group.text_child("sigma", lg.sigma);
                if lg.distribution == "pearson4" {
                    group.text_child("gamma1", lg.gamma1.unwrap_or_default());
                    group.text_child("beta2", lg.beta2.unwrap_or_default());
                }
            }
        }
        if !stats.corners.is_empty() {
            let list = stat.child("corner_list");
            for corner in stats.corners.iter() {
                list.text_child("corner", corner);
            }
        }
        root
    }

    pub fn to_xml(&self) -> String {
        self.to_element().to_pretty_string(INDENT)
    }

    /// Writes `{foundry_name}.xml` into `dir`, returning its path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(dir, &self.foundry_name);
        std::fs::write(&path, self.to_xml())?;
        tracing::info!(path = %path.display(), "wrote foundry XML");
        Ok(path)
    }

    pub fn from_element(root: &Element) -> Result<Self> {
        if root.name != "foundry_data" {
            return Err(Error::Foundry(format!(
                "expected `foundry_data` root, found `{}`",
                root.name
            )));
        }
        let text = |el: &Element, tag: &str| el.child_text(tag).unwrap_or_default().to_string();
        let elements = match root.find("element_list") {
            Some(list) => list
                .find_all("element")
                .map(ElementEntry::from_element)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        let mut statistical_data = StatisticalData::default();
        if let Some(stat) = root.find("statistical_data") {
            if let Some(status) = stat.child_text("statistical_parameter_status") {
                statistical_data.parameter_status = status.to_string();
            }
            if let Some(kind) = stat.child_text("nominal_value_type") {
                statistical_data.nominal_value_type = kind.to_string();
            }
            let number = |el: &Element, tag: &str| el.child_text(tag).and_then(|v| v.parse().ok());
            if let Some(list) = stat.find("LOTGROUP_list") {
                statistical_data.lotgroups = list
                    .find_all("LOTGROUP")
                    .map(|lg| LotGroup {
                        name: text(lg, "name"),
                        distribution: text(lg, "distribution"),
                        sigma: number(lg, "sigma").unwrap_or_default(),
                        gamma1: number(lg, "gamma1"),
                        beta2: number(lg, "beta2"),
                    })
                    .collect();
            }
            if let Some(list) = stat.find("corner_list") {
                statistical_data.corners = list
                    .find_all("corner")
                    .filter_map(|c| c.text.clone())
                    .collect();
            }
        }
        Ok(Self {
            foundry_name: text(root, "foundry_name"),
            version_suffix: text(root, "version_suffix"),
            elements,
            statistical_data,
        })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_element(&pdkxml::parse_file(path)?)
    }
}

/// Number of entries in the `element_list` of a foundry XML file.
pub fn element_count(path: impl AsRef<Path>) -> Result<usize> {
    let root = pdkxml::parse_file(path)?;
    Ok(root
        .find("element_list")
        .map(|list| list.children.len())
        .unwrap_or(0))
}
