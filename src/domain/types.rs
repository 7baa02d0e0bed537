//! Configuration types.
//!
//! These mirror the JSON configuration document one-to-one and are kept
//! serializable so a resolved configuration can be written back out (debug
//! bundles, round trips in tests).

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Placeholder replaced by the configured toy index.
pub const TOY_PLACEHOLDER: &str = "<I_TOY>";

/// Which event container of a sample a dataset fills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContainerTarget {
    /// Simulated ("truth") events. Only these get dial cache entries.
    #[default]
    Mc,
    /// Observed events.
    Data,
}

/// Correction kinds the dial factory can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialKind {
    Normalization,
    Graph,
    Spline,
}

/// A formula given either as one string or as a list of fragments.
///
/// Lists are joined with `&&` when used as a selection and with `*` when used
/// as a weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormulaSpec {
    One(String),
    Many(Vec<String>),
}

impl FormulaSpec {
    pub fn as_selection(&self) -> Option<String> {
        self.joined("&&")
    }

    pub fn as_weight(&self) -> Option<String> {
        self.joined("*")
    }

    fn joined(&self, op: &str) -> Option<String> {
        match self {
            FormulaSpec::One(s) if s.trim().is_empty() => None,
            FormulaSpec::One(s) => Some(s.trim().to_string()),
            FormulaSpec::Many(parts) => {
                let parts: Vec<String> = parts
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .map(|p| format!("({p})"))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(&format!(" {op} ")))
                }
            }
        }
    }
}

/// Replace `<I_TOY>` by the toy index. A placeholder with no index configured
/// is an error.
pub fn substitute_toy(text: &str, toy_index: Option<usize>) -> Result<String> {
    if !text.contains(TOY_PLACEHOLDER) {
        return Ok(text.to_string());
    }
    match toy_index {
        Some(i) => Ok(text.replace(TOY_PLACEHOLDER, &i.to_string())),
        None => Err(AppError::config(format!(
            "'{text}' uses {TOY_PLACEHOLDER} but no toy_index is configured"
        ))),
    }
}

/// One variable constraint of a bin: `range[0] <= value < range[1]`.
///
/// `range[0] == range[1]` matches that exact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinEdgeConfig {
    pub variable: String,
    pub range: [f64; 2],
    #[serde(default)]
    pub include_high: bool,
}

/// A bin is a list of edges; an empty list always matches.
pub type BinConfig = Vec<BinEdgeConfig>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Datasets this sample takes events from. Empty means all.
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub selection: Option<FormulaSpec>,
    /// Formula over indexing variables, checked after transforms.
    #[serde(default)]
    pub var_selection: Option<FormulaSpec>,
    #[serde(default)]
    pub binning: Vec<BinConfig>,
}

/// Dial definition for one bin of a binned collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialSpec {
    pub kind: DialKind,
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
}

/// Per-event dial source: an object field holding one correction per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerEventDialConfig {
    pub field: String,
    pub kind: DialKind,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialCollectionConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub datasets: Vec<String>,
    /// Parameter whose value feeds the dial responses.
    pub parameter: String,
    #[serde(default)]
    pub apply_condition: Option<FormulaSpec>,
    #[serde(default)]
    pub binning: Option<Vec<BinConfig>>,
    /// One dial per bin. Empty means a normalization dial in every bin.
    #[serde(default)]
    pub bin_dials: Vec<DialSpec>,
    #[serde(default)]
    pub per_event: Option<PerEventDialConfig>,
    #[serde(default)]
    pub allow_extrapolation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub output: String,
    pub formula: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Histogram-content entry for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistSampleConfig {
    pub sample: String,
    pub hist: String,
    /// Bin variable feeding each histogram axis, in axis order. Empty means
    /// the axes' own variable names.
    #[serde(default)]
    pub axis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistContentConfig {
    pub file: PathBuf,
    pub samples: Vec<HistSampleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub target: ContainerTarget,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub selection: Option<FormulaSpec>,
    #[serde(default)]
    pub nominal_weight: Option<FormulaSpec>,
    /// Element index into array-valued per-event dial objects.
    #[serde(default)]
    pub dial_index: Option<String>,
    /// Field-name synonyms: requested name -> source expression.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub storage_vars: Vec<String>,
    #[serde(default = "default_norm")]
    pub norm: f64,
    #[serde(default)]
    pub from_hist_content: Option<HistContentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(default = "default_norm")]
    pub nominal: f64,
}

/// Top-level load configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Worker threads; 0 uses rayon's default.
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub toy_index: Option<usize>,
    /// Variables stored on every event, in addition to per-dataset requests.
    #[serde(default)]
    pub storage_vars: Vec<String>,
    #[serde(default)]
    pub show_selected_counts: bool,
    pub samples: Vec<SampleConfig>,
    #[serde(default)]
    pub dial_collections: Vec<DialCollectionConfig>,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
    pub datasets: Vec<DatasetConfig>,
}

fn default_true() -> bool {
    true
}

fn default_norm() -> f64 {
    1.0
}
