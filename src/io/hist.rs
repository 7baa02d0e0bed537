//! Histogram files for hist-content datasets.
//!
//! Format:
//!
//! ```json
//! {
//!   "hists": {
//!     "numu_hist": {
//!       "axes": [{"variable": "Enu", "edges": [0.0, 1.0, 2.0]}],
//!       "contents": [10.0, 12.5]
//!     }
//!   }
//! }
//! ```
//!
//! `contents` is row-major with the last axis varying fastest.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistAxis {
    pub variable: String,
    pub edges: Vec<f64>,
}

impl HistAxis {
    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// Bin holding `x`: `edges[i] <= x < edges[i + 1]`, with the last upper
    /// edge included.
    pub fn find(&self, x: f64) -> Option<usize> {
        let n = self.n_bins();
        if n == 0 || !x.is_finite() {
            return None;
        }
        if x == self.edges[n] {
            return Some(n - 1);
        }
        self.edges
            .windows(2)
            .position(|w| w[0] <= x && x < w[1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist {
    pub axes: Vec<HistAxis>,
    pub contents: Vec<f64>,
}

impl Hist {
    pub fn n_bins(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(HistAxis::n_bins).product()
    }

    pub fn axis(&self, variable: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.variable == variable)
    }

    /// Flat bin of a point given one coordinate per axis.
    pub fn bin_of(&self, point: &[f64]) -> Option<usize> {
        if point.len() != self.axes.len() {
            return None;
        }
        let mut flat = 0;
        for (axis, &x) in self.axes.iter().zip(point) {
            flat = flat * axis.n_bins() + axis.find(x)?;
        }
        Some(flat)
    }

    pub fn content_at(&self, point: &[f64]) -> Option<f64> {
        self.bin_of(point).and_then(|b| self.contents.get(b).copied())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistFile {
    pub hists: BTreeMap<String, Hist>,
}

impl HistFile {
    pub fn get(&self, name: &str) -> Option<&Hist> {
        self.hists.get(name)
    }
}

pub fn read_hist_file(path: &Path) -> Result<HistFile> {
    let text = fs::read_to_string(path).map_err(|e| {
        AppError::source_error(path.display().to_string(), format!("cannot read hist file: {e}"))
    })?;
    let file: HistFile = serde_json::from_str(&text)?;
    for (name, hist) in &file.hists {
        if hist.contents.len() != hist.n_bins() {
            return Err(AppError::source_error(
                path.display().to_string(),
                format!(
                    "hist '{name}' has {} contents for {} bins",
                    hist.contents.len(),
                    hist.n_bins()
                ),
            ));
        }
    }
    Ok(file)
}

pub fn write_hist_file(path: &Path, file: &HistFile) -> Result<()> {
    let text = serde_json::to_string_pretty(file)?;
    fs::write(path, text)?;
    Ok(())
}
