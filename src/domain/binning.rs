//! Bins and bin matching.
//!
//! A bin is an ordered list of `(variable, low, high)` edges. Variable names
//! are translated to indexing-buffer positions once per dataset and cached in
//! the bin; matching then reads the buffer directly.

use crate::domain::types::{BinConfig, BinEdgeConfig};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BinEdge {
    pub variable: String,
    pub low: f64,
    pub high: f64,
    pub include_high: bool,
}

impl BinEdge {
    pub fn contains(&self, value: f64) -> bool {
        if self.low == self.high {
            return value == self.low;
        }
        if self.include_high {
            self.low <= value && value <= self.high
        } else {
            self.low <= value && value < self.high
        }
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.low + self.high)
    }
}

impl From<&BinEdgeConfig> for BinEdge {
    fn from(cfg: &BinEdgeConfig) -> Self {
        BinEdge {
            variable: cfg.variable.clone(),
            low: cfg.range[0],
            high: cfg.range[1],
            include_high: cfg.include_high,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBin {
    pub edges: Vec<BinEdge>,
    var_index_cache: Vec<usize>,
}

impl DataBin {
    pub fn new(edges: Vec<BinEdge>) -> Self {
        DataBin {
            edges,
            var_index_cache: Vec::new(),
        }
    }

    /// No edges: matches every event.
    pub fn is_degenerate(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn cache_var_indices<F>(&mut self, index_of: F) -> Result<()>
    where
        F: Fn(&str) -> Option<usize>,
    {
        self.var_index_cache = self
            .edges
            .iter()
            .map(|e| {
                index_of(&e.variable)
                    .ok_or_else(|| AppError::unresolved(&e.variable, "bin edge"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Requires `cache_var_indices` to have run against `values`' layout.
    pub fn matches(&self, values: &[f64]) -> bool {
        self.edges
            .iter()
            .zip(&self.var_index_cache)
            .all(|(edge, &idx)| values.get(idx).is_some_and(|&v| edge.contains(v)))
    }

    pub fn summary(&self) -> String {
        if self.edges.is_empty() {
            return "(all)".to_string();
        }
        let parts: Vec<String> = self
            .edges
            .iter()
            .map(|e| {
                if e.low == e.high {
                    format!("{} == {}", e.variable, e.low)
                } else {
                    format!("{} in [{}, {})", e.variable, e.low, e.high)
                }
            })
            .collect();
        parts.join(", ")
    }
}

/// Ordered bins. The first declared match wins; overlaps are not validated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Binning {
    pub bins: Vec<DataBin>,
}

impl Binning {
    /// An empty list of bins becomes one degenerate bin.
    pub fn from_config(bins: &[BinConfig]) -> Self {
        if bins.is_empty() {
            return Binning {
                bins: vec![DataBin::default()],
            };
        }
        Binning {
            bins: bins
                .iter()
                .map(|b| DataBin::new(b.iter().map(BinEdge::from).collect()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Distinct edge variables in first-use order.
    pub fn variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for bin in &self.bins {
            for edge in &bin.edges {
                if !out.contains(&edge.variable) {
                    out.push(edge.variable.clone());
                }
            }
        }
        out
    }

    pub fn cache_var_indices<F>(&mut self, index_of: F) -> Result<()>
    where
        F: Fn(&str) -> Option<usize>,
    {
        for bin in &mut self.bins {
            bin.cache_var_indices(&index_of)?;
        }
        Ok(())
    }

    pub fn find_bin(&self, values: &[f64]) -> Option<usize> {
        self.bins.iter().position(|b| b.matches(values))
    }

    /// One bin without constraints.
    pub fn is_unconditional(&self) -> bool {
        self.bins.len() == 1 && self.bins[0].is_degenerate()
    }
}
