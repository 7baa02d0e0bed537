//! Dials (weight corrections) and dial collections.

use crate::domain::binning::Binning;
use crate::domain::types::{DialCollectionConfig, DialKind, DialSpec, substitute_toy};
use crate::error::{AppError, Result};
use crate::math::{eval_segment, natural_second_derivatives, segment_slope};
use crate::source::RecordObject;

/// Piecewise-linear response through a set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    xs: Vec<f64>,
    ys: Vec<f64>,
    extrapolate: bool,
}

/// Natural cubic spline response.
#[derive(Debug, Clone, PartialEq)]
pub struct Spline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    m: Vec<f64>,
    extrapolate: bool,
}

/// A concrete correction: maps a parameter value to a weight factor.
#[derive(Debug, Clone, PartialEq)]
pub enum Dial {
    /// Response equals the parameter value.
    Normalization,
    Graph(Graph),
    Spline(Spline),
}

fn sorted_points(points: &[[f64; 2]]) -> (Vec<f64>, Vec<f64>) {
    let mut pts: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|p| p[0].is_finite() && p[1].is_finite())
        .collect();
    pts.sort_by(|a, b| a[0].total_cmp(&b[0]));
    pts.dedup_by(|a, b| a[0] == b[0]);
    pts.into_iter().map(|p| (p[0], p[1])).unzip()
}

/// Index `i` of the segment `[xs[i], xs[i + 1]]` holding `x`.
fn segment(xs: &[f64], x: f64) -> usize {
    let upper = xs.partition_point(|&k| k <= x);
    upper.saturating_sub(1).min(xs.len() - 2)
}

impl Graph {
    pub fn new(points: &[[f64; 2]], extrapolate: bool) -> Option<Self> {
        let (xs, ys) = sorted_points(points);
        if xs.is_empty() {
            return None;
        }
        Some(Graph { xs, ys, extrapolate })
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n == 1 {
            return self.ys[0];
        }
        let x = if self.extrapolate {
            x
        } else {
            x.clamp(self.xs[0], self.xs[n - 1])
        };
        let i = segment(&self.xs, x);
        let t = (x - self.xs[i]) / (self.xs[i + 1] - self.xs[i]);
        self.ys[i] + t * (self.ys[i + 1] - self.ys[i])
    }
}

impl Spline {
    /// Fewer than three distinct knots degrade to a graph.
    pub fn build(points: &[[f64; 2]], extrapolate: bool) -> Option<Dial> {
        let (xs, ys) = sorted_points(points);
        if xs.len() < 3 {
            return Graph::new(points, extrapolate).map(Dial::Graph);
        }
        let m = natural_second_derivatives(&xs, &ys)?;
        Some(Dial::Spline(Spline {
            xs,
            ys,
            m,
            extrapolate,
        }))
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let (lo, hi) = (self.xs[0], self.xs[n - 1]);
        if x < lo {
            if !self.extrapolate {
                return self.ys[0];
            }
            let slope = segment_slope(&self.xs, &self.ys, &self.m, 0, false);
            return self.ys[0] + slope * (x - lo);
        }
        if x > hi {
            if !self.extrapolate {
                return self.ys[n - 1];
            }
            let slope = segment_slope(&self.xs, &self.ys, &self.m, n - 2, true);
            return self.ys[n - 1] + slope * (x - hi);
        }
        eval_segment(&self.xs, &self.ys, &self.m, segment(&self.xs, x), x)
    }
}

impl Dial {
    pub fn response(&self, x: f64) -> f64 {
        match self {
            Dial::Normalization => x,
            Dial::Graph(g) => g.eval(x),
            Dial::Spline(s) => s.eval(x),
        }
    }

    pub fn kind(&self) -> DialKind {
        match self {
            Dial::Normalization => DialKind::Normalization,
            Dial::Graph(_) => DialKind::Graph,
            Dial::Spline(_) => DialKind::Spline,
        }
    }
}

/// Builds dials from record objects or configured point sets.
#[derive(Debug, Clone, PartialEq)]
pub struct DialFactory {
    pub kind: DialKind,
    pub subtype: Option<String>,
    pub allow_extrapolation: bool,
}

impl DialFactory {
    /// `None` when the points cannot make a dial (e.g. no points at all).
    pub fn from_points(&self, points: &[[f64; 2]]) -> Option<Dial> {
        let linear = self
            .subtype
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("linear"));
        match self.kind {
            DialKind::Normalization => Some(Dial::Normalization),
            DialKind::Spline if !linear => Spline::build(points, self.allow_extrapolation),
            DialKind::Spline | DialKind::Graph => {
                Graph::new(points, self.allow_extrapolation).map(Dial::Graph)
            }
        }
    }

    pub fn from_object(&self, object: &RecordObject) -> Option<Dial> {
        if self.kind == DialKind::Normalization {
            return Some(Dial::Normalization);
        }
        self.from_points(object.points()?)
    }
}

/// How a collection finds the dial for an event.
#[derive(Debug, Clone, PartialEq)]
pub enum DialMode {
    /// One dial per bin; the event's bin picks it.
    Binned { binning: Binning, dials: Vec<Dial> },
    /// Each record carries its own correction object in `field`.
    PerEvent { field: String, factory: DialFactory },
}

#[derive(Debug, Clone)]
pub struct DialCollection {
    /// Position among enabled collections; what cache entries refer to.
    pub index: usize,
    pub name: String,
    pub datasets: Vec<String>,
    pub parameter: String,
    pub apply_condition: Option<String>,
    pub mode: DialMode,
    /// Per-event dials, addressed by cache slot.
    pub arena: Vec<Dial>,
}

impl DialCollection {
    /// Build an enabled collection. Exactly one of binning and per-event
    /// source must be configured.
    pub fn from_config(
        index: usize,
        cfg: &DialCollectionConfig,
        toy_index: Option<usize>,
    ) -> Result<Self> {
        let mode = match (&cfg.binning, &cfg.per_event) {
            (Some(bins), None) => {
                let binning = Binning::from_config(bins);
                let dials = binned_dials(cfg, &binning)?;
                DialMode::Binned { binning, dials }
            }
            (None, Some(pe)) => DialMode::PerEvent {
                field: substitute_toy(&pe.field, toy_index)?,
                factory: DialFactory {
                    kind: pe.kind,
                    subtype: pe.subtype.clone(),
                    allow_extrapolation: cfg.allow_extrapolation,
                },
            },
            _ => return Err(AppError::InvalidDialCollection(cfg.name.clone())),
        };

        let apply_condition = cfg
            .apply_condition
            .as_ref()
            .and_then(|f| f.as_selection())
            .map(|s| substitute_toy(&s, toy_index))
            .transpose()?;

        Ok(DialCollection {
            index,
            name: cfg.name.clone(),
            datasets: cfg.datasets.clone(),
            parameter: cfg.parameter.clone(),
            apply_condition,
            mode,
            arena: Vec::new(),
        })
    }

    pub fn applies_to(&self, dataset: &str) -> bool {
        self.datasets.is_empty() || self.datasets.iter().any(|d| d == dataset)
    }

    pub fn is_binned(&self) -> bool {
        matches!(self.mode, DialMode::Binned { .. })
    }

    /// A single unconstrained bin: every event gets dial 0 without a search.
    pub fn is_unconditional(&self) -> bool {
        match &self.mode {
            DialMode::Binned { binning, .. } => binning.is_unconditional(),
            DialMode::PerEvent { .. } => false,
        }
    }

    pub fn dial(&self, slot: usize) -> Option<&Dial> {
        match &self.mode {
            DialMode::Binned { dials, .. } => dials.get(slot),
            DialMode::PerEvent { .. } => self.arena.get(slot),
        }
    }

    /// Response of dial `slot` at parameter value `x`. A missing dial is
    /// neutral.
    pub fn response(&self, slot: usize, x: f64) -> f64 {
        self.dial(slot).map_or(1.0, |d| d.response(x))
    }

    pub fn n_dials(&self) -> usize {
        match &self.mode {
            DialMode::Binned { dials, .. } => dials.len(),
            DialMode::PerEvent { .. } => self.arena.len(),
        }
    }
}

fn binned_dials(cfg: &DialCollectionConfig, binning: &Binning) -> Result<Vec<Dial>> {
    if cfg.bin_dials.is_empty() {
        return Ok(vec![Dial::Normalization; binning.len()]);
    }
    if cfg.bin_dials.len() != binning.len() {
        return Err(AppError::config(format!(
            "dial collection '{}': {} bin dials for {} bins",
            cfg.name,
            cfg.bin_dials.len(),
            binning.len()
        )));
    }
    cfg.bin_dials
        .iter()
        .enumerate()
        .map(|(bin, spec)| dial_from_spec(cfg, spec, bin))
        .collect()
}

fn dial_from_spec(cfg: &DialCollectionConfig, spec: &DialSpec, bin: usize) -> Result<Dial> {
    let factory = DialFactory {
        kind: spec.kind,
        subtype: None,
        allow_extrapolation: cfg.allow_extrapolation,
    };
    factory.from_points(&spec.points).ok_or_else(|| {
        AppError::config(format!(
            "dial collection '{}': bin {bin} has no usable points",
            cfg.name
        ))
    })
}
