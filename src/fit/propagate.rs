//! Reweighting through the event-dial cache.
//!
//! Every stored MC event gets `base_weight × Π response` over the dials its
//! cache entry lists. This is the loop a minimizer repeats for every
//! parameter change, so it touches nothing but the cache, the collections
//! and the weights.

use rayon::prelude::*;
use tracing::debug;

use crate::domain::dial::DialCollection;
use crate::domain::event::Event;
use crate::domain::sample::SampleSet;
use crate::domain::types::ParameterConfig;
use crate::error::{AppError, Result};
use crate::load::cache::EventDialCache;
use crate::load::context::PipelineContext;

/// Current parameter values, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    names: Vec<String>,
    values: Vec<f64>,
}

impl ParameterSet {
    /// Parameters at their nominal values.
    pub fn from_configs(configs: &[ParameterConfig]) -> Self {
        let mut set = ParameterSet::default();
        for p in configs {
            set.insert(&p.name, p.nominal);
        }
        set
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.values[i] = value,
            None => {
                self.names.push(name.to_string());
                self.values.push(value);
            }
        }
    }

    /// Apply a `NAME=VALUE` assignment. The parameter must already exist.
    pub fn assign(&mut self, text: &str) -> Result<()> {
        let (name, value) = text
            .split_once('=')
            .ok_or_else(|| AppError::config(format!("expected NAME=VALUE, got '{text}'")))?;
        let name = name.trim();
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| AppError::config(format!("parameter '{name}': '{value}' is not a number")))?;
        if self.get(name).is_none() {
            return Err(AppError::config(format!("unknown parameter '{name}'")));
        }
        self.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagateSummary {
    pub events: usize,
    pub dial_evaluations: usize,
}

/// Recompute every MC event weight from the cache.
pub fn propagate(
    ctx: &PipelineContext,
    samples: &mut SampleSet,
    collections: &[DialCollection],
    cache: &EventDialCache,
    params: &ParameterSet,
) -> Result<PropagateSummary> {
    let values = collections
        .iter()
        .map(|c| {
            params.get(&c.parameter).ok_or_else(|| {
                AppError::config(format!(
                    "dial collection '{}' uses unknown parameter '{}'",
                    c.name, c.parameter
                ))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    let mut summary = PropagateSummary::default();
    for sample in samples.samples_mut() {
        let index = sample.index;
        let events = sample.mc.events_mut();
        let cached = cache.sample(index).map_or(0, |b| b.len());
        if cached != events.len() {
            return Err(AppError::Capacity(format!(
                "sample '{}' holds {} MC events but {cached} cache entries",
                sample.name,
                events.len()
            )));
        }

        let reweight = |(i, event): (usize, &mut Event)| {
            let mut w = event.base_weight;
            for d in cache.dials(index, i) {
                w *= collections[d.collection].response(d.slot, values[d.collection]);
            }
            event.weight = w;
        };
        if ctx.is_parallel() {
            ctx.install(|| events.par_iter_mut().enumerate().for_each(reweight));
        } else {
            events.iter_mut().enumerate().for_each(reweight);
        }

        summary.events += events.len();
        summary.dial_evaluations += cache
            .sample(index)
            .map_or(0, |b| b.entries().iter().map(|e| e.n_dials).sum());
    }
    debug!(
        events = summary.events,
        dials = summary.dial_evaluations,
        "weights propagated"
    );
    Ok(summary)
}
