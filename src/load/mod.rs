//! The ingestion pipeline.
//!
//! Stages, in order, per dataset:
//!
//! - counting (`selection`), in parallel over entry ranges
//! - request collection and binding (`requests`, `resolver`, `transform`)
//! - exact reservation of containers and dial cache (`allocate`)
//! - fill with dial assignment (`fill`, `indexer`), in parallel again
//!
//! [`Loader`] runs them for every enabled dataset of a configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::dial::DialCollection;
use crate::domain::sample::SampleSet;
use crate::domain::types::{ContainerTarget, LoadConfig};
use crate::error::Result;
use crate::source::RecordSource;
use crate::source::file::open_chain;

pub mod allocate;
pub mod cache;
pub mod context;
pub mod dispenser;
pub mod fill;
pub mod hist;
pub mod indexer;
pub mod requests;
pub mod resolver;
pub mod selection;
pub mod transform;

pub use cache::{CacheEntry, DialRef, EventDialCache};
pub use context::PipelineContext;
pub use dispenser::{DatasetReport, DispenserOptions, SampleFillRow};

/// Filled samples, collections with their per-event arenas, and the cache
/// mapping every stored MC event to its dials.
#[derive(Debug, Clone)]
pub struct LoadOutput {
    pub samples: SampleSet,
    pub collections: Vec<DialCollection>,
    pub cache: EventDialCache,
    pub reports: Vec<DatasetReport>,
}

impl LoadOutput {
    pub fn n_events(&self, target: ContainerTarget) -> usize {
        self.samples.n_events(target)
    }
}

pub struct Loader<'a> {
    config: &'a LoadConfig,
    ctx: &'a PipelineContext,
    sources: HashMap<String, Arc<dyn RecordSource>>,
    extra_storage: Vec<String>,
}

impl<'a> Loader<'a> {
    pub fn new(config: &'a LoadConfig, ctx: &'a PipelineContext) -> Self {
        Loader {
            config,
            ctx,
            sources: HashMap::new(),
            extra_storage: Vec::new(),
        }
    }

    /// Use `source` for `dataset` instead of opening its configured files.
    pub fn with_source(mut self, dataset: impl Into<String>, source: Arc<dyn RecordSource>) -> Self {
        self.sources.insert(dataset.into(), source);
        self
    }

    /// Extra variables a downstream consumer needs stored on every event.
    pub fn with_storage_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_storage.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn run(self) -> Result<LoadOutput> {
        let config = self.config;
        let toy = config.toy_index;

        let mut samples = SampleSet::from_configs(&config.samples, toy)?;
        let mut collections = config
            .dial_collections
            .iter()
            .filter(|c| c.enabled)
            .enumerate()
            .map(|(i, c)| DialCollection::from_config(i, c, toy))
            .collect::<Result<Vec<_>>>()?;
        let mut cache = EventDialCache::new(samples.len(), collections.len());
        info!(
            samples = samples.len(),
            collections = collections.len(),
            threads = self.ctx.n_threads(),
            "load run starting"
        );

        let options = DispenserOptions {
            toy_index: toy,
            storage_vars: config
                .storage_vars
                .iter()
                .chain(&self.extra_storage)
                .cloned()
                .collect(),
        };

        let mut reports = Vec::with_capacity(config.datasets.len());
        for (d, ds) in config.datasets.iter().enumerate() {
            if !ds.enabled {
                info!(dataset = %ds.name, "dataset disabled, skipping");
                continue;
            }
            let report = if ds.from_hist_content.is_some() {
                dispenser::load_hist_dataset(d, ds, samples.samples_mut())?
            } else {
                let source: Arc<dyn RecordSource> = match self.sources.get(&ds.name) {
                    Some(s) => Arc::clone(s),
                    None => Arc::new(open_chain(&ds.name, &ds.sources)?),
                };
                dispenser::load_dataset(
                    self.ctx,
                    d,
                    ds,
                    source.as_ref(),
                    samples.samples_mut(),
                    &mut collections,
                    &mut cache,
                    &options,
                )?
            };
            reports.push(report);
        }

        info!(
            mc_events = samples.n_events(ContainerTarget::Mc),
            data_events = samples.n_events(ContainerTarget::Data),
            cache_entries = cache.n_entries(),
            "load run done"
        );
        Ok(LoadOutput {
            samples,
            collections,
            cache,
            reports,
        })
    }
}
