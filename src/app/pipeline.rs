//! Shared load pipeline used by the CLI and by integration tests.
//!
//! config -> context -> load every dataset -> reweight at the requested
//! parameter values -> per-bin sums.

use std::sync::Arc;

use tracing::info;

use crate::domain::types::LoadConfig;
use crate::error::Result;
use crate::fit::{ParameterSet, PropagateSummary, SampleHistogram, fill_histograms, propagate};
use crate::load::{LoadOutput, Loader, PipelineContext};
use crate::source::RecordSource;

/// Run options that do not live in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub single_thread: bool,
    pub storage_vars: Vec<String>,
    /// `NAME=VALUE` parameter assignments.
    pub params: Vec<String>,
}

/// All computed outputs of a single `evload load` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: LoadOutput,
    pub params: ParameterSet,
    pub propagation: PropagateSummary,
    pub histograms: Vec<SampleHistogram>,
    pub threads: usize,
}

pub fn run_load(config: &LoadConfig, options: &RunOptions) -> Result<RunOutput> {
    run_load_with_sources(config, options, Vec::new())
}

/// Like [`run_load`], with in-memory sources replacing the configured files
/// of the named datasets.
pub fn run_load_with_sources(
    config: &LoadConfig,
    options: &RunOptions,
    sources: Vec<(String, Arc<dyn RecordSource>)>,
) -> Result<RunOutput> {
    let ctx = PipelineContext::new(config.threads, options.single_thread)?;

    let mut loader = Loader::new(config, &ctx).with_storage_vars(options.storage_vars.iter().cloned());
    for (dataset, source) in sources {
        loader = loader.with_source(dataset, source);
    }
    let mut output = loader.run()?;

    let mut params = ParameterSet::from_configs(&config.parameters);
    for assignment in &options.params {
        params.assign(assignment)?;
    }
    let propagation = propagate(
        &ctx,
        &mut output.samples,
        &output.collections,
        &output.cache,
        &params,
    )?;
    let histograms = fill_histograms(&output.samples);
    info!(
        events = propagation.events,
        dials = propagation.dial_evaluations,
        "reweighted at requested parameters"
    );

    Ok(RunOutput {
        output,
        params,
        propagation,
        histograms,
        threads: ctx.n_threads(),
    })
}
