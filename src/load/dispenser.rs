//! Per-dataset driver.
//!
//! Runs the stages for one dataset in order: counting, request collection,
//! binding, reservation, parallel fill, arena merge. Each stage is a barrier.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::dial::DialCollection;
use crate::domain::event::Event;
use crate::domain::sample::Sample;
use crate::domain::types::{ContainerTarget, DatasetConfig, substitute_toy};
use crate::error::{AppError, Result};
use crate::load::allocate::reserve;
use crate::load::cache::EventDialCache;
use crate::load::context::PipelineContext;
use crate::load::fill::{FillPlan, fill};
use crate::load::hist::{HistFillReport, load_hist_content};
use crate::load::indexer::{DialIndexer, DialUsage, cache_collection_bins, request_collections};
use crate::load::requests::{BufferFormula, IndexedVar, RequestKind, RequestTable};
use crate::load::resolver::{NameOverrides, resolve};
use crate::load::selection::{SelectionSpec, count_selected};
use crate::load::transform::{ActiveTransforms, TransformChain};
use crate::source::RecordSource;

/// Run-wide inputs shared by every dataset.
#[derive(Debug, Clone, Default)]
pub struct DispenserOptions {
    pub toy_index: Option<usize>,
    /// Variables stored on every event besides the dataset's own list.
    pub storage_vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleFillRow {
    pub sample: String,
    pub selected: usize,
    pub stored: usize,
    pub no_bin: usize,
    pub var_rejected: usize,
}

/// Everything the diagnostics need about one dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetReport {
    pub name: String,
    pub target: ContainerTarget,
    pub entries: usize,
    pub rejected_by_dataset: usize,
    pub zero_weight: usize,
    pub samples: Vec<SampleFillRow>,
    /// `(collection name, usage)` for collections applied to this dataset.
    pub dial_usage: Vec<(String, DialUsage)>,
    /// `(transform output, evaluations)` over the whole chain.
    pub transforms: Vec<(String, u64)>,
    pub variables: Vec<IndexedVar>,
    pub hist: Vec<HistFillReport>,
}

/// Fill `samples` from a hist-content dataset.
pub fn load_hist_dataset(
    dataset_index: usize,
    cfg: &DatasetConfig,
    samples: &mut [Sample],
) -> Result<DatasetReport> {
    let Some(hist_cfg) = &cfg.from_hist_content else {
        return Err(AppError::config(format!(
            "dataset '{}' has no hist content",
            cfg.name
        )));
    };
    let sample_ids = applicable_samples(samples, &cfg.name);
    let hist = load_hist_content(
        &cfg.name,
        dataset_index,
        cfg.target,
        hist_cfg,
        samples,
        &sample_ids,
    )?;
    Ok(DatasetReport {
        name: cfg.name.clone(),
        target: cfg.target,
        samples: hist
            .iter()
            .map(|h| SampleFillRow {
                sample: h.sample.clone(),
                selected: h.events,
                stored: h.events,
                no_bin: 0,
                var_rejected: 0,
            })
            .collect(),
        hist,
        ..DatasetReport::default()
    })
}

fn applicable_samples(samples: &[Sample], dataset: &str) -> Vec<usize> {
    samples
        .iter()
        .filter(|s| s.applies_to(dataset))
        .map(|s| s.index)
        .collect()
}

/// Load one record-backed dataset into `samples` (and `cache` for MC).
#[allow(clippy::too_many_arguments)]
pub fn load_dataset(
    ctx: &PipelineContext,
    dataset_index: usize,
    cfg: &DatasetConfig,
    source: &dyn RecordSource,
    samples: &mut [Sample],
    collections: &mut [DialCollection],
    cache: &mut EventDialCache,
    options: &DispenserOptions,
) -> Result<DatasetReport> {
    let name = cfg.name.as_str();
    let toy = options.toy_index;
    if source.n_entries() == 0 {
        return Err(AppError::source_error(source.name(), "no entries"));
    }

    let overrides = NameOverrides::new(
        cfg.overrides
            .iter()
            .map(|(k, v)| Ok((k.clone(), substitute_toy(v, toy)?)))
            .collect::<Result<Vec<(String, String)>>>()?,
    );

    let sample_ids = applicable_samples(samples, name);
    let mut report = DatasetReport {
        name: name.to_string(),
        target: cfg.target,
        entries: source.n_entries(),
        ..DatasetReport::default()
    };
    if sample_ids.is_empty() {
        warn!(dataset = name, "no enabled sample takes events from this dataset");
        return Ok(report);
    }

    // Counting pass.
    let dataset_selection = cfg
        .selection
        .as_ref()
        .and_then(|f| f.as_selection())
        .map(|s| substitute_toy(&s, toy))
        .transpose()?;
    let spec = SelectionSpec {
        dataset: dataset_selection,
        samples: sample_ids
            .iter()
            .map(|&i| samples[i].selection.clone())
            .collect(),
    };
    let selection = count_selected(ctx, source, &overrides, &spec)?;
    report.rejected_by_dataset = selection.rejected_by_dataset;

    // Requests.
    let mut chain = TransformChain::from_configs(&cfg.transforms, toy)?;
    let mut requests = RequestTable::new();
    for &i in &sample_ids {
        requests.add_all(&samples[i].binning.variables(), RequestKind::Binning);
    }
    let var_selection_exprs = sample_ids
        .iter()
        .map(|&i| {
            samples[i]
                .var_selection
                .as_deref()
                .map(|text| {
                    BufferFormula::request(text, RequestKind::VarSelection, &mut requests).map_err(
                        |e| AppError::config(format!("var selection of sample '{}': {e}", samples[i].name)),
                    )
                })
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;

    let applied: Vec<usize> = if cfg.target == ContainerTarget::Mc {
        collections
            .iter()
            .filter(|c| c.applies_to(name))
            .map(|c| c.index)
            .collect()
    } else {
        Vec::new()
    };
    let (collection_requests, index_expr) = {
        let refs: Vec<&DialCollection> = applied.iter().map(|&c| &collections[c]).collect();
        request_collections(&refs, cfg.dial_index.as_deref(), &mut requests)?
    };

    let mut storage_names: Vec<String> = Vec::new();
    for var in options.storage_vars.iter().chain(&cfg.storage_vars) {
        let var = var.trim();
        if !var.is_empty() && !storage_names.iter().any(|n| n == var) {
            storage_names.push(var.to_string());
        }
    }
    requests.add_all(&storage_names, RequestKind::Storage);

    let active = chain.activate(requests.names());
    for (t, _) in chain
        .transforms()
        .iter()
        .zip(&active)
        .filter(|(_, on)| **on)
    {
        requests.add_all(&t.inputs, RequestKind::TransformInput);
    }
    debug!(dataset = name, requests = ?requests.names(), "indexing requests");

    // Binding.
    let table = requests.bind(source, &overrides, &chain, &format!("dataset '{name}'"))?;
    let transforms = ActiveTransforms::bind(&chain, &active, |v| table.index_of(v))?;
    for &i in &sample_ids {
        let sample_name = samples[i].name.clone();
        samples[i]
            .binning
            .cache_var_indices(|v| table.index_of(v))
            .map_err(|e| AppError::config(format!("binning of sample '{sample_name}': {e}")))?;
    }
    cache_collection_bins(collections, &collection_requests, &table)?;
    let var_selections = var_selection_exprs
        .into_iter()
        .map(|e| e.map(|e| BufferFormula::bind(e, &table)).transpose())
        .collect::<Result<Vec<_>>>()?;
    let storage_slots = storage_names
        .iter()
        .map(|n| {
            table
                .index_of(n)
                .ok_or_else(|| AppError::unresolved(n, format!("storage of dataset '{name}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    let weight = cfg
        .nominal_weight
        .as_ref()
        .and_then(|f| f.as_weight())
        .map(|w| {
            let w = substitute_toy(&w, toy)?;
            resolve(source, &overrides, &w, &format!("nominal weight of dataset '{name}'"))
        })
        .transpose()?
        .map(|r| r.accessor);
    for var in table.vars() {
        debug!(
            variable = %var.name,
            expression = %var.expression,
            reused_for_storage = var.reused_for_storage(),
            "indexing variable"
        );
    }

    // Reservation.
    let template = Event::placeholder(Arc::from(storage_names.clone()));
    let with_cache = cfg.target == ContainerTarget::Mc;
    let reservation = reserve(
        samples,
        &sample_ids,
        cfg.target,
        &selection,
        with_cache.then_some(&mut *cache),
        &template,
    )?;

    // Fill.
    let arena_base: Vec<usize> = collections.iter().map(|c| c.arena.len()).collect();
    let result = {
        let indexer = if applied.is_empty() {
            None
        } else {
            Some(DialIndexer::bind(
                collections,
                collection_requests,
                index_expr,
                &table,
                source,
                &overrides,
            )?)
        };
        let plan = FillPlan {
            dataset: name,
            dataset_index,
            target: cfg.target,
            source,
            selection: &selection,
            table: &table,
            chain: &chain,
            transforms: &transforms,
            weight: weight.as_ref(),
            norm: cfg.norm,
            storage_slots: &storage_slots,
            sample_ids: &sample_ids,
            var_selections: &var_selections,
            indexer: indexer.as_ref(),
            n_collections: collections.len(),
            stride: cache.stride(),
            arena_base: &arena_base,
        };
        fill(ctx, &plan, &reservation, samples, with_cache.then_some(&mut *cache))?
    };

    for (collection, arena) in collections.iter_mut().zip(result.arenas) {
        collection.arena.extend(arena);
    }
    chain.record_evaluations(&result.summary.transform_counts);

    let summary = result.summary;
    report.zero_weight = summary.zero_weight;
    report.samples = sample_ids
        .iter()
        .enumerate()
        .map(|(l, &i)| SampleFillRow {
            sample: samples[i].name.clone(),
            selected: selection.sample_counts[l],
            stored: summary.stored[l],
            no_bin: summary.no_bin[l],
            var_rejected: summary.var_rejected[l],
        })
        .collect();
    report.dial_usage = applied
        .iter()
        .map(|&c| (collections[c].name.clone(), summary.dial_usage[c].clone()))
        .collect();
    report.transforms = chain.evaluations();
    report.variables = table.vars().to_vec();

    info!(
        dataset = name,
        entries = report.entries,
        stored = summary.stored.iter().sum::<usize>(),
        "dataset loaded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BinEdgeConfig, FormulaSpec, SampleConfig, TransformConfig};
    use crate::source::{Column, ColumnTable, TableSource};

    fn dataset(name: &str) -> DatasetConfig {
        serde_json::from_value(serde_json::json!({ "name": name })).unwrap()
    }

    fn sample(i: usize, var: &str) -> Sample {
        let cfg = SampleConfig {
            name: format!("s{i}"),
            enabled: true,
            datasets: vec![],
            selection: None,
            var_selection: None,
            binning: vec![vec![BinEdgeConfig {
                variable: var.into(),
                range: [0.0, 10.0],
                include_high: false,
            }]],
        };
        Sample::from_config(i, &cfg, None).unwrap()
    }

    fn source() -> TableSource {
        TableSource::new(
            "t",
            ColumnTable::from_columns(vec![
                ("x", Column::Scalar(vec![1.0, 2.0, 3.0])),
                ("w", Column::Scalar(vec![1.0, 2.0, 0.5])),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn overrides_storage_and_norm() {
        let mut cfg = dataset("d");
        cfg.overrides.insert("E".into(), "x * 2".into());
        cfg.nominal_weight = Some(FormulaSpec::One("w".into()));
        cfg.storage_vars = vec!["x".into()];
        cfg.norm = 2.0;
        let mut samples = vec![sample(0, "E")];
        let mut cache = EventDialCache::new(1, 0);
        let report = load_dataset(
            &PipelineContext::single_threaded(),
            0,
            &cfg,
            &source(),
            &mut samples,
            &mut [],
            &mut cache,
            &DispenserOptions::default(),
        )
        .unwrap();

        assert_eq!(report.samples[0].stored, 3);
        let events = samples[0].mc.events();
        assert_eq!(events[2].value("x"), Some(3.0));
        assert!((events[1].base_weight - 4.0).abs() < 1e-12);
        assert!(report.variables.iter().any(|v| v.name == "E" && v.expression == "x * 2"));
    }

    #[test]
    fn inactive_transforms_are_never_evaluated() {
        let mut cfg = dataset("d");
        cfg.transforms = vec![
            TransformConfig {
                output: "y".into(),
                formula: "x * 3".into(),
                enabled: true,
            },
            TransformConfig {
                output: "unused".into(),
                formula: "x + 1".into(),
                enabled: true,
            },
        ];
        let mut samples = vec![sample(0, "y")];
        let mut cache = EventDialCache::new(1, 0);
        let report = load_dataset(
            &PipelineContext::single_threaded(),
            0,
            &cfg,
            &source(),
            &mut samples,
            &mut [],
            &mut cache,
            &DispenserOptions::default(),
        )
        .unwrap();
        assert_eq!(
            report.transforms,
            vec![("y".to_string(), 3), ("unused".to_string(), 0)]
        );
        // 3 * 3 = 9 is still inside [0, 10).
        assert_eq!(report.samples[0].stored, 3);
    }

    #[test]
    fn empty_source_is_fatal() {
        let cfg = dataset("d");
        let empty = TableSource::new("empty", ColumnTable::new());
        let mut samples = vec![sample(0, "x")];
        let mut cache = EventDialCache::new(1, 0);
        let err = load_dataset(
            &PipelineContext::single_threaded(),
            0,
            &cfg,
            &empty,
            &mut samples,
            &mut [],
            &mut cache,
            &DispenserOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Source { .. }));
    }
}
