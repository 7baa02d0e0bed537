//! Parallel fill pass.
//!
//! The reserved region of every sample is cut into one disjoint slice per
//! partition, sized by that partition's own count from the counting pass.
//! A worker claims a slot by bumping a cursor inside its own slice, so no
//! two workers can ever write the same event or cache entry and no lock is
//! taken. Afterwards the filled prefixes are compacted in partition order,
//! per-event dials are appended to their collections' arenas, and the
//! containers are shrunk to what was actually stored.

use std::ops::Range;

use tracing::{debug, info};

use crate::domain::binning::Binning;
use crate::domain::dial::Dial;
use crate::domain::event::Event;
use crate::domain::sample::Sample;
use crate::domain::types::ContainerTarget;
use crate::error::{AppError, Result};
use crate::load::allocate::Reservation;
use crate::load::cache::{CacheEntry, DialRef, EventDialCache};
use crate::load::context::PipelineContext;
use crate::load::indexer::{DialIndexer, DialUsage};
use crate::load::requests::{BufferFormula, IndexingTable};
use crate::load::resolver::Accessor;
use crate::load::selection::SelectionResult;
use crate::load::transform::{ActiveTransforms, TransformChain};
use crate::source::RecordSource;

/// Everything a worker reads during the fill. Shared, read-only.
pub struct FillPlan<'a> {
    pub dataset: &'a str,
    pub dataset_index: usize,
    pub target: ContainerTarget,
    pub source: &'a dyn RecordSource,
    pub selection: &'a SelectionResult,
    pub table: &'a IndexingTable,
    pub chain: &'a TransformChain,
    pub transforms: &'a ActiveTransforms,
    pub weight: Option<&'a Accessor>,
    pub norm: f64,
    /// Indexing-buffer position of each storage variable.
    pub storage_slots: &'a [usize],
    /// Global sample index per local sample.
    pub sample_ids: &'a [usize],
    /// Per local sample.
    pub var_selections: &'a [Option<BufferFormula>],
    pub indexer: Option<&'a DialIndexer<'a>>,
    pub n_collections: usize,
    pub stride: usize,
    /// Arena length of each collection before this fill.
    pub arena_base: &'a [usize],
}

struct SampleRegion<'r> {
    sample: usize,
    binning: &'r Binning,
    events: &'r mut [Event],
    entries: &'r mut [CacheEntry],
    dials: &'r mut [DialRef],
}

struct PartitionTask<'r> {
    index: usize,
    range: Range<usize>,
    regions: Vec<SampleRegion<'r>>,
}

#[derive(Debug, Default)]
struct PartitionOutcome {
    filled: Vec<usize>,
    arenas: Vec<Vec<Dial>>,
    usage: Vec<DialUsage>,
    transform_counts: Vec<u64>,
    zero_weight: usize,
    no_bin: Vec<usize>,
    var_rejected: Vec<usize>,
}

/// Totals of one fill pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillSummary {
    /// Per local sample.
    pub stored: Vec<usize>,
    pub reserved: Vec<usize>,
    pub no_bin: Vec<usize>,
    pub var_rejected: Vec<usize>,
    pub zero_weight: usize,
    /// Per collection.
    pub dial_usage: Vec<DialUsage>,
    /// `(chain index, evaluations)` of active transforms.
    pub transform_counts: Vec<(usize, u64)>,
}

/// Summary plus the per-event dials built during the fill, per collection,
/// ready to be appended to the collection arenas.
#[derive(Debug, Default)]
pub struct FillResult {
    pub summary: FillSummary,
    pub arenas: Vec<Vec<Dial>>,
}

/// Fill the reserved regions and compact them.
pub fn fill(
    ctx: &PipelineContext,
    plan: &FillPlan<'_>,
    reservation: &Reservation,
    samples: &mut [Sample],
    mut cache: Option<&mut EventDialCache>,
) -> Result<FillResult> {
    let n_local = plan.sample_ids.len();
    let bounds = &plan.selection.bounds;

    let outcomes = {
        let mut tasks: Vec<PartitionTask<'_>> = bounds
            .iter()
            .enumerate()
            .map(|(index, range)| PartitionTask {
                index,
                range: range.clone(),
                regions: Vec::with_capacity(n_local),
            })
            .collect();

        let mut local_of = vec![None; samples.len()];
        for (l, &g) in plan.sample_ids.iter().enumerate() {
            local_of[g] = Some(l);
        }

        let mut cache_starts = vec![None; samples.len()];
        if reservation.with_cache {
            for (l, &g) in plan.sample_ids.iter().enumerate() {
                cache_starts[g] = Some(reservation.starts[l]);
            }
        }
        let mut cache_tails = match cache.as_deref_mut() {
            Some(c) => c.tails_mut(&cache_starts),
            None => Vec::new(),
        };

        // Regions must be pushed in local-sample order.
        let mut split: Vec<Option<SampleRegionSource<'_>>> = (0..n_local).map(|_| None).collect();
        for (g, sample) in samples.iter_mut().enumerate() {
            let Some(l) = local_of[g] else { continue };
            let Sample {
                binning, mc, data, ..
            } = sample;
            let container = match plan.target {
                ContainerTarget::Mc => mc,
                ContainerTarget::Data => data,
            };
            let (entries, dials) = match cache_tails.get_mut(g).and_then(Option::take) {
                Some((e, d)) => (e, d),
                None => (Default::default(), Default::default()),
            };
            split[l] = Some(SampleRegionSource {
                sample: g,
                binning,
                events: container.tail_mut(reservation.starts[l]),
                entries,
                dials,
            });
        }

        for (l, source) in split.into_iter().enumerate() {
            let Some(mut src) = source else {
                return Err(AppError::Capacity(format!(
                    "sample #{} missing from fill layout",
                    plan.sample_ids[l]
                )));
            };
            for task in tasks.iter_mut() {
                let n = plan.selection.partition_counts[task.index][l];
                let (events, rest) = std::mem::take(&mut src.events).split_at_mut(n);
                src.events = rest;
                let (entries, dials) = if reservation.with_cache {
                    let (e, er) = std::mem::take(&mut src.entries).split_at_mut(n);
                    let (d, dr) = std::mem::take(&mut src.dials).split_at_mut(n * plan.stride);
                    src.entries = er;
                    src.dials = dr;
                    (e, d)
                } else {
                    (Default::default(), Default::default())
                };
                task.regions.push(SampleRegion {
                    sample: src.sample,
                    binning: src.binning,
                    events,
                    entries,
                    dials,
                });
            }
        }

        ctx.run_tasks(tasks, |task| fill_partition(plan, task))?
    };

    Ok(compact(plan, reservation, outcomes, samples, cache, n_local))
}

struct SampleRegionSource<'r> {
    sample: usize,
    binning: &'r Binning,
    events: &'r mut [Event],
    entries: &'r mut [CacheEntry],
    dials: &'r mut [DialRef],
}

fn fill_partition(plan: &FillPlan<'_>, mut task: PartitionTask<'_>) -> Result<PartitionOutcome> {
    let n_local = task.regions.len();
    let mut out = PartitionOutcome {
        filled: vec![0; n_local],
        arenas: vec![Vec::new(); plan.n_collections],
        usage: vec![DialUsage::default(); plan.n_collections],
        transform_counts: vec![0; plan.transforms.len()],
        zero_weight: 0,
        no_bin: vec![0; n_local],
        var_rejected: vec![0; n_local],
    };
    if task.range.is_empty() {
        return Ok(out);
    }

    let mut reader = plan.source.open(task.range.clone())?;
    let mut buffer = vec![f64::NAN; plan.table.len()];
    let mut scratch = Vec::new();

    for entry in task.range.clone() {
        let row = plan.selection.row(entry);
        if !row.iter().any(|&m| m) {
            continue;
        }
        reader.load_entry(entry)?;

        let nominal = plan.weight.map_or(1.0, |w| w.value(reader.as_ref()));
        if nominal.is_nan() {
            return Err(AppError::NanWeight {
                dataset: plan.dataset.to_string(),
                entry,
            });
        }
        if nominal < 0.0 {
            return Err(AppError::NegativeWeight {
                dataset: plan.dataset.to_string(),
                entry,
                weight: nominal,
            });
        }
        if nominal == 0.0 {
            out.zero_weight += 1;
            continue;
        }

        plan.table.fill(reader.as_ref(), &mut buffer);
        plan.transforms
            .apply(plan.chain, &mut buffer, &mut scratch, &mut out.transform_counts);

        for (l, region) in task.regions.iter_mut().enumerate() {
            if !row[l] {
                continue;
            }
            if let Some(cut) = &plan.var_selections[l]
                && !cut.passes(&buffer)
            {
                out.var_rejected[l] += 1;
                continue;
            }
            let Some(bin) = region.binning.find_bin(&buffer) else {
                out.no_bin[l] += 1;
                continue;
            };

            let slot = out.filled[l];
            if slot >= region.events.len() {
                return Err(AppError::Capacity(format!(
                    "partition {} of dataset '{}' overflowed sample #{} ({} slots)",
                    task.index,
                    plan.dataset,
                    region.sample,
                    region.events.len()
                )));
            }
            out.filled[l] += 1;

            let event = &mut region.events[slot];
            event.entry = entry;
            event.dataset = plan.dataset_index;
            event.sample = region.sample;
            event.bin = Some(bin);
            event.nominal_weight = nominal;
            event.base_weight = nominal * plan.norm;
            event.weight = event.base_weight;
            for (value, &s) in event.values.iter_mut().zip(plan.storage_slots) {
                *value = buffer[s];
            }

            if let Some(entry) = region.entries.get_mut(slot) {
                let n_dials = match plan.indexer {
                    Some(indexer) => indexer.assign(
                        &buffer,
                        reader.as_ref(),
                        &mut out.arenas,
                        &mut region.dials[slot * plan.stride..(slot + 1) * plan.stride],
                        &mut out.usage,
                    ),
                    None => 0,
                };
                *entry = CacheEntry {
                    sample: region.sample,
                    event: slot,
                    n_dials,
                };
            }
        }
    }

    debug!(
        partition = task.index,
        stored = out.filled.iter().sum::<usize>(),
        "partition filled"
    );
    Ok(out)
}

fn compact(
    plan: &FillPlan<'_>,
    reservation: &Reservation,
    outcomes: Vec<PartitionOutcome>,
    samples: &mut [Sample],
    mut cache: Option<&mut EventDialCache>,
    n_local: usize,
) -> FillResult {
    let mut summary = FillSummary {
        stored: vec![0; n_local],
        reserved: reservation.reserved.clone(),
        no_bin: vec![0; n_local],
        var_rejected: vec![0; n_local],
        zero_weight: 0,
        dial_usage: vec![DialUsage::default(); plan.n_collections],
        transform_counts: Vec::new(),
    };
    let mut transform_totals = vec![0u64; plan.transforms.len()];

    // Slot offsets of each partition's local arenas inside the collection
    // arenas, which already hold `arena_base` dials from earlier datasets.
    let mut next: Vec<usize> = plan.arena_base.to_vec();
    next.resize(plan.n_collections, 0);
    let mut offsets: Vec<Vec<usize>> = Vec::with_capacity(outcomes.len());
    let mut filled: Vec<Vec<usize>> = Vec::with_capacity(outcomes.len());
    let mut arenas: Vec<Vec<Dial>> = vec![Vec::new(); plan.n_collections];

    for outcome in outcomes {
        summary.zero_weight += outcome.zero_weight;
        for l in 0..n_local {
            summary.no_bin[l] += outcome.no_bin[l];
            summary.var_rejected[l] += outcome.var_rejected[l];
        }
        for (total, u) in summary.dial_usage.iter_mut().zip(&outcome.usage) {
            total.merge(u);
        }
        for (total, n) in transform_totals.iter_mut().zip(&outcome.transform_counts) {
            *total += n;
        }

        let mut part_offsets = vec![0; plan.n_collections];
        for (c, local) in outcome.arenas.into_iter().enumerate() {
            if local.is_empty() {
                continue;
            }
            part_offsets[c] = next[c];
            next[c] += local.len();
            arenas[c].extend(local);
        }
        offsets.push(part_offsets);
        filled.push(outcome.filled);
    }

    summary.transform_counts = plan
        .transforms
        .chain_indices()
        .into_iter()
        .zip(transform_totals)
        .collect();

    for (l, &g) in plan.sample_ids.iter().enumerate() {
        let start = reservation.starts[l];
        let mut read = start;
        let mut write = start;
        for (p, part_filled) in filled.iter().enumerate() {
            let n = part_filled[l];
            samples[g].container_mut(plan.target).move_down(read, write, n);
            if let Some(c) = cache.as_deref_mut() {
                c.move_down(g, read, write, n, &offsets[p]);
            }
            read += plan.selection.partition_counts[p][l];
            write += n;
        }
        samples[g].container_mut(plan.target).shrink_to(write);
        if let Some(c) = cache.as_deref_mut() {
            c.shrink_to(g, write);
        }
        summary.stored[l] = write - start;
    }

    info!(
        dataset = %plan.dataset,
        stored = summary.stored.iter().sum::<usize>(),
        reserved = reservation.total(),
        zero_weight = summary.zero_weight,
        "fill pass done"
    );

    FillResult { summary, arenas }
}
