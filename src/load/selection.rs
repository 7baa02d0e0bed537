//! Counting pass: which entries each sample accepts.
//!
//! Every partition opens its own reader, evaluates the dataset selection and
//! then each sample selection, and records membership plus per-sample counts
//! for its own range only. Ranges are disjoint, so merging is concatenation
//! (membership) and summation (counts).

use std::ops::Range;

use tracing::{debug, info, trace};

use crate::error::Result;
use crate::load::context::PipelineContext;
use crate::load::resolver::{Accessor, NameOverrides, resolve};
use crate::source::RecordSource;

/// Output of the counting pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub n_entries: usize,
    pub n_samples: usize,
    /// Entry-major: `membership[entry * n_samples + sample]`.
    pub membership: Vec<bool>,
    pub sample_counts: Vec<usize>,
    /// `partition_counts[partition][sample]`.
    pub partition_counts: Vec<Vec<usize>>,
    pub bounds: Vec<Range<usize>>,
    /// Entries rejected by the dataset-level selection.
    pub rejected_by_dataset: usize,
}

impl SelectionResult {
    pub fn is_member(&self, entry: usize, sample: usize) -> bool {
        self.membership[entry * self.n_samples + sample]
    }

    /// Membership row of one entry.
    pub fn row(&self, entry: usize) -> &[bool] {
        let start = entry * self.n_samples;
        &self.membership[start..start + self.n_samples]
    }

    pub fn total_selected(&self) -> usize {
        self.sample_counts.iter().sum()
    }
}

#[derive(Debug)]
struct PartitionSelection {
    membership: Vec<bool>,
    counts: Vec<usize>,
    rejected_by_dataset: usize,
}

/// Selections of one dataset: an optional dataset-wide cut and one optional
/// cut per sample.
#[derive(Debug, Clone, Default)]
pub struct SelectionSpec {
    pub dataset: Option<String>,
    pub samples: Vec<Option<String>>,
}

/// Run the counting pass over every entry of `source`.
pub fn count_selected(
    ctx: &PipelineContext,
    source: &dyn RecordSource,
    overrides: &NameOverrides,
    spec: &SelectionSpec,
) -> Result<SelectionResult> {
    let n_entries = source.n_entries();
    let n_samples = spec.samples.len();

    let dataset_cut = spec
        .dataset
        .as_deref()
        .map(|s| resolve(source, overrides, s, "dataset selection"))
        .transpose()?
        .map(|r| r.accessor);
    let sample_cuts: Vec<Option<Accessor>> = spec
        .samples
        .iter()
        .enumerate()
        .map(|(i, s)| {
            s.as_deref()
                .map(|s| resolve(source, overrides, s, &format!("selection of sample #{i}")))
                .transpose()
                .map(|r| r.map(|r| r.accessor))
        })
        .collect::<Result<_>>()?;

    let bounds = ctx.thread_bounds(n_entries);
    debug!(source = %source.name(), partitions = bounds.len(), "counting pass");

    let parts = ctx.run_tasks(bounds.clone(), |range| {
        count_partition(source, range, dataset_cut.as_ref(), &sample_cuts)
    })?;

    let mut membership = Vec::with_capacity(n_entries * n_samples);
    let mut sample_counts = vec![0usize; n_samples];
    let mut partition_counts = Vec::with_capacity(parts.len());
    let mut rejected_by_dataset = 0;
    for part in parts {
        membership.extend_from_slice(&part.membership);
        for (total, n) in sample_counts.iter_mut().zip(&part.counts) {
            *total += n;
        }
        rejected_by_dataset += part.rejected_by_dataset;
        partition_counts.push(part.counts);
    }

    info!(
        source = %source.name(),
        entries = n_entries,
        rejected = rejected_by_dataset,
        selected = sample_counts.iter().sum::<usize>(),
        "counting pass done"
    );

    Ok(SelectionResult {
        n_entries,
        n_samples,
        membership,
        sample_counts,
        partition_counts,
        bounds,
        rejected_by_dataset,
    })
}

fn count_partition(
    source: &dyn RecordSource,
    range: Range<usize>,
    dataset_cut: Option<&Accessor>,
    sample_cuts: &[Option<Accessor>],
) -> Result<PartitionSelection> {
    let n_samples = sample_cuts.len();
    let mut out = PartitionSelection {
        membership: vec![false; range.len() * n_samples],
        counts: vec![0; n_samples],
        rejected_by_dataset: 0,
    };
    if range.is_empty() {
        return Ok(out);
    }

    let mut reader = source.open(range.clone())?;
    for (row, entry) in range.enumerate() {
        reader.load_entry(entry)?;

        if let Some(cut) = dataset_cut
            && !cut.passes(reader.as_ref())
        {
            out.rejected_by_dataset += 1;
            trace!(entry, "rejected by dataset selection");
            continue;
        }

        let flags = &mut out.membership[row * n_samples..(row + 1) * n_samples];
        for (s, cut) in sample_cuts.iter().enumerate() {
            let pass = cut.as_ref().is_none_or(|c| c.passes(reader.as_ref()));
            if pass {
                flags[s] = true;
                out.counts[s] += 1;
            }
        }
    }
    Ok(out)
}
