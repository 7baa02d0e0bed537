//! Pre-allocation between the counting and fill passes.
//!
//! Every target container grows by exactly the number of entries its sample
//! accepted, using a placeholder event as the layout template, and the dial
//! cache grows in step. Nothing is resized again until the post-fill shrink.

use tracing::info;

use crate::domain::event::Event;
use crate::domain::sample::Sample;
use crate::domain::types::ContainerTarget;
use crate::error::{AppError, Result};
use crate::load::cache::EventDialCache;
use crate::load::selection::SelectionResult;

/// Where each sample's reserved region starts and how long it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Indexed like the dataset's sample list.
    pub starts: Vec<usize>,
    pub reserved: Vec<usize>,
    pub with_cache: bool,
}

impl Reservation {
    pub fn total(&self) -> usize {
        self.reserved.iter().sum()
    }
}

/// Reserve exactly `selection.sample_counts` slots per sample.
pub fn reserve(
    samples: &mut [Sample],
    sample_ids: &[usize],
    target: ContainerTarget,
    selection: &SelectionResult,
    mut cache: Option<&mut EventDialCache>,
    template: &Event,
) -> Result<Reservation> {
    let mut starts = Vec::with_capacity(sample_ids.len());
    let mut reserved = Vec::with_capacity(sample_ids.len());

    for (local, &sample) in sample_ids.iter().enumerate() {
        let count = selection.sample_counts[local];
        let container = samples[sample].container_mut(target);
        let start = container.reserve_placeholders(template, count);

        if let Some(cache) = cache.as_deref_mut() {
            let cache_start = cache.reserve(sample, count);
            if cache_start != start {
                return Err(AppError::Capacity(format!(
                    "dial cache of sample '{}' holds {cache_start} entries for {start} events",
                    samples[sample].name
                )));
            }
        }
        starts.push(start);
        reserved.push(count);
    }

    let with_cache = cache.is_some();
    let stride = cache.map_or(0, |c| c.stride());
    let total: usize = reserved.iter().sum();
    info!(
        events = total,
        dial_slots = total * stride,
        "storage reserved"
    );

    Ok(Reservation {
        starts,
        reserved,
        with_cache,
    })
}
