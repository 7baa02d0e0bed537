//! Event-dial cache.
//!
//! For every stored simulated event, the list of dials that apply to it as
//! `(collection, slot)` pairs. Each sample has one block of entries parallel
//! to its event container and one flat dial array with a fixed stride equal
//! to the number of enabled collections, so no entry ever needs to grow.

/// One applicable dial: collection index and slot inside that collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DialRef {
    pub collection: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub sample: usize,
    pub event: usize,
    pub n_dials: usize,
}

impl CacheEntry {
    pub const EMPTY: CacheEntry = CacheEntry {
        sample: usize::MAX,
        event: usize::MAX,
        n_dials: 0,
    };
}

#[derive(Debug, Clone, Default)]
pub struct SampleDialCache {
    entries: Vec<CacheEntry>,
    dials: Vec<DialRef>,
}

impl SampleDialCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventDialCache {
    stride: usize,
    samples: Vec<SampleDialCache>,
}

impl EventDialCache {
    pub fn new(n_samples: usize, stride: usize) -> Self {
        EventDialCache {
            stride,
            samples: vec![SampleDialCache::default(); n_samples],
        }
    }

    /// Maximum dials per event.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn sample(&self, sample: usize) -> Option<&SampleDialCache> {
        self.samples.get(sample)
    }

    /// Total number of cache entries.
    pub fn n_entries(&self) -> usize {
        self.samples.iter().map(SampleDialCache::len).sum()
    }

    pub fn entry(&self, sample: usize, event: usize) -> Option<&CacheEntry> {
        self.samples.get(sample)?.entries.get(event)
    }

    /// Dials of `(sample, event)`; empty if the event has none.
    pub fn dials(&self, sample: usize, event: usize) -> &[DialRef] {
        let Some(block) = self.samples.get(sample) else {
            return &[];
        };
        let Some(entry) = block.entries.get(event) else {
            return &[];
        };
        let start = event * self.stride;
        &block.dials[start..start + entry.n_dials]
    }

    /// Append `count` empty entries to a sample's block and return the index
    /// of the first.
    pub fn reserve(&mut self, sample: usize, count: usize) -> usize {
        let stride = self.stride;
        let block = &mut self.samples[sample];
        let start = block.entries.len();
        block.entries.reserve_exact(count);
        block.entries.resize(start + count, CacheEntry::EMPTY);
        block.dials.reserve_exact(count * stride);
        block.dials.resize((start + count) * stride, DialRef::default());
        start
    }

    /// Mutable entries and dial slots of a sample from `start` on.
    pub fn tail_mut(&mut self, sample: usize, start: usize) -> (&mut [CacheEntry], &mut [DialRef]) {
        let stride = self.stride;
        let block = &mut self.samples[sample];
        (&mut block.entries[start..], &mut block.dials[start * stride..])
    }

    /// Tails of several samples at once; `starts[sample]` selects which.
    pub fn tails_mut(
        &mut self,
        starts: &[Option<usize>],
    ) -> Vec<Option<(&mut [CacheEntry], &mut [DialRef])>> {
        let stride = self.stride;
        self.samples
            .iter_mut()
            .enumerate()
            .map(|(i, block)| {
                starts.get(i).copied().flatten().map(|start| {
                    (
                        &mut block.entries[start..],
                        &mut block.dials[start * stride..],
                    )
                })
            })
            .collect()
    }

    /// Move `len` entries from `from` down to `to` (`to <= from`), fixing
    /// their event indices and shifting per-event slots by `slot_offsets`
    /// (indexed by collection; binned collections have offset 0).
    pub fn move_down(
        &mut self,
        sample: usize,
        from: usize,
        to: usize,
        len: usize,
        slot_offsets: &[usize],
    ) {
        let stride = self.stride;
        let block = &mut self.samples[sample];
        for i in 0..len {
            let mut entry = block.entries[from + i];
            entry.event = to + i;
            block.entries[to + i] = entry;

            let src = (from + i) * stride;
            let dst = (to + i) * stride;
            for k in 0..entry.n_dials {
                let mut d = block.dials[src + k];
                d.slot += slot_offsets.get(d.collection).copied().unwrap_or(0);
                block.dials[dst + k] = d;
            }
        }
    }

    pub fn shrink_to(&mut self, sample: usize, len: usize) {
        let stride = self.stride;
        let block = &mut self.samples[sample];
        block.entries.truncate(len);
        block.entries.shrink_to_fit();
        block.dials.truncate(len * stride);
        block.dials.shrink_to_fit();
    }

    pub fn clear(&mut self) {
        for block in &mut self.samples {
            block.entries.clear();
            block.dials.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_write_and_lookup() {
        let mut cache = EventDialCache::new(2, 3);
        let start = cache.reserve(1, 2);
        assert_eq!(start, 0);
        {
            let (entries, dials) = cache.tail_mut(1, 0);
            entries[1] = CacheEntry {
                sample: 1,
                event: 1,
                n_dials: 2,
            };
            dials[3] = DialRef { collection: 0, slot: 4 };
            dials[4] = DialRef { collection: 2, slot: 0 };
        }
        assert_eq!(cache.dials(1, 1).len(), 2);
        assert_eq!(cache.dials(1, 0).len(), 0);
        assert_eq!(cache.dials(0, 0).len(), 0);
        assert_eq!(cache.n_entries(), 2);
    }

    #[test]
    fn move_down_rebases_slots() {
        let mut cache = EventDialCache::new(1, 2);
        cache.reserve(0, 3);
        {
            let (entries, dials) = cache.tail_mut(0, 0);
            entries[2] = CacheEntry {
                sample: 0,
                event: 0,
                n_dials: 1,
            };
            dials[4] = DialRef { collection: 1, slot: 0 };
        }
        cache.move_down(0, 2, 0, 1, &[0, 5]);
        cache.shrink_to(0, 1);
        assert_eq!(cache.n_entries(), 1);
        assert_eq!(cache.entry(0, 0).unwrap().event, 0);
        assert_eq!(cache.dials(0, 0), &[DialRef { collection: 1, slot: 5 }]);
    }
}
