//! Stored events and their containers.

use std::sync::Arc;

/// One accepted record, stored in exactly one sample.
///
/// Filled once during the fill pass. Afterwards only `weight` changes, and
/// only through reweighting.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Entry of the record source this event came from.
    pub entry: usize,
    pub dataset: usize,
    pub sample: usize,
    /// `None` only for placeholders.
    pub bin: Option<usize>,
    pub nominal_weight: f64,
    /// Nominal weight times the dataset normalisation.
    pub base_weight: f64,
    pub weight: f64,
    /// Storage variables, ordered like `names`.
    pub values: Vec<f64>,
    pub names: Arc<[String]>,
}

impl Event {
    /// Layout template used to pre-size containers.
    pub fn placeholder(names: Arc<[String]>) -> Self {
        Event {
            entry: usize::MAX,
            dataset: usize::MAX,
            sample: usize::MAX,
            bin: None,
            nominal_weight: 0.0,
            base_weight: 0.0,
            weight: 0.0,
            values: vec![0.0; names.len()],
            names,
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Growable event storage with an explicit reserve/shrink contract.
#[derive(Debug, Clone, Default)]
pub struct EventContainer {
    events: Vec<Event>,
}

impl EventContainer {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut [Event] {
        &mut self.events
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append `count` copies of `template` and return the index of the first.
    pub fn reserve_placeholders(&mut self, template: &Event, count: usize) -> usize {
        let start = self.events.len();
        self.events.reserve_exact(count);
        self.events.resize(start + count, template.clone());
        start
    }

    /// Mutable view of everything from `start` on.
    pub fn tail_mut(&mut self, start: usize) -> &mut [Event] {
        &mut self.events[start..]
    }

    /// Move `len` events from `from` down to `to` (`to <= from`).
    pub fn move_down(&mut self, from: usize, to: usize, len: usize) {
        if from == to {
            return;
        }
        for i in 0..len {
            self.events.swap(to + i, from + i);
        }
    }

    /// Drop everything past `len` and release the spare capacity.
    pub fn shrink_to(&mut self, len: usize) {
        self.events.truncate(len);
        self.events.shrink_to_fit();
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
