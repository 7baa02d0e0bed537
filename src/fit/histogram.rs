//! Per-bin sums of event weights.

use crate::domain::event::Event;
use crate::domain::sample::SampleSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleHistogram {
    pub sample: String,
    pub mc: Vec<f64>,
    pub data: Vec<f64>,
}

impl SampleHistogram {
    pub fn total_mc(&self) -> f64 {
        self.mc.iter().sum()
    }

    pub fn total_data(&self) -> f64 {
        self.data.iter().sum()
    }
}

fn sum_into(bins: &mut [f64], events: &[Event]) {
    for event in events {
        if let Some(slot) = event.bin.and_then(|b| bins.get_mut(b)) {
            *slot += event.weight;
        }
    }
}

/// One histogram per enabled sample, binned like the sample.
pub fn fill_histograms(samples: &SampleSet) -> Vec<SampleHistogram> {
    samples
        .samples()
        .iter()
        .filter(|s| s.enabled)
        .map(|s| {
            let n = s.binning.len();
            let mut h = SampleHistogram {
                sample: s.name.clone(),
                mc: vec![0.0; n],
                data: vec![0.0; n],
            };
            sum_into(&mut h.mc, s.mc.events());
            sum_into(&mut h.data, s.data.events());
            h
        })
        .collect()
}
