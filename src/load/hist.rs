//! Hist-content datasets: one observed event per sample bin.
//!
//! Instead of reading records, each bin of an applicable sample becomes one
//! event placed at the bin centre, weighted by the content of the histogram
//! bin holding that centre.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::event::Event;
use crate::domain::sample::Sample;
use crate::domain::types::{ContainerTarget, HistContentConfig};
use crate::error::{AppError, Result};
use crate::io::hist::{Hist, read_hist_file};

/// Per-sample outcome of a hist-content load.
#[derive(Debug, Clone, PartialEq)]
pub struct HistFillReport {
    pub sample: String,
    pub hist: Option<String>,
    pub events: usize,
    /// Bin centres outside the histogram; stored with zero weight.
    pub outside: usize,
}

pub fn load_hist_content(
    dataset: &str,
    dataset_index: usize,
    target: ContainerTarget,
    cfg: &HistContentConfig,
    samples: &mut [Sample],
    sample_ids: &[usize],
) -> Result<Vec<HistFillReport>> {
    if target == ContainerTarget::Mc {
        return Err(AppError::config(format!(
            "dataset '{dataset}': hist content can only fill the data container"
        )));
    }
    warn!(dataset, file = %cfg.file.display(), "creating one event per bin from hist content");
    let file = read_hist_file(&cfg.file)?;

    let mut reports = Vec::with_capacity(sample_ids.len());
    for &id in sample_ids {
        let sample = &mut samples[id];
        let Some(entry) = cfg.samples.iter().find(|s| s.sample == sample.name) else {
            info!(sample = %sample.name, "no histogram listed for sample, skipping");
            reports.push(HistFillReport {
                sample: sample.name.clone(),
                hist: None,
                events: 0,
                outside: 0,
            });
            continue;
        };
        let hist = file.get(&entry.hist).ok_or_else(|| {
            AppError::source_error(
                cfg.file.display().to_string(),
                format!("no hist '{}' for sample '{}'", entry.hist, sample.name),
            )
        })?;
        let axis_vars: Vec<String> = if entry.axis.is_empty() {
            hist.axes.iter().map(|a| a.variable.clone()).collect()
        } else {
            entry.axis.clone()
        };
        if axis_vars.len() != hist.axes.len() {
            return Err(AppError::config(format!(
                "sample '{}': {} axis names for hist '{}' with {} axes",
                sample.name,
                axis_vars.len(),
                entry.hist,
                hist.axes.len()
            )));
        }
        if hist.n_bins() != sample.binning.len() {
            warn!(
                sample = %sample.name,
                hist_bins = hist.n_bins(),
                sample_bins = sample.binning.len(),
                "bin count mismatch between hist and sample binning"
            );
        }

        let report = fill_from_hist(sample, dataset_index, target, hist, &axis_vars, &entry.hist);
        info!(sample = %report.sample, hist = %entry.hist, events = report.events, "filled from hist");
        reports.push(report);
    }
    Ok(reports)
}

fn fill_from_hist(
    sample: &mut Sample,
    dataset_index: usize,
    target: ContainerTarget,
    hist: &Hist,
    axis_vars: &[String],
    hist_name: &str,
) -> HistFillReport {
    let names: Arc<[String]> = Arc::from(sample.binning.variables());
    let template = Event::placeholder(names.clone());
    let n_bins = sample.binning.len();
    let name = sample.name.clone();
    let Sample {
        index,
        binning,
        mc,
        data,
        ..
    } = &mut *sample;
    let container = match target {
        ContainerTarget::Mc => mc,
        ContainerTarget::Data => data,
    };
    let start = container.reserve_placeholders(&template, n_bins);

    let mut outside = 0;
    for (b, (bin, event)) in binning
        .bins
        .iter()
        .zip(container.tail_mut(start))
        .enumerate()
    {
        let centre_of = |var: &str| {
            bin.edges
                .iter()
                .find(|e| e.variable == var)
                .map_or(f64::NAN, |e| e.center())
        };
        let point: Vec<f64> = axis_vars.iter().map(|v| centre_of(v.as_str())).collect();
        let content = hist.content_at(&point).unwrap_or_else(|| {
            outside += 1;
            0.0
        });

        event.entry = b;
        event.dataset = dataset_index;
        event.sample = *index;
        event.bin = Some(b);
        event.nominal_weight = content;
        event.base_weight = content;
        event.weight = content;
        for (value, var) in event.values.iter_mut().zip(names.iter()) {
            *value = centre_of(var.as_str());
        }
    }
    if outside > 0 {
        warn!(hist = hist_name, outside, "bin centres outside the histogram");
    }

    HistFillReport {
        sample: name,
        hist: Some(hist_name.to_string()),
        events: n_bins,
        outside,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BinEdgeConfig, HistSampleConfig, SampleConfig};
    use crate::io::hist::{HistAxis, HistFile, write_hist_file};

    fn sample(i: usize, name: &str) -> Sample {
        let edge = |lo: f64, hi: f64| BinEdgeConfig {
            variable: "x".into(),
            range: [lo, hi],
            include_high: false,
        };
        let cfg = SampleConfig {
            name: name.into(),
            enabled: true,
            datasets: vec![],
            selection: None,
            var_selection: None,
            binning: vec![vec![edge(0.0, 1.0)], vec![edge(1.0, 2.0)], vec![edge(2.0, 3.0)]],
        };
        Sample::from_config(i, &cfg, None).unwrap()
    }

    fn hist_file(dir: &std::path::Path) -> std::path::PathBuf {
        let mut file = HistFile::default();
        file.hists.insert(
            "hx".into(),
            Hist {
                axes: vec![HistAxis {
                    variable: "x".into(),
                    edges: vec![0.0, 1.0, 2.0],
                }],
                contents: vec![4.0, 7.0],
            },
        );
        let path = dir.join("hist.json");
        write_hist_file(&path, &file).unwrap();
        path
    }

    fn cfg(path: std::path::PathBuf) -> HistContentConfig {
        HistContentConfig {
            file: path,
            samples: vec![HistSampleConfig {
                sample: "a".into(),
                hist: "hx".into(),
                axis: vec![],
            }],
        }
    }

    #[test]
    fn one_event_per_bin_weighted_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(hist_file(dir.path()));
        let mut samples = vec![sample(0, "a"), sample(1, "b")];
        let reports =
            load_hist_content("d", 0, ContainerTarget::Data, &cfg, &mut samples, &[0, 1]).unwrap();

        assert_eq!(reports[0].events, 3);
        assert_eq!(reports[0].outside, 1);
        assert_eq!(reports[1].hist, None);

        let events = samples[0].data.events();
        assert_eq!(events.len(), 3);
        let weights: Vec<f64> = events.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![4.0, 7.0, 0.0]);
        assert_eq!(events[1].value("x"), Some(1.5));
        assert_eq!(events[2].bin, Some(2));
        assert!(samples[1].data.is_empty());
    }

    #[test]
    fn mc_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(hist_file(dir.path()));
        let mut samples = vec![sample(0, "a")];
        let err = load_hist_content("d", 0, ContainerTarget::Mc, &cfg, &mut samples, &[0]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
