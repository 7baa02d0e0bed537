//! Samples: classification targets owning their events.

use crate::domain::binning::Binning;
use crate::domain::event::EventContainer;
use crate::domain::types::{ContainerTarget, SampleConfig, substitute_toy};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Sample {
    pub index: usize,
    pub name: String,
    pub enabled: bool,
    pub datasets: Vec<String>,
    pub selection: Option<String>,
    pub var_selection: Option<String>,
    pub binning: Binning,
    pub mc: EventContainer,
    pub data: EventContainer,
}

impl Sample {
    pub fn from_config(index: usize, cfg: &SampleConfig, toy_index: Option<usize>) -> Result<Self> {
        let selection = cfg
            .selection
            .as_ref()
            .and_then(|f| f.as_selection())
            .map(|s| substitute_toy(&s, toy_index))
            .transpose()?;
        let var_selection = cfg
            .var_selection
            .as_ref()
            .and_then(|f| f.as_selection())
            .map(|s| substitute_toy(&s, toy_index))
            .transpose()?;

        Ok(Sample {
            index,
            name: cfg.name.clone(),
            enabled: cfg.enabled,
            datasets: cfg.datasets.clone(),
            selection,
            var_selection,
            binning: Binning::from_config(&cfg.binning),
            mc: EventContainer::default(),
            data: EventContainer::default(),
        })
    }

    /// Enabled and either unrestricted or listing `dataset`.
    pub fn applies_to(&self, dataset: &str) -> bool {
        self.enabled && (self.datasets.is_empty() || self.datasets.iter().any(|d| d == dataset))
    }

    pub fn container(&self, target: ContainerTarget) -> &EventContainer {
        match target {
            ContainerTarget::Mc => &self.mc,
            ContainerTarget::Data => &self.data,
        }
    }

    pub fn container_mut(&mut self, target: ContainerTarget) -> &mut EventContainer {
        match target {
            ContainerTarget::Mc => &mut self.mc,
            ContainerTarget::Data => &mut self.data,
        }
    }
}

/// All samples of a run, indexed by declaration position (disabled ones
/// included, so indices match the configuration).
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn from_configs(configs: &[SampleConfig], toy_index: Option<usize>) -> Result<Self> {
        let mut samples: Vec<Sample> = Vec::with_capacity(configs.len());
        for (i, cfg) in configs.iter().enumerate() {
            if samples.iter().any(|s| s.name == cfg.name) {
                return Err(AppError::config(format!("duplicate sample name '{}'", cfg.name)));
            }
            samples.push(Sample::from_config(i, cfg, toy_index)?);
        }
        Ok(SampleSet { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    pub fn find(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name == name)
    }

    pub fn n_events(&self, target: ContainerTarget) -> usize {
        self.samples.iter().map(|s| s.container(target).len()).sum()
    }

    /// Drop every stored event, keeping samples and binnings.
    pub fn clear_events(&mut self) {
        for s in &mut self.samples {
            s.mc.clear();
            s.data.clear();
        }
    }
}
