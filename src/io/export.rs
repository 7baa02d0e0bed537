//! Export stored events to CSV, one file per sample and container.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::event::EventContainer;
use crate::domain::sample::SampleSet;
use crate::domain::types::ContainerTarget;
use crate::error::Result;

/// Write `<dir>/<sample>_<mc|data>.csv` for every non-empty container and
/// return the written paths.
pub fn write_events_csv(dir: &Path, samples: &SampleSet) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for sample in samples.samples() {
        for target in [ContainerTarget::Mc, ContainerTarget::Data] {
            let container = sample.container(target);
            if container.is_empty() {
                continue;
            }
            let tag = match target {
                ContainerTarget::Mc => "mc",
                ContainerTarget::Data => "data",
            };
            let path = dir.join(format!("{}_{tag}.csv", file_stem(&sample.name)));
            write_container(&path, &sample.name, container)?;
            info!(path = %path.display(), events = container.len(), "events exported");
            written.push(path);
        }
    }
    Ok(written)
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_container(path: &Path, sample: &str, container: &EventContainer) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let names: Vec<String> = container
        .events()
        .first()
        .map(|e| e.names.to_vec())
        .unwrap_or_default();

    let mut header = vec![
        "sample".to_string(),
        "bin".to_string(),
        "dataset".to_string(),
        "entry".to_string(),
        "nominal_weight".to_string(),
        "base_weight".to_string(),
        "weight".to_string(),
    ];
    header.extend(names.iter().cloned());
    writer.write_record(&header)?;

    for e in container.events() {
        let mut row = vec![
            sample.to_string(),
            e.bin.map(|b| b.to_string()).unwrap_or_default(),
            e.dataset.to_string(),
            e.entry.to_string(),
            format!("{:.10}", e.nominal_weight),
            format!("{:.10}", e.base_weight),
            format!("{:.10}", e.weight),
        ];
        row.extend(names.iter().map(|n| e.value(n).map(|v| v.to_string()).unwrap_or_default()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
