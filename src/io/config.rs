//! Load configuration documents.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::domain::types::LoadConfig;
use crate::error::{AppError, Result};

pub fn read_config(path: &Path) -> Result<LoadConfig> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("cannot read config '{}': {e}", path.display())))?;
    let config: LoadConfig = serde_json::from_str(&text)
        .map_err(|e| AppError::config(format!("config '{}': {e}", path.display())))?;
    debug!(
        path = %path.display(),
        samples = config.samples.len(),
        datasets = config.datasets.len(),
        collections = config.dial_collections.len(),
        "config read"
    );
    Ok(config)
}

pub fn write_config(path: &Path, config: &LoadConfig) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
