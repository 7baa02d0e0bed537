//! Debug bundle writer for inspecting a load run.
//!
//! One markdown file holding the resolved configuration, every dataset's
//! variable table and counts, and the first cached dial lists per sample.

use std::fmt::Write as _;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::domain::types::LoadConfig;
use crate::error::{AppError, Result};
use crate::load::LoadOutput;
use crate::report::{format_dial_usage, format_selected_counts, format_variable_table};

/// Cache entries listed per sample.
const CACHE_PREVIEW: usize = 10;

pub fn write_debug_bundle(dir: &Path, output: &LoadOutput, config: &LoadConfig) -> Result<PathBuf> {
    create_dir_all(dir)?;
    let now = Local::now();
    let path = dir.join(format!("evload_debug_{}.md", now.format("%Y%m%d_%H%M%S")));
    let text = render(output, config, &now.to_rfc3339())
        .map_err(|e| AppError::config(format!("cannot render debug bundle: {e}")))?;
    write(&path, text)?;
    Ok(path)
}

fn render(output: &LoadOutput, config: &LoadConfig, generated: &str) -> std::result::Result<String, std::fmt::Error> {
    let mut md = String::new();
    writeln!(md, "# evload debug bundle")?;
    writeln!(md, "- generated: {generated}")?;
    writeln!(md, "- threads (config): {}", config.threads)?;
    writeln!(md, "- toy_index: {:?}", config.toy_index)?;
    writeln!(md, "- cache stride: {}", output.cache.stride())?;

    writeln!(md, "\n## Counts\n```")?;
    md.push_str(&format_selected_counts(&output.reports));
    writeln!(md, "```")?;

    writeln!(md, "\n## Variables\n```")?;
    for r in &output.reports {
        md.push_str(&format_variable_table(r));
    }
    writeln!(md, "```")?;

    writeln!(md, "\n## Dials\n```")?;
    md.push_str(&format_dial_usage(&output.reports));
    writeln!(md, "```")?;

    writeln!(md, "\n## Collections")?;
    writeln!(md, "| index | name | parameter | mode | dials |")?;
    writeln!(md, "| - | - | - | - | - |")?;
    for c in &output.collections {
        writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            c.index,
            c.name,
            c.parameter,
            if c.is_binned() { "binned" } else { "per-event" },
            c.n_dials()
        )?;
    }

    writeln!(md, "\n## Cache preview")?;
    for sample in output.samples.samples() {
        let Some(block) = output.cache.sample(sample.index) else {
            continue;
        };
        if block.is_empty() {
            continue;
        }
        writeln!(md, "\n### {}", sample.name)?;
        writeln!(md, "| event | entry | bin | dials |")?;
        writeln!(md, "| - | - | - | - |")?;
        for (i, event) in sample.mc.events().iter().enumerate().take(CACHE_PREVIEW) {
            let dials: Vec<String> = output
                .cache
                .dials(sample.index, i)
                .iter()
                .map(|d| format!("{}:{}", d.collection, d.slot))
                .collect();
            writeln!(
                md,
                "| {i} | {} | {} | {} |",
                event.entry,
                event.bin.map_or("-".to_string(), |b| b.to_string()),
                dials.join(" ")
            )?;
        }
    }

    writeln!(md, "\n## Configuration\n```json")?;
    md.push_str(&serde_json::to_string_pretty(config).map_err(|_| std::fmt::Error)?);
    writeln!(md, "\n```")?;
    Ok(md)
}
