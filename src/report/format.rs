//! Formatted terminal output for a load run.
//!
//! Formatting lives here so pipeline code only produces numbers.

use crate::domain::types::{ContainerTarget, LoadConfig};
use crate::fit::histogram::SampleHistogram;
use crate::fit::propagate::ParameterSet;
use crate::load::{DatasetReport, LoadOutput};

/// Header plus per-dataset totals.
pub fn format_run_summary(output: &LoadOutput, config: &LoadConfig, threads: usize) -> String {
    let mut out = String::new();

    out.push_str("=== evload - event loading ===\n");
    out.push_str(&format!(
        "Samples: {} | dial collections: {} | threads: {threads}\n",
        output.samples.len(),
        output.collections.len(),
    ));
    if let Some(toy) = config.toy_index {
        out.push_str(&format!("Toy index: {toy}\n"));
    }
    out.push_str(&format!(
        "Events: mc={} data={} | cache entries={} (stride {})\n",
        output.n_events(ContainerTarget::Mc),
        output.n_events(ContainerTarget::Data),
        output.cache.n_entries(),
        output.cache.stride(),
    ));

    out.push_str("\nDatasets:\n");
    for r in &output.reports {
        let stored: usize = r.samples.iter().map(|s| s.stored).sum();
        out.push_str(&format!(
            "- {:<20} target={:<4} entries={:<8} rejected={:<8} zero_weight={:<6} stored={stored}\n",
            truncate(&r.name, 20),
            target_label(r.target),
            r.entries,
            r.rejected_by_dataset,
            r.zero_weight,
        ));
    }
    out
}

/// Per-sample selected/stored counts of every dataset.
pub fn format_selected_counts(reports: &[DatasetReport]) -> String {
    let mut out = String::new();
    for r in reports {
        out.push_str(&format!("Selected events, dataset '{}':\n", r.name));
        push_row(
            &mut out,
            format!(
                "{:<24} {:>10} {:>10} {:>10} {:>12}",
                "sample", "selected", "stored", "no_bin", "var_rejected"
            ),
        );
        push_row(
            &mut out,
            format!("{:-<24} {:-<10} {:-<10} {:-<10} {:-<12}", "", "", "", "", ""),
        );
        for s in &r.samples {
            push_row(
                &mut out,
                format!(
                    "{:<24} {:>10} {:>10} {:>10} {:>12}",
                    truncate(&s.sample, 24),
                    s.selected,
                    s.stored,
                    s.no_bin,
                    s.var_rejected
                ),
            );
        }
        out.push('\n');
    }
    out
}

/// How each indexing variable of a dataset was resolved.
pub fn format_variable_table(report: &DatasetReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Variables, dataset '{}':\n", report.name));
    push_row(
        &mut out,
        format!(
            "{:<20} {:<28} {:<10} {:<9} {}",
            "variable", "expression", "shape", "transform", "requested for"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<20} {:-<28} {:-<10} {:-<9} {:-<13}", "", "", "", "", ""),
    );
    for v in &report.variables {
        let kinds: Vec<&str> = v.requested_for.iter().map(|k| k.label()).collect();
        let transform = if v.reused_for_storage() {
            "reused"
        } else if v.produced_by_transform {
            "yes"
        } else {
            ""
        };
        push_row(
            &mut out,
            format!(
                "{:<20} {:<28} {:<10} {:<9} {}",
                truncate(&v.name, 20),
                truncate(&v.expression, 28),
                v.shape.map(|s| s.label()).unwrap_or_else(|| "formula".to_string()),
                transform,
                kinds.join(",")
            ),
        );
    }
    out
}

/// Dial slot usage per collection and transform evaluation counts.
pub fn format_dial_usage(reports: &[DatasetReport]) -> String {
    let mut out = String::new();
    for r in reports {
        if r.dial_usage.is_empty() && r.transforms.is_empty() {
            continue;
        }
        out.push_str(&format!("Dials, dataset '{}':\n", r.name));
        if !r.dial_usage.is_empty() {
            push_row(
                &mut out,
                format!(
                    "{:<24} {:>10} {:>10} {:>10} {:>10}",
                    "collection", "assigned", "cond_false", "no_bin", "no_dial"
                ),
            );
            push_row(
                &mut out,
                format!("{:-<24} {:-<10} {:-<10} {:-<10} {:-<10}", "", "", "", "", ""),
            );
            for (name, u) in &r.dial_usage {
                push_row(
                    &mut out,
                    format!(
                        "{:<24} {:>10} {:>10} {:>10} {:>10}",
                        truncate(name, 24),
                        u.assigned,
                        u.condition_false,
                        u.no_bin,
                        u.no_dial
                    ),
                );
            }
        }
        for (output, n) in &r.transforms {
            out.push_str(&format!("  transform {output}: {n} evaluations\n"));
        }
        out.push('\n');
    }
    out
}

/// Per-bin MC and data sums at the given parameter values.
pub fn format_histograms(hists: &[SampleHistogram], params: &ParameterSet) -> String {
    let mut out = String::new();
    if !params.is_empty() {
        let parts: Vec<String> = params.iter().map(|(n, v)| format!("{n}={v:.4}")).collect();
        out.push_str(&format!("Parameters: {}\n", parts.join(", ")));
    }
    for h in hists {
        out.push_str(&format!(
            "Sample '{}': mc={:.3} data={:.3}\n",
            h.sample,
            h.total_mc(),
            h.total_data()
        ));
        for (b, (mc, data)) in h.mc.iter().zip(&h.data).enumerate() {
            push_row(&mut out, format!("  bin {b:>3} {mc:>14.4} {data:>14.4}"));
        }
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn target_label(target: ContainerTarget) -> &'static str {
    match target {
        ContainerTarget::Mc => "mc",
        ContainerTarget::Data => "data",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::SampleFillRow;
    use crate::load::indexer::DialUsage;

    fn report() -> DatasetReport {
        DatasetReport {
            name: "mc".into(),
            entries: 4,
            samples: vec![SampleFillRow {
                sample: "numu_cc0pi".into(),
                selected: 3,
                stored: 2,
                no_bin: 1,
                var_rejected: 0,
            }],
            dial_usage: vec![("xsec".into(), DialUsage {
                assigned: 2,
                ..DialUsage::default()
            })],
            transforms: vec![("Erec".into(), 3)],
            ..DatasetReport::default()
        }
    }

    #[test]
    fn counts_table_lists_samples() {
        let text = format_selected_counts(&[report()]);
        assert!(text.contains("numu_cc0pi"));
        let row = text.lines().find(|l| l.starts_with("numu_cc0pi")).unwrap();
        let cols: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cols, vec!["numu_cc0pi", "3", "2", "1", "0"]);
    }

    #[test]
    fn usage_table_includes_transforms() {
        let text = format_dial_usage(&[report()]);
        assert!(text.contains("xsec"));
        assert!(text.contains("transform Erec: 3 evaluations"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
