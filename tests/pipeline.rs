use std::sync::Arc;

use serde_json::json;

use evload::app::pipeline::{RunOptions, run_load_with_sources};
use evload::data::{SynthConfig, generate_table};
use evload::domain::types::{ContainerTarget, LoadConfig};
use evload::error::AppError;
use evload::load::{LoadOutput, Loader, PipelineContext};
use evload::source::{Column, ColumnTable, RecordObject, RecordSource, TableSource, write_json_table};

fn config(value: serde_json::Value) -> LoadConfig {
    serde_json::from_value(value).unwrap()
}

fn scalar_source(name: &str, columns: Vec<(&str, Vec<f64>)>) -> Arc<dyn RecordSource> {
    let table = ColumnTable::from_columns(
        columns
            .into_iter()
            .map(|(n, v)| (n, Column::Scalar(v)))
            .collect(),
    )
    .unwrap();
    Arc::new(TableSource::new(name, table))
}

fn load(cfg: &LoadConfig, threads: usize, source: Arc<dyn RecordSource>) -> evload::error::Result<LoadOutput> {
    let ctx = PipelineContext::new(threads, false)?;
    Loader::new(cfg, &ctx).with_source("mc", source).run()
}

fn bins(output: &LoadOutput, sample: usize) -> Vec<Option<usize>> {
    output.samples.samples()[sample]
        .mc
        .events()
        .iter()
        .map(|e| e.bin)
        .collect()
}

fn x_binning() -> serde_json::Value {
    json!([
        [{"variable": "x", "range": [0.0, 1.0]}],
        [{"variable": "x", "range": [1.0, 2.0]}]
    ])
}

#[test]
fn scenario_a_selection_and_binning() {
    let cfg = config(json!({
        "samples": [{"name": "s", "selection": "x > 0", "binning": x_binning()}],
        "datasets": [{"name": "mc"}]
    }));
    let src = scalar_source("a", vec![("x", vec![-1.0, 0.5, 1.5, 1.5])]);
    let out = load(&cfg, 1, src).unwrap();

    assert_eq!(out.samples.samples()[0].mc.len(), 3);
    assert_eq!(bins(&out, 0), vec![Some(0), Some(1), Some(1)]);
    let entries: Vec<usize> = out.samples.samples()[0].mc.events().iter().map(|e| e.entry).collect();
    assert_eq!(entries, vec![1, 2, 3]);
    assert_eq!(out.reports[0].samples[0].selected, 3);
}

#[test]
fn scenario_b_zero_weight_skipped_negative_weight_fatal() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "datasets": [{"name": "mc", "nominal_weight": "w"}]
    }));

    let ok = load(&cfg, 1, scalar_source("b", vec![("w", vec![1.0, 0.0])])).unwrap();
    let events = ok.samples.samples()[0].mc.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entry, 0);
    assert!((events[0].weight - 1.0).abs() < 1e-12);
    assert_eq!(ok.reports[0].zero_weight, 1);

    let err = load(&cfg, 1, scalar_source("b", vec![("w", vec![1.0, 0.0, -1.0])])).unwrap_err();
    assert!(matches!(err, AppError::NegativeWeight { entry: 2, .. }));
    assert_eq!(err.exit_code(), 3);
}

fn flat_graph(y: f64) -> RecordObject {
    RecordObject::Graph(vec![[0.0, y], [2.0, y]])
}

#[test]
fn scenario_c_per_event_dial_follows_index_formula() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "dial_collections": [{
            "name": "pe",
            "parameter": "p",
            "per_event": {"field": "spl", "kind": "graph"}
        }],
        "parameters": [{"name": "p", "nominal": 1.0}],
        "datasets": [{"name": "mc", "dial_index": "idx"}]
    }));
    let table = ColumnTable::from_columns(vec![
        ("idx", Column::Scalar(vec![0.0, 1.0])),
        (
            "spl",
            Column::Object(vec![
                RecordObject::Array(vec![flat_graph(10.0), flat_graph(11.0)]),
                RecordObject::Array(vec![flat_graph(20.0), flat_graph(21.0)]),
            ]),
        ),
    ])
    .unwrap();
    let out = load(&cfg, 1, Arc::new(TableSource::new("c", table))).unwrap();

    let collection = &out.collections[0];
    assert_eq!(collection.n_dials(), 2);
    let expected = [10.0, 21.0];
    for (event, want) in expected.iter().enumerate() {
        let dials = out.cache.dials(0, event);
        assert_eq!(dials.len(), 1);
        assert_eq!(dials[0].collection, 0);
        let got = collection.response(dials[0].slot, 1.0);
        assert!((got - want).abs() < 1e-12, "event {event}: {got} != {want}");
    }
}

#[test]
fn scenario_d_unconsumed_transform_is_never_evaluated() {
    let with_binning = |var: &str| {
        config(json!({
            "samples": [{"name": "s", "binning": [[{"variable": var, "range": [0.0, 100.0]}]]}],
            "datasets": [{
                "name": "mc",
                "transforms": [{"output": "y", "formula": "x * 2"}]
            }]
        }))
    };
    let src = || scalar_source("d", vec![("x", vec![1.0, 2.0, 3.0])]);

    let consumed = load(&with_binning("y"), 1, src()).unwrap();
    assert_eq!(consumed.reports[0].transforms, vec![("y".to_string(), 3)]);
    assert_eq!(consumed.samples.samples()[0].mc.len(), 3);

    let unused = load(&with_binning("x"), 1, src()).unwrap();
    assert_eq!(unused.reports[0].transforms, vec![("y".to_string(), 0)]);
}

#[test]
fn overlapping_bins_first_declared_wins() {
    let cfg = config(json!({
        "samples": [{"name": "s", "binning": [
            [{"variable": "x", "range": [0.0, 2.0]}],
            [{"variable": "x", "range": [1.0, 3.0]}]
        ]}],
        "datasets": [{"name": "mc"}]
    }));
    let out = load(&cfg, 1, scalar_source("o", vec![("x", vec![1.5, 2.5, 0.5])])).unwrap();
    assert_eq!(bins(&out, 0), vec![Some(0), Some(1), Some(0)]);
}

#[test]
fn entry_can_land_in_several_samples_and_bin_failure_is_per_sample() {
    let cfg = config(json!({
        "samples": [
            {"name": "narrow", "binning": [[{"variable": "x", "range": [0.0, 1.0]}]]},
            {"name": "wide", "binning": [[{"variable": "x", "range": [0.0, 10.0]}]]}
        ],
        "datasets": [{"name": "mc"}]
    }));
    let out = load(&cfg, 1, scalar_source("m", vec![("x", vec![0.5, 5.0])])).unwrap();
    assert_eq!(out.samples.samples()[0].mc.len(), 1);
    assert_eq!(out.samples.samples()[1].mc.len(), 2);
    assert_eq!(out.reports[0].samples[0].no_bin, 1);
}

fn synth_config() -> LoadConfig {
    config(json!({
        "storage_vars": ["Enu", "px[1]"],
        "samples": [
            {
                "name": "low",
                "selection": "Enu < 2",
                "binning": [
                    [{"variable": "Enu", "range": [0.0, 1.0]}],
                    [{"variable": "Enu", "range": [1.0, 2.0]}]
                ]
            },
            {
                "name": "jets",
                "selection": ["nJets >= 1", "x > -1"],
                "var_selection": "Erec > 0.5",
                "binning": [
                    [{"variable": "nJets", "range": [1.0, 1.0]}],
                    [{"variable": "nJets", "range": [2.0, 10.0]}]
                ]
            }
        ],
        "dial_collections": [
            {
                "name": "energy_scale",
                "parameter": "escale",
                "binning": [
                    [{"variable": "Enu", "range": [0.0, 1.5]}],
                    [{"variable": "Enu", "range": [1.5, 100.0]}]
                ],
                "bin_dials": [
                    {"kind": "graph", "points": [[0.0, 0.5], [2.0, 1.5]]},
                    {"kind": "normalization"}
                ]
            },
            {
                "name": "norm_forward",
                "parameter": "norm",
                "apply_condition": "x > 0",
                "binning": [[]]
            },
            {
                "name": "response",
                "parameter": "resp",
                "per_event": {"field": "spl", "kind": "spline"}
            },
            {
                "name": "disabled",
                "enabled": false,
                "parameter": "norm"
            }
        ],
        "parameters": [
            {"name": "escale", "nominal": 1.0},
            {"name": "norm", "nominal": 1.0},
            {"name": "resp", "nominal": 1.0}
        ],
        "datasets": [{
            "name": "mc",
            "nominal_weight": "w",
            "dial_index": "idx",
            "transforms": [{"output": "Erec", "formula": "Enu * 0.9 + px[0] * 0.01"}]
        }]
    }))
}

fn synth_source(entries: usize) -> Arc<dyn RecordSource> {
    let table = generate_table(&SynthConfig {
        entries,
        seed: 7,
        response_sigma: 0.2,
    })
    .unwrap();
    Arc::new(TableSource::new("synth", table))
}

type Snapshot = Vec<(usize, Option<usize>, u64, Vec<u64>, Vec<(usize, usize)>)>;

fn snapshot(out: &LoadOutput) -> Vec<Snapshot> {
    out.samples
        .samples()
        .iter()
        .map(|s| {
            s.mc.events()
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    (
                        e.entry,
                        e.bin,
                        e.base_weight.to_bits(),
                        e.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                        out.cache
                            .dials(s.index, i)
                            .iter()
                            .map(|d| (d.collection, d.slot))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect()
        })
        .collect()
}

#[test]
fn results_do_not_depend_on_thread_count() {
    let cfg = synth_config();
    let source = synth_source(997);
    let reference = load(&cfg, 1, Arc::clone(&source)).unwrap();
    assert!(reference.samples.samples()[0].mc.len() > 0);
    assert!(reference.samples.samples()[1].mc.len() > 0);

    for threads in [2, 3, 8] {
        let out = load(&cfg, threads, Arc::clone(&source)).unwrap();
        assert_eq!(snapshot(&out), snapshot(&reference), "threads = {threads}");
        assert_eq!(out.collections[2].arena, reference.collections[2].arena);
        assert_eq!(
            out.reports[0].samples, reference.reports[0].samples,
            "threads = {threads}"
        );
    }
}

#[test]
fn repeated_runs_are_identical() {
    let cfg = synth_config();
    let source = synth_source(500);
    let first = load(&cfg, 4, Arc::clone(&source)).unwrap();
    let second = load(&cfg, 4, Arc::clone(&source)).unwrap();
    assert_eq!(snapshot(&first), snapshot(&second));
}

#[test]
fn storage_and_cache_never_exceed_reservation() {
    let cfg = synth_config();
    let out = load(&cfg, 3, synth_source(400)).unwrap();

    assert_eq!(out.cache.stride(), 3);
    for (row, sample) in out.reports[0].samples.iter().zip(out.samples.samples()) {
        assert!(row.stored <= row.selected);
        assert_eq!(row.stored, sample.mc.len());
        assert_eq!(out.cache.sample(sample.index).unwrap().len(), sample.mc.len());
    }
    for sample in out.samples.samples() {
        for (i, event) in sample.mc.events().iter().enumerate() {
            let entry = out.cache.entry(sample.index, i).unwrap();
            assert_eq!(entry.sample, sample.index);
            assert_eq!(entry.event, i);
            assert!(entry.n_dials <= out.cache.stride());
            assert_eq!(event.sample, sample.index);
            assert!(event.bin.is_some());
        }
    }
    let per_event: usize = out.reports[0]
        .dial_usage
        .iter()
        .find(|(n, _)| n == "response")
        .map(|(_, u)| u.assigned)
        .unwrap();
    assert_eq!(per_event, out.collections[2].arena.len());
}

#[test]
fn var_selection_uses_transform_output() {
    let cfg = synth_config();
    let out = load(&cfg, 2, synth_source(300)).unwrap();
    for event in out.samples.samples()[1].mc.events() {
        let enu = event.value("Enu").unwrap();
        assert!(enu * 0.9 > 0.4, "event {} with Enu {enu}", event.entry);
    }
    assert!(out.reports[0].samples[1].var_rejected > 0);
    let erec = out.reports[0]
        .variables
        .iter()
        .find(|v| v.name == "Erec")
        .unwrap();
    assert!(erec.produced_by_transform);
}

#[test]
fn apply_condition_and_unconditional_bin() {
    let cfg = synth_config();
    let source = synth_source(200);
    let out = load(&cfg, 1, Arc::clone(&source)).unwrap();
    let reader_table = generate_table(&SynthConfig {
        entries: 200,
        seed: 7,
        response_sigma: 0.2,
    })
    .unwrap();
    let Some(Column::Scalar(xs)) = reader_table.column("x") else {
        panic!("x column");
    };

    for sample in out.samples.samples() {
        for (i, event) in sample.mc.events().iter().enumerate() {
            let has_norm = out
                .cache
                .dials(sample.index, i)
                .iter()
                .any(|d| d.collection == 1 && d.slot == 0);
            assert_eq!(has_norm, xs[event.entry] > 0.0);
        }
    }
}

#[test]
fn reweighting_through_the_cache() {
    let cfg = synth_config();
    let opts = RunOptions {
        single_thread: false,
        storage_vars: vec![],
        params: vec!["norm=2".into()],
    };
    let run = run_load_with_sources(&cfg, &opts, vec![("mc".into(), synth_source(300))]).unwrap();
    let out = &run.output;

    for sample in out.samples.samples() {
        for (i, event) in sample.mc.events().iter().enumerate() {
            let mut expected = event.base_weight;
            for d in out.cache.dials(sample.index, i) {
                let x = if d.collection == 1 { 2.0 } else { 1.0 };
                expected *= out.collections[d.collection].response(d.slot, x);
            }
            assert!((event.weight - expected).abs() < 1e-9);
        }
    }
    let total_mc: f64 = run.histograms.iter().map(|h| h.total_mc()).sum();
    let total_weight: f64 = out
        .samples
        .samples()
        .iter()
        .flat_map(|s| s.mc.events())
        .map(|e| e.weight)
        .sum();
    assert!((total_mc - total_weight).abs() < 1e-6);
}

#[test]
fn unknown_parameter_is_config_error() {
    let mut cfg = synth_config();
    cfg.parameters.retain(|p| p.name != "resp");
    let err = run_load_with_sources(&cfg, &RunOptions::default(), vec![("mc".into(), synth_source(50))])
        .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unresolvable_bin_variable_is_fatal() {
    let cfg = config(json!({
        "samples": [{"name": "s", "binning": [[{"variable": "missing", "range": [0.0, 1.0]}]]}],
        "datasets": [{"name": "mc"}]
    }));
    let err = load(&cfg, 1, scalar_source("u", vec![("x", vec![1.0])])).unwrap_err();
    assert!(matches!(err, AppError::UnresolvedVariable { ref name, .. } if name == "missing"));
}

#[test]
fn collection_neither_binned_nor_per_event_is_fatal() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "dial_collections": [{"name": "broken", "parameter": "p"}],
        "datasets": [{"name": "mc"}]
    }));
    let err = load(&cfg, 1, scalar_source("u", vec![("x", vec![1.0])])).unwrap_err();
    assert!(matches!(err, AppError::InvalidDialCollection(ref n) if n == "broken"));
}

#[test]
fn data_datasets_skip_the_cache() {
    let cfg = config(json!({
        "samples": [{"name": "s", "binning": x_binning()}],
        "dial_collections": [{"name": "n", "parameter": "p", "binning": [[]]}],
        "datasets": [
            {"name": "mc"},
            {"name": "obs", "target": "data"}
        ]
    }));
    let ctx = PipelineContext::single_threaded();
    let out = Loader::new(&cfg, &ctx)
        .with_source("mc", scalar_source("m", vec![("x", vec![0.5, 1.5])]))
        .with_source("obs", scalar_source("o", vec![("x", vec![0.2, 0.3, 1.7])]))
        .run()
        .unwrap();

    assert_eq!(out.n_events(ContainerTarget::Mc), 2);
    assert_eq!(out.n_events(ContainerTarget::Data), 3);
    assert_eq!(out.cache.n_entries(), 2);
    assert!(out.reports[1].dial_usage.is_empty());
}

#[test]
fn file_backed_chain_and_hist_content() {
    let dir = tempfile::tempdir().unwrap();
    let part = |name: &str, xs: Vec<f64>| {
        let path = dir.path().join(name);
        let table = ColumnTable::from_columns(vec![("x", Column::Scalar(xs))]).unwrap();
        write_json_table(&path, &table).unwrap();
        path.display().to_string()
    };
    let a = part("a.json", vec![0.5, 1.5]);
    let b = part("b.json", vec![1.2]);
    let csv_path = dir.path().join("c.csv");
    std::fs::write(&csv_path, "x\n0.1\n9.0\n").unwrap();

    let hist_path = dir.path().join("hist.json");
    std::fs::write(
        &hist_path,
        json!({"hists": {"hx": {"axes": [{"variable": "x", "edges": [0.0, 1.0, 2.0]}], "contents": [3.0, 5.0]}}})
            .to_string(),
    )
    .unwrap();

    let cfg = config(json!({
        "samples": [{"name": "s", "binning": x_binning()}],
        "datasets": [
            {"name": "mc", "sources": [a, b, csv_path.display().to_string()]},
            {
                "name": "asimov",
                "target": "data",
                "from_hist_content": {"file": hist_path, "samples": [{"sample": "s", "hist": "hx"}]}
            }
        ]
    }));
    let ctx = PipelineContext::new(2, false).unwrap();
    let out = Loader::new(&cfg, &ctx).run().unwrap();

    let entries: Vec<usize> = out.samples.samples()[0].mc.events().iter().map(|e| e.entry).collect();
    assert_eq!(entries, vec![0, 1, 2, 3]);
    assert_eq!(bins(&out, 0), vec![Some(0), Some(1), Some(1), Some(0)]);

    let data: Vec<f64> = out.samples.samples()[0].data.events().iter().map(|e| e.weight).collect();
    assert_eq!(data, vec![3.0, 5.0]);
}

#[test]
fn missing_source_file_is_source_error() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "datasets": [{"name": "mc", "sources": ["/nonexistent/evload/input.json"]}]
    }));
    let ctx = PipelineContext::single_threaded();
    let err = Loader::new(&cfg, &ctx).run().unwrap_err();
    assert!(matches!(err, AppError::Source { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn array_dials_without_index_formula_use_first_element() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "dial_collections": [{
            "name": "pe",
            "parameter": "p",
            "per_event": {"field": "spl", "kind": "graph"}
        }],
        "datasets": [{"name": "mc"}]
    }));
    let table = ColumnTable::from_columns(vec![(
        "spl",
        Column::Object(vec![
            RecordObject::Array(vec![flat_graph(3.0), flat_graph(4.0)]),
            RecordObject::Array(vec![flat_graph(5.0), flat_graph(6.0)]),
        ]),
    )])
    .unwrap();
    let out = load(&cfg, 2, Arc::new(TableSource::new("e", table))).unwrap();

    let collection = &out.collections[0];
    assert_eq!(collection.arena.len(), 2);
    for (event, want) in [3.0, 5.0].iter().enumerate() {
        let dials = out.cache.dials(0, event);
        assert_eq!(dials.len(), 1);
        assert!((collection.response(dials[0].slot, 1.0) - want).abs() < 1e-12);
    }
}

#[test]
fn cut_on_missing_jagged_element_rejects_entry() {
    let cfg = config(json!({
        "samples": [{"name": "s", "selection": "flag[2]"}],
        "datasets": [{"name": "mc"}]
    }));
    let table = ColumnTable::from_columns(vec![(
        "flag",
        Column::Jagged(vec![vec![1.0], vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]]),
    )])
    .unwrap();
    let out = load(&cfg, 1, Arc::new(TableSource::new("j", table))).unwrap();
    let entries: Vec<usize> = out.samples.samples()[0].mc.events().iter().map(|e| e.entry).collect();
    assert_eq!(entries, vec![2]);
}

#[test]
fn nan_nominal_weight_is_fatal_with_its_own_error() {
    let cfg = config(json!({
        "samples": [{"name": "s"}],
        "datasets": [{"name": "mc", "nominal_weight": "sqrt(w)"}]
    }));
    let err = load(&cfg, 1, scalar_source("n", vec![("w", vec![4.0, -1.0])])).unwrap_err();
    assert!(matches!(err, AppError::NanWeight { entry: 1, .. }));
    assert_eq!(err.exit_code(), 3);
}
