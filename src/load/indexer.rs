//! Dial assignment: which corrections apply to a stored event.
//!
//! For each collection that applies to the dataset, in collection order:
//! skip it when its apply condition is false; otherwise pick the first
//! matching bin (binned) or build a dial from the record's own correction
//! object (per-event). Per-event dials go into a partition-local arena and
//! are rebased into the collection's arena after the fill.

use tracing::trace;

use crate::domain::binning::Binning;
use crate::domain::dial::{Dial, DialCollection, DialFactory, DialMode};
use crate::error::{AppError, Result};
use crate::load::cache::DialRef;
use crate::load::requests::{BufferFormula, IndexingTable, RequestKind, RequestTable};
use crate::load::resolver::{NameOverrides, resolve_object};
use crate::expr::CompiledExpr;
use crate::source::{RecordReader, RecordSource};

/// Per-collection assignment statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialUsage {
    pub assigned: usize,
    pub condition_false: usize,
    pub no_bin: usize,
    pub no_dial: usize,
}

impl DialUsage {
    pub fn merge(&mut self, other: &DialUsage) {
        self.assigned += other.assigned;
        self.condition_false += other.condition_false;
        self.no_bin += other.no_bin;
        self.no_dial += other.no_dial;
    }
}

/// Symbolic requests of one collection, collected before binding.
#[derive(Debug)]
pub struct CollectionRequest {
    collection: usize,
    apply: Option<CompiledExpr>,
}

/// Register everything the collections need from the indexing buffer.
pub fn request_collections(
    collections: &[&DialCollection],
    dial_index: Option<&str>,
    requests: &mut RequestTable,
) -> Result<(Vec<CollectionRequest>, Option<CompiledExpr>)> {
    let mut out = Vec::with_capacity(collections.len());
    for c in collections {
        if let DialMode::Binned { binning, .. } = &c.mode {
            requests.add_all(&binning.variables(), RequestKind::DialBinning);
        }
        let apply = c
            .apply_condition
            .as_deref()
            .map(|s| BufferFormula::request(s, RequestKind::ApplyCondition, requests))
            .transpose()
            .map_err(|e| AppError::config(format!("apply condition of '{}': {e}", c.name)))?;
        out.push(CollectionRequest {
            collection: c.index,
            apply,
        });
    }

    let needs_index = collections
        .iter()
        .any(|c| matches!(c.mode, DialMode::PerEvent { .. }));
    let index = match dial_index {
        Some(text) if needs_index => Some(
            BufferFormula::request(text, RequestKind::DialIndex, requests)
                .map_err(|e| AppError::config(format!("dial index formula: {e}")))?,
        ),
        _ => None,
    };
    Ok((out, index))
}

/// Cache bin variable positions of binned collections against `table`.
pub fn cache_collection_bins(
    collections: &mut [DialCollection],
    requests: &[CollectionRequest],
    table: &IndexingTable,
) -> Result<()> {
    for req in requests {
        let c = &mut collections[req.collection];
        let name = c.name.clone();
        if let DialMode::Binned { binning, .. } = &mut c.mode {
            binning
                .cache_var_indices(|v| table.index_of(v))
                .map_err(|e| AppError::config(format!("dial collection '{name}': {e}")))?;
        }
    }
    Ok(())
}

#[derive(Debug)]
enum PlanMode<'a> {
    Binned { binning: &'a Binning, unconditional: bool },
    PerEvent { field: usize, factory: &'a DialFactory },
}

#[derive(Debug)]
struct CollectionPlan<'a> {
    collection: usize,
    apply: Option<BufferFormula>,
    mode: PlanMode<'a>,
}

/// Bound dial assignment for one dataset.
#[derive(Debug)]
pub struct DialIndexer<'a> {
    plans: Vec<CollectionPlan<'a>>,
    index: Option<BufferFormula>,
}

impl<'a> DialIndexer<'a> {
    pub fn bind(
        collections: &'a [DialCollection],
        requests: Vec<CollectionRequest>,
        index: Option<CompiledExpr>,
        table: &IndexingTable,
        source: &dyn RecordSource,
        overrides: &NameOverrides,
    ) -> Result<Self> {
        let mut plans = Vec::with_capacity(requests.len());
        for req in requests {
            let c = &collections[req.collection];
            let apply = req.apply.map(|e| BufferFormula::bind(e, table)).transpose()?;
            let mode = match &c.mode {
                DialMode::Binned { binning, .. } => PlanMode::Binned {
                    binning,
                    unconditional: c.is_unconditional(),
                },
                DialMode::PerEvent { field, factory } => PlanMode::PerEvent {
                    field: resolve_object(
                        source,
                        overrides,
                        field,
                        &format!("dial collection '{}'", c.name),
                    )?,
                    factory,
                },
            };
            plans.push(CollectionPlan {
                collection: req.collection,
                apply,
                mode,
            });
        }
        let index = index.map(|e| BufferFormula::bind(e, table)).transpose()?;
        Ok(DialIndexer { plans, index })
    }

    /// Assign dials for the current event into `out` and return how many
    /// were written. `arenas` and `usage` are indexed by collection.
    pub fn assign(
        &self,
        buffer: &[f64],
        reader: &dyn RecordReader,
        arenas: &mut [Vec<Dial>],
        out: &mut [DialRef],
        usage: &mut [DialUsage],
    ) -> usize {
        let mut n = 0;
        // No dataset dial index: arrays contribute their first element.
        let element = match &self.index {
            None => Some(0),
            Some(f) => {
                let v = f.eval(buffer);
                (v.is_finite() && v >= 0.0).then_some(v as usize)
            }
        };

        for plan in &self.plans {
            let stats = &mut usage[plan.collection];
            if let Some(cond) = &plan.apply
                && !cond.passes(buffer)
            {
                stats.condition_false += 1;
                continue;
            }

            let slot = match &plan.mode {
                PlanMode::Binned { unconditional: true, .. } => Some(0),
                PlanMode::Binned { binning, .. } => {
                    let bin = binning.find_bin(buffer);
                    if bin.is_none() {
                        stats.no_bin += 1;
                    }
                    bin
                }
                PlanMode::PerEvent { field, factory } => {
                    let dial = reader
                        .object(*field)
                        .and_then(|obj| obj.select(element))
                        .and_then(|obj| factory.from_object(obj));
                    match dial {
                        Some(d) => {
                            let arena = &mut arenas[plan.collection];
                            arena.push(d);
                            Some(arena.len() - 1)
                        }
                        None => {
                            stats.no_dial += 1;
                            trace!(collection = plan.collection, "no dial built for event");
                            None
                        }
                    }
                }
            };

            if let Some(slot) = slot {
                out[n] = DialRef {
                    collection: plan.collection,
                    slot,
                };
                n += 1;
                stats.assigned += 1;
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BinEdgeConfig, DialCollectionConfig, DialKind, FormulaSpec, PerEventDialConfig};
    use crate::load::transform::TransformChain;
    use crate::source::{Column, ColumnTable, RecordObject, TableSource};

    fn cfg(name: &str) -> DialCollectionConfig {
        DialCollectionConfig {
            name: name.into(),
            enabled: true,
            datasets: vec![],
            parameter: "p".into(),
            apply_condition: None,
            binning: None,
            bin_dials: vec![],
            per_event: None,
            allow_extrapolation: false,
        }
    }

    fn edge(v: &str, lo: f64, hi: f64) -> BinEdgeConfig {
        BinEdgeConfig {
            variable: v.into(),
            range: [lo, hi],
            include_high: false,
        }
    }

    #[test]
    fn assigns_binned_unconditional_and_per_event() {
        let graph = |y: f64| RecordObject::Graph(vec![[0.0, y], [2.0, y]]);
        let src = TableSource::new(
            "t",
            ColumnTable::from_columns(vec![
                ("E", Column::Scalar(vec![0.5, 1.5])),
                ("idx", Column::Scalar(vec![1.0, 0.0])),
                (
                    "spl",
                    Column::Object(vec![
                        RecordObject::Array(vec![graph(1.0), graph(2.0)]),
                        RecordObject::Array(vec![graph(3.0), graph(4.0)]),
                    ]),
                ),
            ])
            .unwrap(),
        );

        let mut binned = cfg("binned");
        binned.binning = Some(vec![vec![edge("E", 0.0, 1.0)], vec![edge("E", 1.0, 2.0)]]);
        let mut norm = cfg("norm");
        norm.binning = Some(vec![vec![]]);
        norm.apply_condition = Some(FormulaSpec::One("E > 1".into()));
        let mut per_event = cfg("per_event");
        per_event.per_event = Some(PerEventDialConfig {
            field: "spl".into(),
            kind: DialKind::Graph,
            subtype: None,
        });

        let mut collections: Vec<DialCollection> = [binned, norm, per_event]
            .iter()
            .enumerate()
            .map(|(i, c)| DialCollection::from_config(i, c, None).unwrap())
            .collect();

        let mut requests = RequestTable::new();
        let refs: Vec<&DialCollection> = collections.iter().collect();
        let (coll_req, index) = request_collections(&refs, Some("idx"), &mut requests).unwrap();
        let overrides = NameOverrides::default();
        let table = requests
            .bind(&src, &overrides, &TransformChain::default(), "test")
            .unwrap();
        cache_collection_bins(&mut collections, &coll_req, &table).unwrap();
        let indexer =
            DialIndexer::bind(&collections, coll_req, index, &table, &src, &overrides).unwrap();

        let mut reader = src.open(0..2).unwrap();
        let mut arenas = vec![Vec::new(); 3];
        let mut usage = vec![DialUsage::default(); 3];
        let mut buf = vec![0.0; table.len()];
        let mut out = [DialRef::default(); 3];

        reader.load_entry(0).unwrap();
        table.fill(reader.as_ref(), &mut buf);
        let n = indexer.assign(&buf, reader.as_ref(), &mut arenas, &mut out, &mut usage);
        assert_eq!(n, 2);
        assert_eq!(out[0], DialRef { collection: 0, slot: 0 });
        assert_eq!(out[1], DialRef { collection: 2, slot: 0 });
        assert!((arenas[2][0].response(1.0) - 2.0).abs() < 1e-12);

        reader.load_entry(1).unwrap();
        table.fill(reader.as_ref(), &mut buf);
        let n = indexer.assign(&buf, reader.as_ref(), &mut arenas, &mut out, &mut usage);
        assert_eq!(n, 3);
        assert_eq!(out[0], DialRef { collection: 0, slot: 1 });
        assert_eq!(out[1], DialRef { collection: 1, slot: 0 });
        assert_eq!(out[2], DialRef { collection: 2, slot: 1 });
        assert!((arenas[2][1].response(1.0) - 3.0).abs() < 1e-12);

        assert_eq!(usage[1].condition_false, 1);
        assert_eq!(usage[2].assigned, 2);
    }
}
