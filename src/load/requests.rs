//! Indexing-variable requests.
//!
//! Built in two phases. Stages first register the names they need in a
//! [`RequestTable`] and keep only the returned positions. [`RequestTable::bind`]
//! then resolves every name once into an [`IndexingTable`]: either a source
//! accessor or a transform output. Positions stay valid across both phases.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{AppError, Result};
use crate::expr::{CompiledExpr, truthy};
use crate::load::resolver::{Accessor, NameOverrides, resolve};
use crate::load::transform::TransformChain;
use crate::source::{FieldShape, RecordReader, RecordSource};

/// Why a variable was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestKind {
    Binning,
    DialBinning,
    ApplyCondition,
    DialIndex,
    VarSelection,
    Storage,
    TransformInput,
}

impl RequestKind {
    pub fn label(self) -> &'static str {
        match self {
            RequestKind::Binning => "binning",
            RequestKind::DialBinning => "dial-binning",
            RequestKind::ApplyCondition => "apply-condition",
            RequestKind::DialIndex => "dial-index",
            RequestKind::VarSelection => "var-selection",
            RequestKind::Storage => "storage",
            RequestKind::TransformInput => "transform-input",
        }
    }
}

/// Phase one: symbolic requests keyed by position.
#[derive(Debug, Clone, Default)]
pub struct RequestTable {
    names: Vec<String>,
    kinds: Vec<Vec<RequestKind>>,
    lookup: HashMap<String, usize>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, kind: RequestKind) -> usize {
        let name = name.trim();
        let idx = match self.lookup.get(name) {
            Some(&i) => i,
            None => {
                self.names.push(name.to_string());
                self.kinds.push(Vec::new());
                self.lookup.insert(name.to_string(), self.names.len() - 1);
                self.names.len() - 1
            }
        };
        if !self.kinds[idx].contains(&kind) {
            self.kinds[idx].push(kind);
        }
        idx
    }

    pub fn add_all<'a, I>(&mut self, names: I, kind: RequestKind)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            self.add(name, kind);
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Phase two: resolve every request once.
    pub fn bind(
        self,
        source: &dyn RecordSource,
        overrides: &NameOverrides,
        chain: &TransformChain,
        context: &str,
    ) -> Result<IndexingTable> {
        let mut vars = Vec::with_capacity(self.names.len());
        for (name, mut kinds) in self.names.into_iter().zip(self.kinds) {
            kinds.sort();
            let var = match chain.producer_of(&name) {
                Some(t) => IndexedVar {
                    expression: format!("transform #{t}"),
                    accessor: None,
                    shape: None,
                    produced_by_transform: true,
                    requested_for: kinds,
                    name,
                },
                None => {
                    let resolved = resolve(source, overrides, &name, context)?;
                    IndexedVar {
                        produced_by_transform: chain.writes(&name),
                        expression: resolved.expression,
                        accessor: Some(resolved.accessor),
                        shape: resolved.shape,
                        requested_for: kinds,
                        name,
                    }
                }
            };
            debug!(
                variable = %var.name,
                expression = %var.expression,
                transform = var.produced_by_transform,
                "indexing variable bound"
            );
            vars.push(var);
        }
        Ok(IndexingTable {
            vars,
            lookup: self.lookup,
        })
    }
}

/// One slot of the indexing buffer.
#[derive(Debug, Clone)]
pub struct IndexedVar {
    pub name: String,
    /// Source expression after overrides, or the producing transform.
    pub expression: String,
    /// `None` when a transform produces the value from scratch.
    pub accessor: Option<Accessor>,
    pub shape: Option<FieldShape>,
    pub produced_by_transform: bool,
    pub requested_for: Vec<RequestKind>,
}

impl IndexedVar {
    /// Stored value is the one computed while indexing; storage never
    /// re-evaluates the transform.
    pub fn reused_for_storage(&self) -> bool {
        self.produced_by_transform && self.requested_for.contains(&RequestKind::Storage)
    }
}

/// Phase two: resolved layout of the per-thread indexing buffer.
#[derive(Debug, Clone, Default)]
pub struct IndexingTable {
    vars: Vec<IndexedVar>,
    lookup: HashMap<String, usize>,
}

impl IndexingTable {
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> &[IndexedVar] {
        &self.vars
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name.trim()).copied()
    }

    /// Load source values for the current record. Transform-only slots are
    /// reset to NaN until the transforms run.
    pub fn fill(&self, reader: &dyn RecordReader, buffer: &mut [f64]) {
        for (slot, var) in buffer.iter_mut().zip(&self.vars) {
            *slot = match &var.accessor {
                Some(acc) => acc.value(reader),
                None => f64::NAN,
            };
        }
    }
}

/// A formula over indexing-buffer slots.
#[derive(Debug, Clone)]
pub struct BufferFormula {
    expr: CompiledExpr,
    slots: Vec<usize>,
}

impl BufferFormula {
    /// Compile `text` and register its identifiers in `requests`.
    pub fn request(text: &str, kind: RequestKind, requests: &mut RequestTable) -> Result<CompiledExpr> {
        let expr = CompiledExpr::compile(text)?;
        for var in &expr.required_vars {
            requests.add(var, kind);
        }
        Ok(expr)
    }

    pub fn bind(expr: CompiledExpr, table: &IndexingTable) -> Result<Self> {
        let slots = expr
            .required_vars
            .iter()
            .map(|v| {
                table
                    .index_of(v)
                    .ok_or_else(|| AppError::unresolved(v, format!("formula '{}'", expr.source())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BufferFormula { expr, slots })
    }

    pub fn source(&self) -> &str {
        self.expr.source()
    }

    pub fn eval(&self, buffer: &[f64]) -> f64 {
        self.expr.eval_with(|i| buffer[self.slots[i]])
    }

    pub fn passes(&self, buffer: &[f64]) -> bool {
        truthy(self.eval(buffer))
    }
}
