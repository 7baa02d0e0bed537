//! Columnar record sources.
//!
//! A [`RecordSource`] is the shared, read-only description of a dataset: it
//! knows its entry count and field layout and hands out independent
//! [`RecordReader`] cursors. Readers are never shared between threads; every
//! worker opens its own over its own entry range.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod file;
pub mod memory;

pub use file::*;
pub use memory::*;

/// Closed set of field layouts, decided once per field at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Scalar,
    FixedArray(usize),
    VarArray,
    Object,
}

impl FieldShape {
    pub fn label(self) -> String {
        match self {
            FieldShape::Scalar => "scalar".to_string(),
            FieldShape::FixedArray(n) => format!("array[{n}]"),
            FieldShape::VarArray => "array[]".to_string(),
            FieldShape::Object => "object".to_string(),
        }
    }
}

/// Correction-source payload carried by an object field.
///
/// Serialized externally tagged, e.g. `{"spline": [[0, 1.0], [1, 1.2]]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordObject {
    Graph(Vec<[f64; 2]>),
    Spline(Vec<[f64; 2]>),
    Array(Vec<RecordObject>),
}

impl RecordObject {
    /// Select the element a per-event dial refers to.
    ///
    /// Arrays need an index; plain objects ignore it.
    pub fn select(&self, index: Option<usize>) -> Option<&RecordObject> {
        match (self, index) {
            (RecordObject::Array(items), Some(i)) => items.get(i),
            (RecordObject::Array(_), None) => None,
            (obj, _) => Some(obj),
        }
    }

    pub fn points(&self) -> Option<&[[f64; 2]]> {
        match self {
            RecordObject::Graph(p) | RecordObject::Spline(p) => Some(p),
            RecordObject::Array(_) => None,
        }
    }
}

/// Shared handle to a dataset.
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;

    fn n_entries(&self) -> usize;

    fn field_names(&self) -> Vec<String>;

    fn field_index(&self, name: &str) -> Option<usize>;

    fn field_shape(&self, field: usize) -> FieldShape;

    /// Open an independent cursor restricted to `range`.
    fn open(&self, range: Range<usize>) -> Result<Box<dyn RecordReader + '_>>;
}

/// Thread-local cursor over a contiguous range of entries.
pub trait RecordReader {
    /// Make `entry` the current record. Entries outside the opened range are
    /// rejected.
    fn load_entry(&mut self, entry: usize) -> Result<()>;

    /// Element `element` of a numeric field for the current entry. Scalars
    /// only have element 0. `None` when the element does not exist.
    fn element(&self, field: usize, element: usize) -> Option<f64>;

    /// Object payload of an object field for the current entry.
    fn object(&self, field: usize) -> Option<&RecordObject>;
}
