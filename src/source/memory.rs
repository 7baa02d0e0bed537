//! In-memory column tables.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::source::{FieldShape, RecordObject, RecordReader, RecordSource};

/// One column of a [`ColumnTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Scalar(Vec<f64>),
    /// Row-major, `width` values per entry.
    Fixed { width: usize, values: Vec<f64> },
    Jagged(Vec<Vec<f64>>),
    Object(Vec<RecordObject>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Fixed { width, values } => {
                if *width == 0 {
                    0
                } else {
                    values.len() / width
                }
            }
            Column::Jagged(v) => v.len(),
            Column::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> FieldShape {
        match self {
            Column::Scalar(_) => FieldShape::Scalar,
            Column::Fixed { width, .. } => FieldShape::FixedArray(*width),
            Column::Jagged(_) => FieldShape::VarArray,
            Column::Object(_) => FieldShape::Object,
        }
    }

    fn element(&self, entry: usize, element: usize) -> Option<f64> {
        match self {
            Column::Scalar(v) if element == 0 => v.get(entry).copied(),
            Column::Scalar(_) => None,
            Column::Fixed { width, values } => {
                if element < *width {
                    values.get(entry * width + element).copied()
                } else {
                    None
                }
            }
            Column::Jagged(v) => v.get(entry).and_then(|row| row.get(element)).copied(),
            Column::Object(_) => None,
        }
    }

    fn append(&mut self, other: Column) -> std::result::Result<(), String> {
        match (self, other) {
            (Column::Scalar(a), Column::Scalar(b)) => a.extend(b),
            (Column::Fixed { width: wa, values: a }, Column::Fixed { width: wb, values: b }) => {
                if *wa != wb {
                    return Err(format!("fixed array width {wa} vs {wb}"));
                }
                a.extend(b);
            }
            (Column::Jagged(a), Column::Jagged(b)) => a.extend(b),
            (Column::Jagged(a), Column::Fixed { width, values }) => {
                if width > 0 {
                    a.extend(values.chunks(width).map(|c| c.to_vec()));
                }
            }
            (Column::Object(a), Column::Object(b)) => a.extend(b),
            (a, b) => {
                return Err(format!("{} vs {}", a.shape().label(), b.shape().label()));
            }
        }
        Ok(())
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTable {
    names: Vec<String>,
    columns: Vec<Column>,
    n_entries: usize,
}

impl ColumnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        let mut table = ColumnTable::new();
        for (name, column) in columns {
            table.add_column(name, column)?;
        }
        Ok(table)
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.names.iter().any(|n| *n == name) {
            return Err(AppError::source_error(
                "table",
                format!("duplicate column '{name}'"),
            ));
        }
        if !self.columns.is_empty() && column.len() != self.n_entries {
            return Err(AppError::source_error(
                "table",
                format!(
                    "column '{name}' has {} entries, expected {}",
                    column.len(),
                    self.n_entries
                ),
            ));
        }
        self.n_entries = column.len();
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Chain `other` after this table. Column sets must agree.
    pub fn append(&mut self, other: ColumnTable) -> Result<()> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.names.len() != other.names.len() {
            return Err(AppError::source_error(
                "chain",
                format!(
                    "column count mismatch: {} vs {}",
                    self.names.len(),
                    other.names.len()
                ),
            ));
        }
        let added = other.n_entries;
        for (name, column) in other.names.into_iter().zip(other.columns) {
            let idx = self.names.iter().position(|n| *n == name).ok_or_else(|| {
                AppError::source_error("chain", format!("column '{name}' missing from first file"))
            })?;
            self.columns[idx]
                .append(column)
                .map_err(|m| AppError::source_error("chain", format!("column '{name}': {m}")))?;
        }
        self.n_entries += added;
        Ok(())
    }

    pub fn n_entries(&self) -> usize {
        self.n_entries
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }
}

/// [`RecordSource`] over a shared [`ColumnTable`].
#[derive(Debug, Clone)]
pub struct TableSource {
    name: String,
    table: Arc<ColumnTable>,
}

impl TableSource {
    pub fn new(name: impl Into<String>, table: ColumnTable) -> Self {
        Self {
            name: name.into(),
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &ColumnTable {
        &self.table
    }
}

impl RecordSource for TableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_entries(&self) -> usize {
        self.table.n_entries
    }

    fn field_names(&self) -> Vec<String> {
        self.table.names.clone()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.table.names.iter().position(|n| n == name)
    }

    fn field_shape(&self, field: usize) -> FieldShape {
        self.table.columns[field].shape()
    }

    fn open(&self, range: Range<usize>) -> Result<Box<dyn RecordReader + '_>> {
        if range.end > self.table.n_entries || range.start > range.end {
            return Err(AppError::source_error(
                &self.name,
                format!(
                    "range {}..{} outside 0..{}",
                    range.start, range.end, self.table.n_entries
                ),
            ));
        }
        Ok(Box::new(TableReader {
            source_name: &self.name,
            table: &self.table,
            current: range.start,
            range,
        }))
    }
}

struct TableReader<'a> {
    source_name: &'a str,
    table: &'a ColumnTable,
    range: Range<usize>,
    current: usize,
}

impl RecordReader for TableReader<'_> {
    fn load_entry(&mut self, entry: usize) -> Result<()> {
        if !self.range.contains(&entry) {
            return Err(AppError::source_error(
                self.source_name,
                format!(
                    "entry {entry} outside reader range {}..{}",
                    self.range.start, self.range.end
                ),
            ));
        }
        self.current = entry;
        Ok(())
    }

    fn element(&self, field: usize, element: usize) -> Option<f64> {
        self.table.columns.get(field)?.element(self.current, element)
    }

    fn object(&self, field: usize) -> Option<&RecordObject> {
        match self.table.columns.get(field)? {
            Column::Object(v) => v.get(self.current),
            _ => None,
        }
    }
}
