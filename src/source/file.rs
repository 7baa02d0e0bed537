//! File-backed record sources.
//!
//! Two on-disk layouts are supported:
//!
//! - JSON column files: `{"columns": {"x": [..], "p": [[..], ..], "dial": [{"spline": ..}, ..]}}`
//! - CSV files with a header row; every column is a scalar.
//!
//! Several files listed for one dataset are chained in order.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::source::{Column, ColumnTable, RecordObject, TableSource};

/// Open and chain the files of one dataset.
pub fn open_chain(name: &str, paths: &[String]) -> Result<TableSource> {
    if paths.is_empty() {
        return Err(AppError::source_error(name, "no record files listed"));
    }
    let mut table = ColumnTable::new();
    for raw in paths {
        let expanded = expand_env(raw);
        if expanded != *raw {
            warn!(dataset = %name, from = %raw, to = %expanded, "record path expanded");
        }
        let path = Path::new(&expanded);
        if !path.exists() {
            return Err(AppError::source_error(
                name,
                format!("file not found: {}", path.display()),
            ));
        }
        let part = read_table(path).map_err(|e| match e {
            AppError::Source { message, .. } => AppError::source_error(name, message),
            other => other,
        })?;
        debug!(dataset = %name, file = %path.display(), entries = part.n_entries(), "chained file");
        table.append(part)?;
    }
    if table.n_entries() == 0 {
        return Err(AppError::source_error(name, "dataset has no entries"));
    }
    Ok(TableSource::new(name, table))
}

/// Read a single file, choosing the layout by extension.
pub fn read_table(path: &Path) -> Result<ColumnTable> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => read_csv_table(path),
        _ => read_json_table(path),
    }
}

pub fn read_json_table(path: &Path) -> Result<ColumnTable> {
    let file = File::open(path)?;
    let doc: Value = serde_json::from_reader(BufReader::new(file))?;
    let columns = doc
        .get("columns")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AppError::source_error(path.display().to_string(), "missing 'columns' object")
        })?;

    let mut table = ColumnTable::new();
    for (name, value) in columns {
        let column = column_from_json(value).map_err(|m| {
            AppError::source_error(path.display().to_string(), format!("column '{name}': {m}"))
        })?;
        table.add_column(name.clone(), column).map_err(|e| match e {
            AppError::Source { message, .. } => {
                AppError::source_error(path.display().to_string(), message)
            }
            other => other,
        })?;
    }
    Ok(table)
}

fn column_from_json(value: &Value) -> std::result::Result<Column, String> {
    let items = value.as_array().ok_or("expected an array")?;
    let Some(first) = items.first() else {
        return Ok(Column::Scalar(Vec::new()));
    };

    match first {
        Value::Number(_) => items
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric value {v}")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Column::Scalar),
        Value::Array(_) => {
            let rows = items
                .iter()
                .map(|row| {
                    row.as_array()
                        .ok_or_else(|| format!("expected array row, got {row}"))?
                        .iter()
                        .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric value {v}")))
                        .collect::<std::result::Result<Vec<_>, _>>()
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let width = rows[0].len();
            if width > 0 && rows.iter().all(|r| r.len() == width) {
                Ok(Column::Fixed {
                    width,
                    values: rows.into_iter().flatten().collect(),
                })
            } else {
                Ok(Column::Jagged(rows))
            }
        }
        Value::Object(_) => items
            .iter()
            .map(|v| serde_json::from_value::<RecordObject>(v.clone()).map_err(|e| e.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Column::Object),
        other => Err(format!("unsupported value {other}")),
    }
}

pub fn read_csv_table(path: &Path) -> Result<ColumnTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];

    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        for (col, field) in record.iter().enumerate() {
            let parsed: f64 = field.parse().map_err(|_| {
                AppError::source_error(
                    path.display().to_string(),
                    format!(
                        "row {}: column '{}' is not numeric: '{field}'",
                        row_idx + 2,
                        headers.get(col).map(String::as_str).unwrap_or("?")
                    ),
                )
            })?;
            if let Some(column) = values.get_mut(col) {
                column.push(parsed);
            }
        }
    }

    let mut table = ColumnTable::new();
    for (name, column) in headers.into_iter().zip(values) {
        table.add_column(name, Column::Scalar(column))?;
    }
    Ok(table)
}

/// Write a table in the JSON column layout.
pub fn write_json_table(path: &Path, table: &ColumnTable) -> Result<()> {
    let mut columns = Map::new();
    for name in table.names() {
        let Some(column) = table.column(name) else {
            continue;
        };
        let value = match column {
            Column::Scalar(v) => serde_json::to_value(v)?,
            Column::Fixed { width, values } => {
                let rows: Vec<&[f64]> = if *width == 0 {
                    Vec::new()
                } else {
                    values.chunks(*width).collect()
                };
                serde_json::to_value(rows)?
            }
            Column::Jagged(rows) => serde_json::to_value(rows)?,
            Column::Object(objs) => serde_json::to_value(objs)?,
        };
        columns.insert(name.clone(), value);
    }
    let mut doc = Map::new();
    doc.insert("columns".to_string(), Value::Object(columns));

    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), &Value::Object(doc))?;
    Ok(())
}

/// Expand `$VAR` and `${VAR}` from the process environment. Unset variables
/// are left as written.
pub fn expand_env(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let (name, consumed) = if chars.get(i + 1) == Some(&'{') {
            match chars[i + 2..].iter().position(|&c| c == '}') {
                Some(end) => (chars[i + 2..i + 2 + end].iter().collect::<String>(), end + 3),
                None => (String::new(), 0),
            }
        } else {
            let len = chars[i + 1..]
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                .count();
            (chars[i + 1..i + 1 + len].iter().collect::<String>(), len + 1)
        };

        if name.is_empty() || consumed == 0 {
            out.push('$');
            i += 1;
            continue;
        }

        match std::env::var(&name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.extend(&chars[i..i + consumed]),
        }
        i += consumed;
    }

    out
}
