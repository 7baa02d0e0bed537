//! Field resolution: variable names to accessors over a record source.
//!
//! A requested name goes through the override table first. The result is
//! either a field (optionally `field[i]`) or a formula whose identifiers are
//! all fields. Anything else is an unresolved variable.

use crate::error::{AppError, Result};
use crate::expr::{CompiledExpr, strip_bracket, truthy};
use crate::source::{FieldShape, RecordReader, RecordSource};

/// Name synonyms, applied on identifier boundaries, longest name first.
#[derive(Debug, Clone, Default)]
pub struct NameOverrides {
    entries: Vec<(String, String)>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl NameOverrides {
    pub fn new<I, K, V>(map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, String)> = map
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        // Longer names first so `Enu_reco` is never rewritten through `Enu`.
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        NameOverrides { entries }
    }

    /// Rewrite every overridden name in `text`. Replacements are not
    /// rescanned.
    pub fn apply(&self, text: &str) -> String {
        if self.entries.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut prev: Option<char> = None;

        'scan: while let Some(c) = rest.chars().next() {
            let at_boundary = prev.is_none_or(|p| !is_ident_char(p));
            if at_boundary && (c.is_ascii_alphabetic() || c == '_') {
                for (key, target) in &self.entries {
                    if let Some(after) = rest.strip_prefix(key.as_str()) {
                        let ends_ident = after.chars().next().is_none_or(|n| !is_ident_char(n));
                        if ends_ident {
                            out.push_str(target);
                            prev = key.chars().last();
                            rest = after;
                            continue 'scan;
                        }
                    }
                }
            }
            out.push(c);
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
        }
        out
    }
}

/// Reads one number from the current record of a reader.
#[derive(Debug, Clone)]
pub enum Accessor {
    Field { field: usize, element: usize },
    Formula { expr: CompiledExpr, leaves: Vec<(usize, usize)> },
}

impl Accessor {
    /// Missing array elements read as NaN, which no bin or cut accepts.
    pub fn value(&self, reader: &dyn RecordReader) -> f64 {
        match self {
            Accessor::Field { field, element } => {
                reader.element(*field, *element).unwrap_or(f64::NAN)
            }
            Accessor::Formula { expr, leaves } => expr.eval_with(|i| {
                let (field, element) = leaves[i];
                reader.element(field, element).unwrap_or(f64::NAN)
            }),
        }
    }

    pub fn passes(&self, reader: &dyn RecordReader) -> bool {
        truthy(self.value(reader))
    }
}

/// Result of resolving one name.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    /// Expression after overrides.
    pub expression: String,
    pub accessor: Accessor,
    /// `None` for formulas.
    pub shape: Option<FieldShape>,
}

/// Resolve a bare identifier (possibly `name[i]`) to a numeric field element.
fn resolve_leaf(source: &dyn RecordSource, name: &str) -> Option<(usize, usize, FieldShape)> {
    if let Some(field) = source.field_index(name) {
        let shape = source.field_shape(field);
        return (shape != FieldShape::Object).then_some((field, 0, shape));
    }
    let (base, index) = strip_bracket(name);
    let index = index?;
    let field = source.field_index(base)?;
    let shape = source.field_shape(field);
    match shape {
        FieldShape::Scalar if index == 0 => Some((field, 0, shape)),
        FieldShape::FixedArray(n) if index < n => Some((field, index, shape)),
        FieldShape::VarArray => Some((field, index, shape)),
        _ => None,
    }
}

/// Resolve a requested name against `source`.
pub fn resolve(
    source: &dyn RecordSource,
    overrides: &NameOverrides,
    name: &str,
    context: &str,
) -> Result<ResolvedField> {
    let expression = overrides.apply(name.trim());

    if let Some((field, element, shape)) = resolve_leaf(source, &expression) {
        return Ok(ResolvedField {
            expression,
            accessor: Accessor::Field { field, element },
            shape: Some(shape),
        });
    }

    let expr = CompiledExpr::compile(&expression).map_err(|e| {
        AppError::unresolved(name, format!("{context}: not a field and not a formula ({e})"))
    })?;
    let leaves = expr
        .required_vars
        .iter()
        .map(|var| {
            resolve_leaf(source, var)
                .map(|(field, element, _)| (field, element))
                .ok_or_else(|| {
                    AppError::unresolved(
                        var,
                        format!("{context}: used in '{expression}', not a field of '{}'", source.name()),
                    )
                })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResolvedField {
        expression,
        accessor: Accessor::Formula { expr, leaves },
        shape: None,
    })
}

/// Resolve an object field (per-event dial payloads).
pub fn resolve_object(
    source: &dyn RecordSource,
    overrides: &NameOverrides,
    name: &str,
    context: &str,
) -> Result<usize> {
    let expression = overrides.apply(name.trim());
    match source.field_index(&expression) {
        Some(field) if source.field_shape(field) == FieldShape::Object => Ok(field),
        Some(field) => Err(AppError::unresolved(
            name,
            format!(
                "{context}: field '{expression}' is {}, expected an object",
                source.field_shape(field).label()
            ),
        )),
        None => Err(AppError::unresolved(
            name,
            format!("{context}: no object field '{expression}' in '{}'", source.name()),
        )),
    }
}
