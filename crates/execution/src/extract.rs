//! Extraction of addressed values from a with result.
//!
//! A with reference selects from its result like this:
//! ```text
//! with.w1                 whole table
//! with.w1.rows            column across all rows (single-column results)
//! with.w1.rows.*          same
//! with.w1.rows.0          one row's value (single-column results)
//! with.w1.rows.0.a        column `a` of row 0
//! with.w1.rows.*.a        column `a` of every row, in row order
//! ```

use dashdeps_core::{DependencyError, DependencyValue, LeafData, PropertyPath, Row};
use serde_json::Value;
use std::sync::Arc;

const ROWS_SEGMENT: usize = 0;
const ROW_INDEX_SEGMENT: usize = 1;
const COLUMN_SEGMENT: usize = 2;
const SPLAT: &str = "*";

/// Extract the value `path` addresses from `data`.
///
/// `name` identifies the dependency in error messages.
pub fn extract_with_value(
    data: &Arc<LeafData>,
    path: &PropertyPath,
    name: &str,
) -> Result<DependencyValue, DependencyError> {
    let segments = &path.segments;
    if segments.is_empty() {
        return Ok(DependencyValue::Table(Arc::clone(data)));
    }

    if segments[ROWS_SEGMENT] != "rows" || segments.len() > COLUMN_SEGMENT + 1 {
        return Err(DependencyError::invalid_path(
            &path.original,
            format!("reference to with '{name}' must be of the form rows[.<idx>|*][.<column>]"),
        ));
    }

    let row_selector = segments
        .get(ROW_INDEX_SEGMENT)
        .map(String::as_str)
        .unwrap_or(SPLAT);

    let column = match segments.get(COLUMN_SEGMENT) {
        Some(column) => column.as_str(),
        None => match data.columns.as_slice() {
            [only] => only.name.as_str(),
            [] => return Err(DependencyError::NoColumns { name: name.to_string() }),
            _ => {
                return Err(DependencyError::AmbiguousColumnSelection {
                    name: name.to_string(),
                })
            }
        },
    };

    if row_selector == SPLAT {
        return column_values_from_rows(column, &data.rows).map(DependencyValue::Json);
    }

    let row_idx: usize = row_selector.parse().map_err(|_| {
        DependencyError::invalid_path(
            &path.original,
            format!("reference to with '{name}' cannot parse row index '{row_selector}'"),
        )
    })?;

    let Some(row) = data.rows.get(row_idx) else {
        return Err(DependencyError::RowIndexOutOfRange {
            name: name.to_string(),
            index: row_idx,
            row_count: data.rows.len(),
        });
    };

    Ok(DependencyValue::Json(
        row.get(column).cloned().unwrap_or(Value::Null),
    ))
}

fn column_values_from_rows(column: &str, rows: &[Row]) -> Result<Value, DependencyError> {
    rows.iter()
        .map(|row| {
            row.get(column)
                .cloned()
                .ok_or_else(|| DependencyError::MissingColumn {
                    column: column.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}
