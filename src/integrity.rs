use crate::error::FakeError;
use crate::model::{compare_cells, Cell, ColumnDef, Dataset, IndexKind, Row, RowId, SqlType, TableDef};
use std::cmp::Ordering;

/// Conform a row to the table schema. Strict mode fails on any type
/// mismatch; otherwise values are coerced best-effort the way the server
/// would under a permissive sql_mode.
pub fn coerce_row_to_schema(row: &Row, def: &TableDef, strict: bool) -> Result<Row, FakeError> {
    let mut out = Row::with_capacity(row.len());
    for (name, value) in row {
        match def.column(name) {
            Some(col) => {
                out.insert(name.clone(), coerce_cell(value.clone(), col, strict)?);
            }
            // Synthetic columns (pre-evaluated sort keys) pass through.
            None => {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(out)
}

pub fn coerce_cell(cell: Cell, col: &ColumnDef, strict: bool) -> Result<Cell, FakeError> {
    if cell.is_null() {
        if strict && !col.nullable {
            return Err(FakeError::SchemaCoercion(format!(
                "column {} cannot be NULL",
                col.name
            )));
        }
        return Ok(Cell::Null);
    }
    match (&col.ty, &cell) {
        (SqlType::Int, Cell::Int(_)) | (SqlType::Float, Cell::Float(_)) => Ok(cell),
        (SqlType::Text, Cell::Text(_)) => Ok(cell),
        (SqlType::Bool, Cell::Bool(_)) => Ok(cell),
        (SqlType::Bool, Cell::Int(i)) => Ok(Cell::Bool(*i != 0)),
        (SqlType::Float, Cell::Int(i)) => Ok(Cell::Float(*i as f64)),
        (SqlType::Float, Cell::Bool(b)) => Ok(Cell::Float(f64::from(u8::from(*b)))),
        (SqlType::Int, Cell::Bool(b)) => Ok(Cell::Int(i64::from(*b))),
        (SqlType::Int, Cell::Float(f)) => {
            if strict {
                return Err(type_mismatch(col, &cell));
            }
            Ok(Cell::Int(*f as i64))
        }
        (SqlType::Int, Cell::Text(s)) => {
            if strict {
                return Err(type_mismatch(col, &cell));
            }
            Ok(Cell::Int(s.trim().parse::<i64>().unwrap_or(0)))
        }
        (SqlType::Float, Cell::Text(s)) => {
            if strict {
                return Err(type_mismatch(col, &cell));
            }
            Ok(Cell::Float(s.trim().parse::<f64>().unwrap_or(0.0)))
        }
        (SqlType::Text, other) => {
            if strict {
                return Err(type_mismatch(col, other));
            }
            Ok(Cell::Text(other.to_string()))
        }
        (SqlType::Date, Cell::Text(s)) => {
            if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
                return Ok(cell);
            }
            Err(FakeError::SchemaCoercion(format!(
                "Invalid date for {}: {s} (expected YYYY-MM-DD)",
                col.name
            )))
        }
        (SqlType::DateTime, Cell::Text(s)) => {
            if chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok() {
                return Ok(cell);
            }
            Err(FakeError::SchemaCoercion(format!(
                "Invalid datetime for {}: {s} (expected YYYY-MM-DD HH:MM:SS)",
                col.name
            )))
        }
        (SqlType::Date | SqlType::DateTime, other) => Err(type_mismatch(col, other)),
        (SqlType::Bool, other) => Err(type_mismatch(col, other)),
        (SqlType::Int, Cell::Null) | (SqlType::Float, Cell::Null) => {
            unreachable!("Cell::Null is handled by the early return above")
        }
    }
}

fn type_mismatch(col: &ColumnDef, cell: &Cell) -> FakeError {
    FakeError::SchemaCoercion(format!(
        "value {cell} does not conform to {:?} column {}",
        col.ty, col.name
    ))
}

/// Scan the table for a row colliding with `row` on any PRIMARY/UNIQUE
/// index. `existing_row_id` exempts the row being updated in place. Rows
/// with a NULL in any indexed column never collide (MySQL sparse nulls).
/// Returns the violated constraint name.
pub fn check_unique_constraints(
    table: &Dataset,
    row: &Row,
    def: &TableDef,
    existing_row_id: Option<&RowId>,
) -> Option<String> {
    for index in &def.indexes {
        if !matches!(index.kind, IndexKind::Primary | IndexKind::Unique) {
            continue;
        }
        let candidate: Vec<&Cell> = index
            .columns
            .iter()
            .map(|c| row.get(c).unwrap_or(&Cell::Null))
            .collect();
        if candidate.iter().any(|c| c.is_null()) {
            continue;
        }
        for (other_id, other_row) in table {
            if existing_row_id == Some(other_id) {
                continue;
            }
            let collides = index.columns.iter().zip(&candidate).all(|(col, val)| {
                other_row
                    .get(col)
                    .map(|other| compare_cells(other, val) == Ordering::Equal)
                    .unwrap_or(false)
            });
            if collides {
                return Some(index.name.clone());
            }
        }
    }
    None
}
