//! Encoding of `SheetRow`s into cells and validation of cells read back.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::SHEET_COLUMNS;
use crate::types::{RowDiagnostic, RowsRead, SheetRow};

pub fn header_row() -> Vec<Value> {
    SHEET_COLUMNS.iter().map(|c| Value::String(c.to_string())).collect()
}

pub fn encode_row(row: &SheetRow) -> Vec<Value> {
    vec![
        Value::String(row.id.clone()),
        decimal_cell(row.price),
        row.change_24h.map(decimal_cell).unwrap_or_else(|| Value::String(String::new())),
        Value::String(row.currency.clone()),
        Value::String(row.exported_at.clone()),
    ]
}

/// Numbers go out as JSON numbers so the sheet applies numeric formats.
fn decimal_cell(d: Decimal) -> Value {
    d.to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(d.to_string()))
}

pub fn is_header(cells: &[Value]) -> bool {
    cells
        .first()
        .map(|c| cell_text(c).trim().eq_ignore_ascii_case(SHEET_COLUMNS[0]))
        .unwrap_or(false)
}

/// Validate every row. Blank rows are dropped silently; rows that fail
/// validation are dropped with a diagnostic naming the sheet row number.
pub fn decode_rows(values: &[Vec<Value>]) -> RowsRead {
    let mut read = RowsRead::default();
    for (idx, cells) in values.iter().enumerate() {
        let row_number = idx + 1;
        if idx == 0 && is_header(cells) {
            continue;
        }
        if cells.iter().all(|c| cell_text(c).trim().is_empty()) {
            continue;
        }
        match decode_row(cells) {
            Ok(row) => read.rows.push(row),
            Err(reason) => read.diagnostics.push(RowDiagnostic { row: row_number, reason }),
        }
    }
    read
}

fn decode_row(cells: &[Value]) -> Result<SheetRow, String> {
    let text = |idx: usize| cells.get(idx).map(cell_text).unwrap_or_default();

    let id = text(0).trim().to_lowercase();
    if id.is_empty() {
        return Err("missing id".to_string());
    }
    let price = decimal_from_cell(cells.get(1))
        .map_err(|e| format!("{id}: price {e}"))?
        .ok_or_else(|| format!("{id}: missing price"))?;
    let change_24h = decimal_from_cell(cells.get(2)).map_err(|e| format!("{id}: change_24h {e}"))?;

    Ok(SheetRow {
        id,
        price,
        change_24h,
        currency: text(3).trim().to_string(),
        exported_at: text(4).trim().to_string(),
    })
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `Ok(None)` for a blank cell, `Err` for anything that is not a number.
/// Display decorations (`$`, `%`, thousands separators) are tolerated.
pub fn decimal_from_cell(cell: Option<&Value>) -> Result<Option<Decimal>, String> {
    let raw = match cell {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => return Err(format!("is not numeric: {other}")),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '%' | ',' | ' '))
        .collect();
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map(Some)
        .map_err(|_| format!("is not numeric: {raw:?}"))
}
