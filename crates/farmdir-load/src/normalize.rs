//! Column intersection and type coercion of raw sheets against target table schemas.

use std::collections::BTreeSet;

use farmdir_core::schema::{ADDRESS, COMPANY, FACILITY, PRODUCT};
use farmdir_core::{FieldKind, FieldSpec, Record, Sheet, TableSchema, Value};
use tracing::{debug, info, warn};

use crate::error::{LoadError, TypeCoercionError};
use crate::{JoinKeys, SheetSet};

/// Field names usable for construction: those present on both sides.
pub fn matching_fields(source: &BTreeSet<String>, target: &BTreeSet<String>) -> BTreeSet<String> {
    source.intersection(target).cloned().collect()
}

/// A sheet whose schema columns carry typed values.
///
/// Columns outside the schema (join keys, notes) are kept as raw text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedSheet {
    pub name: String,
    pub columns: BTreeSet<String>,
    /// Columns shared with the target schema.
    pub fields: BTreeSet<String>,
    pub rows: Vec<Record>,
}

impl TypedSheet {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreparedSheets {
    pub company: TypedSheet,
    pub address: TypedSheet,
    pub product: TypedSheet,
    pub facility: TypedSheet,
}

const FALSE_WORDS: [&str; 6] = ["", "false", "f", "0", "no", "n"];
const NUMERIC_BLANKS: [&str; 6] = ["", "nan", "na", "n/a", "none", "null"];

fn is_numeric_blank(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    NUMERIC_BLANKS.contains(&lower.as_str())
}

fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    // whole numbers exported as floats, e.g. "2016.0"
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(v as i64),
        _ => None,
    }
}

/// Coerce one raw cell into the value `spec` declares. `line` is the 1-based CSV line.
pub fn coerce_cell(
    sheet: &str,
    line: usize,
    spec: &FieldSpec,
    raw: &str,
) -> Result<Value, TypeCoercionError> {
    let value = match spec.kind {
        FieldKind::Boolean => {
            let lower = raw.trim().to_ascii_lowercase();
            Value::Bool(!FALSE_WORDS.contains(&lower.as_str()))
        }
        FieldKind::Integer if is_numeric_blank(raw) => Value::Null,
        FieldKind::Integer => match parse_integer(raw) {
            Some(v) => Value::Int(v),
            None => {
                return Err(TypeCoercionError::InvalidInteger {
                    sheet: sheet.to_string(),
                    line,
                    column: spec.name.to_string(),
                    value: raw.to_string(),
                })
            }
        },
        FieldKind::Float if is_numeric_blank(raw) => Value::Null,
        FieldKind::Float => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Float(v),
            _ => {
                return Err(TypeCoercionError::InvalidFloat {
                    sheet: sheet.to_string(),
                    line,
                    column: spec.name.to_string(),
                    value: raw.to_string(),
                })
            }
        },
        FieldKind::Text if raw.trim().is_empty() => Value::Null,
        FieldKind::Text => Value::Text(raw.to_string()),
    };

    if value.is_null() && spec.must_be_supplied() {
        return Err(TypeCoercionError::MissingRequired {
            sheet: sheet.to_string(),
            line,
            column: spec.name.to_string(),
        });
    }
    Ok(value)
}

/// Type every row of `sheet` against `schema`.
///
/// Rows whose cells are all blank are dropped. A repeated header keeps its first column.
pub fn normalize_sheet(sheet: &Sheet, schema: &TableSchema) -> Result<TypedSheet, LoadError> {
    let columns = sheet.column_names();
    if let Some(missing) = schema.supplied_fields().find(|f| !columns.contains(f.name)) {
        return Err(LoadError::SchemaMismatch {
            sheet: sheet.name.clone(),
            column: missing.name.to_string(),
        });
    }
    let fields = matching_fields(&columns, &schema.field_names());

    let mut rows = Vec::with_capacity(sheet.rows.len());
    for (idx, raw_row) in sheet.rows.iter().enumerate() {
        let line = sheet.line(idx);
        if raw_row.iter().all(|c| c.trim().is_empty()) {
            debug!(sheet = %sheet.name, line, "skipping blank row");
            continue;
        }

        let mut record = Record::new();
        for (col, header) in sheet.headers.iter().enumerate() {
            if record.contains(header) {
                continue;
            }
            let raw = raw_row.get(col).map(String::as_str).unwrap_or("");
            let value = match schema.field(header) {
                Some(spec) => coerce_cell(&sheet.name, line, spec, raw)?,
                None => Value::Text(raw.to_string()),
            };
            record.insert(header.clone(), value);
        }
        rows.push(record);
    }

    Ok(TypedSheet {
        name: sheet.name.clone(),
        columns,
        fields,
        rows,
    })
}

/// Join geocoded locations onto addresses, then normalize all four sheets.
pub fn prepare_sheets(sheets: &SheetSet, keys: &JoinKeys) -> Result<PreparedSheets, LoadError> {
    let mut address = sheets.address.clone();
    if let Some(locations) = &sheets.locations {
        match address.left_join(
            locations,
            &keys.address_facility,
            &keys.locations,
            &["latitude", "longitude"],
        ) {
            Some(matched) => info!(matched, rows = address.len(), "joined geocoded locations onto addresses"),
            None => warn!(
                key = %keys.address_facility,
                locations_key = %keys.locations,
                "locations or address sheet lacks the join column; skipping geocode join"
            ),
        }
    }

    Ok(PreparedSheets {
        company: normalize_sheet(&sheets.company, &COMPANY)?,
        address: normalize_sheet(&address, &ADDRESS)?,
        product: normalize_sheet(&sheets.product, &PRODUCT)?,
        facility: normalize_sheet(&sheets.facility, &FACILITY)?,
    })
}
