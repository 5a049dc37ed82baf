//! Row lookup by join key across typed sheets.
//!
//! Keys compare by exact string equality. When several rows match and only one
//! is wanted, the first in sheet order wins; no other ranking is applied.

use std::collections::BTreeSet;

use farmdir_core::Record;
use tracing::{debug, warn};

use crate::normalize::TypedSheet;

pub type RowFilter<'f> = &'f dyn Fn(&Record) -> bool;

/// Filter keeping rows whose boolean `column` is true.
pub fn flagged(column: &str) -> impl Fn(&Record) -> bool + '_ {
    move |record| record.flag(column).unwrap_or(false)
}

fn key_matches(record: &Record, key_column: &str, value: &str) -> bool {
    record.text(key_column) == Some(value)
}

fn missing_key_column(sheet: &TypedSheet, key_column: &str) -> bool {
    if sheet.has_column(key_column) {
        return false;
    }
    warn!(
        sheet = %sheet.name,
        key_column,
        "join column missing from sheet; relation left empty"
    );
    true
}

/// First row (in sheet order) whose `key_column` equals `value` and that passes `filter`,
/// projected onto `columns`. No match is logged as a warning and yields `None`.
pub fn find_first(
    value: &str,
    sheet: &TypedSheet,
    key_column: &str,
    columns: &BTreeSet<String>,
    filter: Option<RowFilter<'_>>,
) -> Option<Record> {
    if missing_key_column(sheet, key_column) {
        return None;
    }

    let found = sheet
        .rows
        .iter()
        .filter(|r| key_matches(r, key_column, value))
        .find(|r| filter.map_or(true, |f| f(*r)));

    match found {
        Some(record) => Some(record.project(columns)),
        None => {
            warn!(sheet = %sheet.name, key_column, key = value, "no matching row");
            None
        }
    }
}

/// Every row whose `key_column` equals `value`, in sheet order, projected onto `columns`.
///
/// `None` means the key column does not exist in the sheet, which is a configuration
/// problem and is logged once per call; `Some(vec![])` is an ordinary empty result.
pub fn find_all(
    value: &str,
    sheet: &TypedSheet,
    key_column: &str,
    columns: &BTreeSet<String>,
) -> Option<Vec<Record>> {
    if missing_key_column(sheet, key_column) {
        return None;
    }

    let rows = sheet
        .rows
        .iter()
        .filter(|r| key_matches(r, key_column, value))
        .map(|r| r.project(columns))
        .collect::<Vec<_>>();
    if rows.is_empty() {
        debug!(sheet = %sheet.name, key_column, key = value, "no rows for key");
    }
    Some(rows)
}
