//! Untyped sheet rows and the typed field mapping they normalize into.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// A single normalized cell. `Null` is the only representation of "no value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Mapping from field name to normalized value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn int(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Copy of this record restricted to `fields`; names the record lacks are skipped.
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Record {
        fields
            .into_iter()
            .filter_map(|f| self.0.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A flat table of string cells with a header row, as exported from a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 1-based source line each row starts on; quoted cells may span lines.
    #[serde(default)]
    pub lines: Vec<usize>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Append a row on the line after the previous one.
    pub fn push_row(&mut self, row: Vec<String>) {
        let line = self.lines.last().map_or(2, |l| l + 1);
        self.push_row_at(row, line);
    }

    pub fn push_row_at(&mut self, row: Vec<String>, line: usize) {
        self.rows.push(row);
        self.lines.push(line);
    }

    /// Source line of row `idx`, assuming one line per row when unrecorded.
    pub fn line(&self, idx: usize) -> usize {
        self.lines.get(idx).copied().unwrap_or(idx + 2)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> BTreeSet<String> {
        self.headers.iter().cloned().collect()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// Cell text; short rows read as blank.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        let row = self.rows.get(row)?;
        Some(row.get(idx).map(String::as_str).unwrap_or(""))
    }

    /// Left-joins `columns` from `other` onto this sheet where this sheet's `key`
    /// equals `other`'s `other_key`.
    ///
    /// Columns missing here are appended; cells beyond the header are dropped
    /// first so appended columns start blank. When `other` repeats a key, its
    /// first row wins. Returns the number of rows that found a partner; `None`
    /// if either side lacks its key column.
    pub fn left_join(
        &mut self,
        other: &Sheet,
        key: &str,
        other_key: &str,
        columns: &[&str],
    ) -> Option<usize> {
        let self_key = self.column_index(key)?;
        let other_key = other.column_index(other_key)?;
        let base_width = self.headers.len();

        let mut by_key: HashMap<&str, &Vec<String>> = HashMap::new();
        for row in &other.rows {
            if let Some(k) = row.get(other_key) {
                by_key.entry(k.as_str()).or_insert(row);
            }
        }

        let mut pairs = Vec::with_capacity(columns.len());
        for column in columns {
            let Some(src) = other.column_index(column) else {
                continue;
            };
            let dst = match self.column_index(column) {
                Some(idx) => idx,
                None => {
                    self.headers.push(column.to_string());
                    self.headers.len() - 1
                }
            };
            pairs.push((src, dst));
        }

        let width = self.headers.len();
        let mut matched = 0;
        for row in &mut self.rows {
            row.truncate(base_width);
            row.resize(width, String::new());
            let Some(partner) = by_key.get(row[self_key].as_str()) else {
                continue;
            };
            matched += 1;
            for (src, dst) in &pairs {
                row[*dst] = partner.get(*src).cloned().unwrap_or_default();
            }
        }
        Some(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(name: &str, headers: &[&str], rows: &[&[&str]]) -> Sheet {
        let mut s = Sheet::new(name, headers.iter().map(|h| h.to_string()).collect());
        for row in rows {
            s.push_row(row.iter().map(|c| c.to_string()).collect());
        }
        s
    }

    #[test]
    fn short_rows_read_as_blank() {
        let s = sheet("address", &["nickname", "city"], &[&["HQ"]]);
        assert_eq!(s.cell(0, "city"), Some(""));
        assert_eq!(s.cell(0, "zip"), None);
    }

    #[test]
    fn left_join_appends_columns_and_first_partner_wins() {
        let mut addresses = sheet(
            "address",
            &["nickname", "city"],
            &[&["Acme HQ", "Newark"], &["Acme Barn", "Camden"]],
        );
        let locations = sheet(
            "locations",
            &["nickname", "latitude", "longitude"],
            &[&["Acme HQ", "40.7", "-74.1"], &["Acme HQ", "0", "0"]],
        );

        let matched = addresses.left_join(&locations, "nickname", "nickname", &["latitude", "longitude"]);

        assert_eq!(matched, Some(1));
        assert_eq!(addresses.headers, vec!["nickname", "city", "latitude", "longitude"]);
        assert_eq!(addresses.cell(0, "latitude"), Some("40.7"));
        assert_eq!(addresses.cell(1, "latitude"), Some(""));
    }

    #[test]
    fn left_join_ignores_cells_past_the_header() {
        let mut addresses = sheet(
            "address",
            &["nickname", "city"],
            &[&["Acme Barn", "Camden", "see notes"], &["Acme HQ", "Newark", "x", "y"]],
        );
        let locations = sheet(
            "locations",
            &["site", "latitude", "longitude"],
            &[&["Acme HQ", "40.7", "-74.1"]],
        );

        let matched = addresses.left_join(&locations, "nickname", "site", &["latitude", "longitude"]);

        assert_eq!(matched, Some(1));
        assert_eq!(addresses.rows[0], vec!["Acme Barn", "Camden", "", ""]);
        assert_eq!(addresses.cell(0, "latitude"), Some(""));
        assert_eq!(addresses.cell(1, "latitude"), Some("40.7"));
        assert_eq!(addresses.cell(1, "longitude"), Some("-74.1"));
    }

    #[test]
    fn rows_remember_their_source_line() {
        let mut s = sheet("company", &["trade_name"], &[&["Acme"]]);
        s.push_row_at(vec!["Beta".into()], 5);
        s.push_row(vec!["Gamma".into()]);
        assert_eq!(s.line(0), 2);
        assert_eq!(s.line(1), 5);
        assert_eq!(s.line(2), 6);
    }

    #[test]
    fn left_join_without_key_column_is_refused() {
        let mut addresses = sheet("address", &["city"], &[&["Newark"]]);
        let locations = sheet("locations", &["nickname", "latitude"], &[]);
        assert_eq!(addresses.left_join(&locations, "nickname", "nickname", &["latitude"]), None);
        assert_eq!(addresses.headers, vec!["city"]);
    }

    #[test]
    fn projection_keeps_only_requested_fields() {
        let record: Record = [
            ("name".to_string(), Value::Text("Basil".into())),
            ("company_trade_name".to_string(), Value::Text("Acme".into())),
        ]
        .into_iter()
        .collect();
        let wanted = ["name".to_string(), "category".to_string()];
        let projected = record.project(wanted.iter());
        assert_eq!(projected.field_names().into_iter().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn null_serializes_as_json_null() {
        let json = serde_json::to_string(&vec![Value::Null, Value::Int(3)]).unwrap();
        assert_eq!(json, "[null,3]");
    }
}
