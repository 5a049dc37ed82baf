//! CSV sheet reading and Google Sheets export download.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use farmdir_core::Sheet;
use tracing::info;

use crate::{DataDir, HttpFetcher, StoredSheet};

pub const COMPANY_SHEET: &str = "company";
pub const ADDRESS_SHEET: &str = "address";
pub const PRODUCT_SHEET: &str = "product";
pub const FACILITY_SHEET: &str = "facility";
pub const LOCATIONS_SHEET: &str = "locations";

pub fn csv_export_url(doc_id: &str, sheet_name: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{doc_id}/gviz/tq?tqx=out:csv&sheet={sheet_name}")
}

/// Parse CSV with a header row into a sheet. Header names are trimmed; cells are kept verbatim.
pub fn read_sheet<R: Read>(name: &str, reader: R) -> Result<Sheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("reading {name} sheet headers"))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut sheet = Sheet::new(name, headers);
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("reading {name} sheet record {}", idx + 1))?;
        let row = record.iter().map(str::to_string).collect();
        match record.position() {
            Some(pos) => sheet.push_row_at(row, pos.line() as usize),
            None => sheet.push_row(row),
        }
    }
    Ok(sheet)
}

pub fn read_sheet_file(name: &str, path: impl AsRef<Path>) -> Result<Sheet> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_sheet(name, file).with_context(|| format!("parsing {}", path.display()))
}

impl DataDir {
    pub fn load_sheet(&self, name: &str) -> Result<Sheet> {
        read_sheet_file(name, self.sheet_path(name))
    }

    pub fn load_optional_sheet(&self, name: &str) -> Result<Option<Sheet>> {
        let path = self.sheet_path(name);
        if !path.exists() {
            return Ok(None);
        }
        read_sheet_file(name, path).map(Some)
    }
}

/// Downloads sheets from one spreadsheet document into a data directory.
pub struct SheetDownloader<'a> {
    http: &'a HttpFetcher,
    data_dir: &'a DataDir,
    doc_id: String,
    backup: bool,
}

impl<'a> SheetDownloader<'a> {
    pub fn new(http: &'a HttpFetcher, data_dir: &'a DataDir, doc_id: impl Into<String>) -> Self {
        Self {
            http,
            data_dir,
            doc_id: doc_id.into(),
            backup: true,
        }
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub async fn refresh(&self, sheet_name: &str) -> Result<StoredSheet> {
        let url = csv_export_url(&self.doc_id, sheet_name);
        info!(sheet = sheet_name, %url, "downloading sheet");
        let response = self
            .http
            .fetch_bytes(&url)
            .await
            .with_context(|| format!("downloading {sheet_name} sheet"))?;
        let fetched_at = Utc::now();

        let backup_path = if self.backup {
            self.data_dir.backup_sheet(sheet_name).await?
        } else {
            None
        };
        let mut stored = self
            .data_dir
            .write_sheet(sheet_name, &response.body, fetched_at)
            .await?;
        stored.backup_path = backup_path;
        Ok(stored)
    }

    pub async fn refresh_all<S: AsRef<str>>(&self, sheet_names: &[S]) -> Result<Vec<StoredSheet>> {
        let mut out = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            out.push(self.refresh(name.as_ref()).await?);
        }
        Ok(out)
    }
}
