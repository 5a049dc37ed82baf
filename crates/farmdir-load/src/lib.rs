//! Sheet reconciliation and directory loading.

pub mod driver;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod normalize;
pub mod postgres;
pub mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use farmdir_core::Sheet;
use farmdir_storage::sheets::{
    ADDRESS_SHEET, COMPANY_SHEET, FACILITY_SHEET, LOCATIONS_SHEET, PRODUCT_SHEET,
};
use farmdir_storage::{
    geocode::write_locations_csv, DataDir, Geocoder, HttpClientConfig, HttpFetcher,
    SheetDownloader, StoredSheet,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tokio::fs;
use tracing::{info, warn};

pub use driver::{LoadDriver, LoadReport, LoadWarning, SchemaReady};
pub use error::{LoadError, LoadErrorKind, PersistenceError, TypeCoercionError};
pub use graph::{GraphBuilder, MissingJoinColumn, Relation, UnmatchedKey};
pub use matcher::{find_all, find_first, flagged};
pub use normalize::{matching_fields, normalize_sheet, prepare_sheets, PreparedSheets, TypedSheet};
pub use postgres::{reset_schema, PgStore};
pub use store::{CommitSummary, MemoryStore, StagingStore};

pub const CRATE_NAME: &str = "farmdir-load";

/// Spreadsheet the directory is maintained in.
pub const DEFAULT_DOC_ID: &str = "1IXViZcOCmt5ZO-QJBKQ0HUjwna52Vnr6_WcMlQbpCp4";

#[derive(Debug, Clone)]
pub struct FarmdirConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub sheet_delay_secs: u64,
    pub geocode_delay_secs: u64,
    pub web_port: u16,
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl FarmdirConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/indoorfarms".to_string()),
            data_dir: std::env::var("FARMDIR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            workspace_root: std::env::var("FARMDIR_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            user_agent: std::env::var("FARMDIR_USER_AGENT")
                .unwrap_or_else(|_| "farmdir/0.1 (indoor farms directory loader)".to_string()),
            http_timeout_secs: env_number("FARMDIR_HTTP_TIMEOUT_SECS", 20),
            sheet_delay_secs: env_number("FARMDIR_SHEET_DELAY_SECS", 1),
            geocode_delay_secs: env_number("FARMDIR_GEOCODE_DELAY_SECS", 5),
            web_port: env_number("FARMDIR_WEB_PORT", 8000),
        }
    }

    fn http_fetcher(&self, min_interval_secs: u64) -> Result<HttpFetcher> {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            min_interval: Some(Duration::from_secs(min_interval_secs)),
            ..Default::default()
        })
    }
}

/// Join columns used to correlate rows across sheets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JoinKeys {
    /// Address sheet column holding the owning company's trade name.
    pub address_company: String,
    /// Address sheet column holding the facility nickname; also matched against `locations`.
    pub address_facility: String,
    pub address_default_flag: String,
    pub product_company: String,
    pub facility_company: String,
    /// Locations sheet column compared with the address nickname.
    pub locations: String,
}

impl Default for JoinKeys {
    fn default() -> Self {
        Self {
            address_company: "trade_name".to_string(),
            address_facility: "nickname".to_string(),
            address_default_flag: "make_default".to_string(),
            product_company: "company_trade_name".to_string(),
            facility_company: "company_trade_name".to_string(),
            locations: "nickname".to_string(),
        }
    }
}

fn default_sheet_names() -> Vec<String> {
    [COMPANY_SHEET, ADDRESS_SHEET, PRODUCT_SHEET, FACILITY_SHEET]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_doc_id() -> String {
    DEFAULT_DOC_ID.to_string()
}

/// Contents of `sheets.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SheetRegistry {
    #[serde(default = "default_doc_id")]
    pub doc_id: String,
    #[serde(default = "default_sheet_names")]
    pub sheets: Vec<String>,
    #[serde(default)]
    pub join_keys: JoinKeys,
}

impl Default for SheetRegistry {
    fn default() -> Self {
        Self {
            doc_id: default_doc_id(),
            sheets: default_sheet_names(),
            join_keys: JoinKeys::default(),
        }
    }
}

impl SheetRegistry {
    pub fn from_yaml(text: &str) -> Result<Self, LoadError> {
        let registry: Self = serde_yaml::from_str(text)
            .map_err(|err| LoadError::Configuration(format!("parsing sheets.yaml: {err}")))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Read `<root>/sheets.yaml`, falling back to the defaults when the file is absent.
    pub async fn load(workspace_root: &Path) -> Result<Self, LoadError> {
        let path = workspace_root.join("sheets.yaml");
        if !path.exists() {
            warn!(path = %path.display(), "no sheet registry; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).await.map_err(|err| {
            LoadError::Configuration(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<(), LoadError> {
        if self.doc_id.trim().is_empty() {
            return Err(LoadError::Configuration("doc_id is empty".into()));
        }
        let keys = &self.join_keys;
        for (name, value) in [
            ("address_company", &keys.address_company),
            ("address_facility", &keys.address_facility),
            ("address_default_flag", &keys.address_default_flag),
            ("product_company", &keys.product_company),
            ("facility_company", &keys.facility_company),
            ("locations", &keys.locations),
        ] {
            if value.trim().is_empty() {
                return Err(LoadError::Configuration(format!("join key {name} is empty")));
            }
        }
        Ok(())
    }
}

/// The raw row-sets one load run reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetSet {
    pub company: Sheet,
    pub address: Sheet,
    pub product: Sheet,
    pub facility: Sheet,
    /// Geocoded `nickname, latitude, longitude`, joined onto addresses when present.
    pub locations: Option<Sheet>,
}

impl SheetSet {
    pub fn load(data_dir: &DataDir) -> Result<Self> {
        Ok(Self {
            company: data_dir.load_sheet(COMPANY_SHEET)?,
            address: data_dir.load_sheet(ADDRESS_SHEET)?,
            product: data_dir.load_sheet(PRODUCT_SHEET)?,
            facility: data_dir.load_sheet(FACILITY_SHEET)?,
            locations: data_dir.load_optional_sheet(LOCATIONS_SHEET)?,
        })
    }
}

async fn driver_from_config(config: &FarmdirConfig) -> Result<LoadDriver, LoadError> {
    let registry = SheetRegistry::load(&config.workspace_root).await?;
    let sheets = SheetSet::load(&DataDir::new(config.data_dir.clone())).map_err(LoadError::Source)?;
    info!(
        companies = sheets.company.len(),
        addresses = sheets.address.len(),
        products = sheets.product.len(),
        facilities = sheets.facility.len(),
        locations = sheets.locations.as_ref().map_or(0, Sheet::len),
        "sheets loaded"
    );
    Ok(LoadDriver::new(sheets, registry.join_keys))
}

/// Reset the schema and load the data directory's sheets. A dry run loads into
/// memory instead of PostgreSQL. Every failure is reported, never returned.
pub async fn run_load_once_from_env(dry_run: bool) -> LoadReport {
    let config = FarmdirConfig::from_env();
    let driver = match driver_from_config(&config).await {
        Ok(driver) => driver,
        Err(err) => return LoadReport::failed(&err),
    };

    if dry_run {
        let mut store = MemoryStore::new();
        let ready = store.reset();
        return driver.run(&mut store, ready).await;
    }

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => return LoadReport::failed(&LoadError::Persistence(err.into())),
    };
    let ready = match reset_schema(&pool).await {
        Ok(ready) => ready,
        Err(err) => return LoadReport::failed(&LoadError::Persistence(err)),
    };
    let mut store = PgStore::new(pool);
    driver.run(&mut store, ready).await
}

/// Download sheets into the data directory; `only` narrows the registry's list.
pub async fn refresh_sheets_from_env(only: &[String], backup: bool) -> Result<Vec<StoredSheet>> {
    let config = FarmdirConfig::from_env();
    let registry = SheetRegistry::load(&config.workspace_root).await?;
    let names = if only.is_empty() {
        registry.sheets.clone()
    } else {
        for name in only.iter().filter(|n| !registry.sheets.contains(*n)) {
            warn!(sheet = %name, "sheet is not listed in sheets.yaml; fetching anyway");
        }
        only.to_vec()
    };

    let http = config.http_fetcher(config.sheet_delay_secs)?;
    let data_dir = DataDir::new(config.data_dir.clone());
    SheetDownloader::new(&http, &data_dir, registry.doc_id)
        .with_backup(backup)
        .refresh_all(&names)
        .await
}

/// Geocode every facility address and write the locations sheet.
/// Returns the written path and the number of located facilities.
pub async fn write_locations_from_env(output: Option<PathBuf>) -> Result<(PathBuf, usize)> {
    let config = FarmdirConfig::from_env();
    let registry = SheetRegistry::load(&config.workspace_root).await?;
    let data_dir = DataDir::new(config.data_dir.clone());
    let mut sheets = SheetSet::load(&data_dir)?;
    sheets.locations = None;

    let (trees, _warnings) = LoadDriver::new(sheets, registry.join_keys).build_trees()?;
    let facilities = trees
        .iter()
        .flat_map(|tree| tree.facilities.iter())
        .filter_map(|f| Some((f.facility.nickname.as_deref()?, f.address.as_ref()?)))
        .collect::<Vec<_>>();
    info!(facilities = facilities.len(), "geocoding facility addresses");

    let http = config.http_fetcher(config.geocode_delay_secs)?;
    let locations = Geocoder::new(&http).locate_all(facilities).await?;

    let mut body = Vec::new();
    write_locations_csv(&mut body, &locations)?;
    let path = match output {
        Some(path) => {
            fs::write(&path, &body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            path
        }
        None => data_dir.write_sheet(LOCATIONS_SHEET, &body, Utc::now()).await?.path,
    };
    Ok((path, locations.len()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn registry_defaults_fill_missing_keys() {
        let registry = SheetRegistry::from_yaml(
            "doc_id: abc123\njoin_keys:\n  product_company: owner_trade_name\n",
        )
        .expect("parse");
        assert_eq!(registry.doc_id, "abc123");
        assert_eq!(registry.sheets, vec!["company", "address", "product", "facility"]);
        assert_eq!(registry.join_keys.product_company, "owner_trade_name");
        assert_eq!(registry.join_keys.address_facility, "nickname");
        assert_eq!(registry.join_keys.locations, "nickname");
    }

    #[test]
    fn empty_locations_key_is_a_configuration_error() {
        let err = SheetRegistry::from_yaml("join_keys:\n  locations: \" \"\n").unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::Configuration);
        assert!(err.to_string().contains("locations"));
    }

    #[test]
    fn empty_join_key_is_a_configuration_error() {
        let err = SheetRegistry::from_yaml("join_keys:\n  address_company: \"\"\n").unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::Configuration);
        assert!(err.to_string().contains("address_company"));
    }

    #[test]
    fn workspace_registry_parses() {
        let text = include_str!("../../../sheets.yaml");
        let registry = SheetRegistry::from_yaml(text).expect("sheets.yaml");
        assert_eq!(registry.doc_id, DEFAULT_DOC_ID);
        assert_eq!(registry.join_keys, JoinKeys::default());
    }

    #[tokio::test]
    async fn missing_registry_falls_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let registry = SheetRegistry::load(dir.path()).await.expect("load");
        assert_eq!(registry, SheetRegistry::default());
    }

    #[test]
    fn sheet_set_requires_the_four_core_sheets() {
        let dir = tempdir().expect("tempdir");
        let data_dir = DataDir::new(dir.path());
        std::fs::write(data_dir.sheet_path(COMPANY_SHEET), "trade_name,country\n").expect("write");
        let err = SheetSet::load(&data_dir).unwrap_err();
        assert!(format!("{err:#}").contains("address"), "{err:#}");
    }
}
