//! One load run: normalize, build every company tree, stage, commit once.

use chrono::{DateTime, Utc};
use farmdir_core::CompanyTree;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{LoadError, LoadErrorKind};
use crate::graph::{unmatched_keys, GraphBuilder, MissingJoinColumn, UnmatchedKey};
use crate::normalize::prepare_sheets;
use crate::store::{CommitSummary, StagingStore};
use crate::{JoinKeys, SheetSet};

/// Proof that the target tables were dropped and recreated before this run.
///
/// Only a schema reset can mint one.
#[derive(Debug)]
pub struct SchemaReady {
    _private: (),
}

impl SchemaReady {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadWarning {
    MissingJoinColumn(MissingJoinColumn),
    Unmatched(UnmatchedKey),
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error_kind: Option<LoadErrorKind>,
    pub error_message: Option<String>,
    pub company_rows: usize,
    pub staged_companies: usize,
    pub committed: CommitSummary,
    pub warnings: Vec<LoadWarning>,
}

impl LoadReport {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            success: false,
            error_kind: None,
            error_message: None,
            company_rows: 0,
            staged_companies: 0,
            committed: CommitSummary::default(),
            warnings: Vec::new(),
        }
    }

    /// A report for a run that failed before the driver could start.
    pub fn failed(err: &LoadError) -> Self {
        let mut report = Self::started();
        report.fail(err);
        report
    }

    fn fail(&mut self, err: &LoadError) {
        error!(run_id = %self.run_id, kind = ?err.kind(), error = %err, "load run failed");
        self.success = false;
        self.error_kind = Some(err.kind());
        self.error_message = Some(err.to_string());
        self.finished_at = Utc::now();
    }

    fn succeed(&mut self, committed: CommitSummary) {
        self.success = true;
        self.committed = committed;
        self.finished_at = Utc::now();
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &UnmatchedKey> {
        self.warnings.iter().filter_map(|w| match w {
            LoadWarning::Unmatched(key) => Some(key),
            LoadWarning::MissingJoinColumn(_) => None,
        })
    }
}

pub struct LoadDriver {
    sheets: SheetSet,
    keys: JoinKeys,
}

impl LoadDriver {
    pub fn new(sheets: SheetSet, keys: JoinKeys) -> Self {
        Self { sheets, keys }
    }

    /// Normalize the sheets and build one tree per company row, in sheet order.
    pub fn build_trees(&self) -> Result<(Vec<CompanyTree>, Vec<LoadWarning>), LoadError> {
        let prepared = prepare_sheets(&self.sheets, &self.keys)?;
        let builder = GraphBuilder::new(&prepared, &self.keys);

        let mut warnings = builder
            .missing_join_columns()
            .into_iter()
            .map(LoadWarning::MissingJoinColumn)
            .collect::<Vec<_>>();

        let trees = prepared
            .company
            .rows
            .iter()
            .map(|row| builder.build_company(row))
            .collect::<Vec<_>>();
        warnings.extend(
            trees
                .iter()
                .flat_map(unmatched_keys)
                .map(LoadWarning::Unmatched),
        );
        Ok((trees, warnings))
    }

    /// Run the full load against `store`. Fatal errors end up in the returned
    /// report; nothing is staged unless every company tree was built.
    pub async fn run<S>(&self, store: &mut S, _ready: SchemaReady) -> LoadReport
    where
        S: StagingStore + ?Sized,
    {
        let mut report = LoadReport::started();
        let span = info_span!("load_run", run_id = %report.run_id);
        async {
            let (trees, warnings) = match self.build_trees() {
                Ok(built) => built,
                Err(err) => {
                    report.fail(&err);
                    return;
                }
            };
            report.company_rows = trees.len();
            report.warnings = warnings;
            if !report.warnings.is_empty() {
                warn!(count = report.warnings.len(), "load run has warnings");
            }

            for tree in trees {
                store.stage(tree);
            }
            report.staged_companies = store.staged_len();
            info!(staged = report.staged_companies, "staged company trees; committing");

            match store.commit().await {
                Ok(committed) => {
                    info!(
                        companies = committed.companies,
                        addresses = committed.addresses,
                        products = committed.products,
                        facilities = committed.facilities,
                        "load run committed"
                    );
                    report.succeed(committed);
                }
                Err(err) => report.fail(&LoadError::Persistence(err)),
            }
        }
        .instrument(span)
        .await;
        report
    }
}
