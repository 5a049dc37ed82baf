//! The persistence seam: stage company trees, then commit them in one unit.

use async_trait::async_trait;
use farmdir_core::{CompanyTree, StoredTables};
use serde::Serialize;
use tracing::info;

use crate::driver::SchemaReady;
use crate::error::PersistenceError;

/// Row counts written by one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub companies: usize,
    pub addresses: usize,
    pub products: usize,
    pub facilities: usize,
}

impl CommitSummary {
    pub fn of(trees: &[CompanyTree]) -> Self {
        trees.iter().fold(Self::default(), |acc, tree| Self {
            companies: acc.companies + 1,
            addresses: acc.addresses + tree.address_count(),
            products: acc.products + tree.products.len(),
            facilities: acc.facilities + tree.facilities.len(),
        })
    }
}

/// A store session. Staging never touches the backing store; `commit` writes
/// everything staged so far atomically and clears the stage whatever the outcome.
#[async_trait]
pub trait StagingStore: Send {
    fn stage(&mut self, tree: CompanyTree);

    fn staged_len(&self) -> usize;

    async fn commit(&mut self) -> Result<CommitSummary, PersistenceError>;
}

/// In-process store used for dry runs, tests and the in-memory web backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: StoredTables,
    staged: Vec<CompanyTree>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop and recreate all tables; id sequences restart at 1.
    pub fn reset(&mut self) -> SchemaReady {
        self.tables = StoredTables::default();
        self.staged.clear();
        SchemaReady::new()
    }

    pub fn tables(&self) -> &StoredTables {
        &self.tables
    }

    pub fn into_tables(self) -> StoredTables {
        self.tables
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    fn stage(&mut self, tree: CompanyTree) {
        self.staged.push(tree);
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    async fn commit(&mut self) -> Result<CommitSummary, PersistenceError> {
        let staged = std::mem::take(&mut self.staged);
        let summary = CommitSummary::of(&staged);

        let mut next = self.tables.clone();
        for tree in &staged {
            next.insert_tree(tree);
        }
        self.tables = next;

        info!(
            companies = summary.companies,
            addresses = summary.addresses,
            products = summary.products,
            facilities = summary.facilities,
            "committed to memory store"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmdir_core::{Address, Company, Facility, FacilityTree, Product};

    fn company(name: &str) -> Company {
        Company {
            trade_name: name.into(),
            country: "US".into(),
            for_profit: true,
            ..Default::default()
        }
    }

    fn tree_with_children() -> CompanyTree {
        let mut tree = CompanyTree::new(company("Acme Farms"));
        tree.address = Some(Address {
            city: Some("Newark".into()),
            ..Default::default()
        });
        tree.products.push(Product {
            name: "Basil".into(),
            ..Default::default()
        });
        tree.facilities.push(FacilityTree {
            facility: Facility {
                nickname: Some("Acme HQ".into()),
                ..Default::default()
            },
            address: Some(Address::default()),
        });
        tree.facilities.push(FacilityTree {
            facility: Facility::default(),
            address: None,
        });
        tree
    }

    #[test]
    fn summary_counts_every_owned_row() {
        let trees = vec![tree_with_children(), CompanyTree::new(company("Beta"))];
        assert_eq!(
            CommitSummary::of(&trees),
            CommitSummary {
                companies: 2,
                addresses: 2,
                products: 1,
                facilities: 2,
            }
        );
    }

    #[tokio::test]
    async fn staging_is_invisible_until_commit() {
        let mut store = MemoryStore::new();
        let _ready = store.reset();
        store.stage(tree_with_children());
        assert_eq!(store.staged_len(), 1);
        assert!(store.tables().companies.is_empty());

        let summary = store.commit().await.expect("commit");
        assert_eq!(summary.companies, 1);
        assert_eq!(store.staged_len(), 0);

        let tables = store.tables();
        assert_eq!(tables.companies[0].id, 1);
        assert_eq!(tables.companies[0].address_id, Some(1));
        assert_eq!(tables.facilities[0].address_id, Some(2));
        assert_eq!(tables.facilities[1].address_id, None);
        assert_eq!(tables.products[0].company_id, 1);
    }

    #[tokio::test]
    async fn reset_restarts_identifiers() {
        let mut store = MemoryStore::new();
        store.stage(CompanyTree::new(company("Acme Farms")));
        store.commit().await.expect("commit");
        store.stage(CompanyTree::new(company("Beta")));
        store.commit().await.expect("commit");
        assert_eq!(store.tables().companies[1].id, 2);

        let _ready = store.reset();
        store.stage(CompanyTree::new(company("Beta")));
        store.commit().await.expect("commit");
        assert_eq!(store.tables().companies.len(), 1);
        assert_eq!(store.tables().companies[0].id, 1);
    }
}
