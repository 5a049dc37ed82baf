//! PostgreSQL schema reset and the transactional staging store.

use async_trait::async_trait;
use farmdir_core::{Address, CompanyTree};
use sqlx::{PgConnection, PgPool};
use tracing::info;

use crate::driver::SchemaReady;
use crate::error::PersistenceError;
use crate::store::{CommitSummary, StagingStore};

pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Drop and recreate the four directory tables. Identity sequences restart at 1.
pub async fn reset_schema(pool: &PgPool) -> Result<SchemaReady, PersistenceError> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    info!("directory schema reset");
    Ok(SchemaReady::new())
}

pub struct PgStore {
    pool: PgPool,
    staged: Vec<CompanyTree>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            staged: Vec::new(),
        }
    }
}

#[async_trait]
impl StagingStore for PgStore {
    fn stage(&mut self, tree: CompanyTree) {
        self.staged.push(tree);
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// One transaction for the whole batch; any failure drops it, which rolls back.
    async fn commit(&mut self) -> Result<CommitSummary, PersistenceError> {
        let staged = std::mem::take(&mut self.staged);
        let summary = CommitSummary::of(&staged);

        let mut tx = self.pool.begin().await?;
        for tree in &staged {
            insert_tree(&mut *tx, tree).await?;
        }
        tx.commit().await?;

        info!(
            companies = summary.companies,
            addresses = summary.addresses,
            products = summary.products,
            facilities = summary.facilities,
            "committed to postgres"
        );
        Ok(summary)
    }
}

async fn insert_tree(conn: &mut PgConnection, tree: &CompanyTree) -> Result<i64, sqlx::Error> {
    let address_id = match &tree.address {
        Some(address) => Some(insert_address(conn, address).await?),
        None => None,
    };

    let c = &tree.company;
    let company_id: i64 = sqlx::query_scalar(
        "INSERT INTO company (trade_name, legal_name, website, year_founded, country, parent_id, \
         statement, total_employees, legal_form, for_profit, ownership, business_focus, address_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING id",
    )
    .bind(&c.trade_name)
    .bind(c.legal_name.as_deref())
    .bind(c.website.as_deref())
    .bind(c.year_founded)
    .bind(&c.country)
    .bind(c.parent_id)
    .bind(c.statement.as_deref())
    .bind(c.total_employees)
    .bind(c.legal_form.as_deref())
    .bind(c.for_profit)
    .bind(c.ownership.as_deref())
    .bind(c.business_focus.as_deref())
    .bind(address_id)
    .fetch_one(&mut *conn)
    .await?;

    for p in &tree.products {
        sqlx::query(
            "INSERT INTO product (company_id, name, category, \"user\", description, key_words, distribution) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(company_id)
        .bind(&p.name)
        .bind(p.category.as_deref())
        .bind(p.user.as_deref())
        .bind(p.description.as_deref())
        .bind(p.key_words.as_deref())
        .bind(p.distribution.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    for f in &tree.facilities {
        let address_id = match &f.address {
            Some(address) => Some(insert_address(conn, address).await?),
            None => None,
        };
        let facility = &f.facility;
        sqlx::query(
            "INSERT INTO facility (company_id, address_id, nickname, \"type\", output, year_opened, employees) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(company_id)
        .bind(address_id)
        .bind(facility.nickname.as_deref())
        .bind(facility.facility_type.as_deref())
        .bind(facility.output.as_deref())
        .bind(facility.year_opened)
        .bind(facility.employees)
        .execute(&mut *conn)
        .await?;
    }

    Ok(company_id)
}

async fn insert_address(conn: &mut PgConnection, a: &Address) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO address (address_1, address_2, suite, city, state, postal, country, \
         latitude, longitude, make_default) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
    )
    .bind(a.address_1.as_deref())
    .bind(a.address_2.as_deref())
    .bind(a.suite.as_deref())
    .bind(a.city.as_deref())
    .bind(a.state.as_deref())
    .bind(a.postal.as_deref())
    .bind(a.country.as_deref())
    .bind(a.latitude)
    .bind(a.longitude)
    .bind(a.make_default)
    .fetch_one(conn)
    .await
}
