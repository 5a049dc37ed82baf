//! Company search over the loaded directory tables.

use std::collections::HashSet;

use async_trait::async_trait;
use farmdir_core::{Address, Company, Facility, Product, StoredTables};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// One company in a search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyHit {
    pub id: i64,
    pub trade_name: String,
    pub country: String,
    pub website: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl CompanyHit {
    pub fn location(&self) -> String {
        [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityDetail {
    #[serde(flatten)]
    pub facility: Facility,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyDetail {
    pub id: i64,
    #[serde(flatten)]
    pub company: Company,
    pub address: Option<Address>,
    pub products: Vec<Product>,
    pub facilities: Vec<FacilityDetail>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub companies: i64,
    pub addresses: i64,
    pub products: i64,
    pub facilities: i64,
}

/// Whitespace-separated search words; empty input yields no words.
pub fn search_words(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_string).collect()
}

#[async_trait]
pub trait DirectorySearch: Send + Sync {
    /// Companies whose trade name, or one of whose products' name, category or
    /// key words, contains any of `words` (case-insensitive). Each company
    /// appears once, in the order it was first found.
    async fn search(&self, words: &[String]) -> anyhow::Result<Vec<CompanyHit>>;

    async fn company(&self, id: i64) -> anyhow::Result<Option<CompanyDetail>>;

    async fn totals(&self) -> anyhow::Result<Totals>;
}

fn push_unique(out: &mut Vec<CompanyHit>, seen: &mut HashSet<i64>, hit: CompanyHit) {
    if seen.insert(hit.id) {
        out.push(hit);
    }
}

/// Search over tables held in memory, e.g. after a dry-run load.
pub struct MemorySearch {
    tables: StoredTables,
}

impl MemorySearch {
    pub fn new(tables: StoredTables) -> Self {
        Self { tables }
    }

    fn hit(&self, id: i64) -> Option<CompanyHit> {
        let row = self.tables.company(id)?;
        let address = row.address_id.and_then(|a| self.tables.address(a));
        Some(CompanyHit {
            id: row.id,
            trade_name: row.company.trade_name.clone(),
            country: row.company.country.clone(),
            website: row.company.website.clone(),
            city: address.and_then(|a| a.address.city.clone()),
            state: address.and_then(|a| a.address.state.clone()),
        })
    }

    fn matches(&self, company_id: i64, trade_name: &str, word: &str) -> bool {
        let contains = |text: Option<&str>| {
            text.map_or(false, |t| t.to_lowercase().contains(word))
        };
        contains(Some(trade_name))
            || self.tables.products_of(company_id).any(|p| {
                contains(Some(p.product.name.as_str()))
                    || contains(p.product.category.as_deref())
                    || contains(p.product.key_words.as_deref())
            })
    }
}

#[async_trait]
impl DirectorySearch for MemorySearch {
    async fn search(&self, words: &[String]) -> anyhow::Result<Vec<CompanyHit>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for word in words {
            let word = word.to_lowercase();
            for row in &self.tables.companies {
                if self.matches(row.id, &row.company.trade_name, &word) {
                    if let Some(hit) = self.hit(row.id) {
                        push_unique(&mut out, &mut seen, hit);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn company(&self, id: i64) -> anyhow::Result<Option<CompanyDetail>> {
        let Some(row) = self.tables.company(id) else {
            return Ok(None);
        };
        let address_of = |id: Option<i64>| {
            id.and_then(|a| self.tables.address(a))
                .map(|a| a.address.clone())
        };
        Ok(Some(CompanyDetail {
            id: row.id,
            company: row.company.clone(),
            address: address_of(row.address_id),
            products: self
                .tables
                .products_of(id)
                .map(|p| p.product.clone())
                .collect(),
            facilities: self
                .tables
                .facilities_of(id)
                .map(|f| FacilityDetail {
                    facility: f.facility.clone(),
                    address: address_of(f.address_id),
                })
                .collect(),
        }))
    }

    async fn totals(&self) -> anyhow::Result<Totals> {
        Ok(Totals {
            companies: self.tables.companies.len() as i64,
            addresses: self.tables.addresses.len() as i64,
            products: self.tables.products.len() as i64,
            facilities: self.tables.facilities.len() as i64,
        })
    }
}

/// `%word%` with LIKE metacharacters escaped.
pub fn like_pattern(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 2);
    out.push('%');
    for ch in word.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

pub struct PgSearch {
    pool: PgPool,
}

impl PgSearch {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn address(&self, id: Option<i64>) -> anyhow::Result<Option<Address>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let row = sqlx::query(
            r#"
            SELECT address_1, address_2, suite, city, state, postal, country,
                   latitude, longitude, make_default
              FROM address
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| address_from_row(&r)).transpose()
    }
}

fn address_from_row(row: &PgRow) -> anyhow::Result<Address> {
    Ok(Address {
        address_1: row.try_get("address_1")?,
        address_2: row.try_get("address_2")?,
        suite: row.try_get("suite")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        postal: row.try_get("postal")?,
        country: row.try_get("country")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        make_default: row.try_get("make_default")?,
    })
}

#[async_trait]
impl DirectorySearch for PgSearch {
    async fn search(&self, words: &[String]) -> anyhow::Result<Vec<CompanyHit>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for word in words {
            let rows = sqlx::query(
                r#"
                SELECT c.id, c.trade_name, c.country, c.website, a.city, a.state
                  FROM company c
                  LEFT JOIN address a ON a.id = c.address_id
                 WHERE c.trade_name ILIKE $1
                    OR EXISTS (
                        SELECT 1
                          FROM product p
                         WHERE p.company_id = c.id
                           AND (p.name ILIKE $1 OR p.category ILIKE $1 OR p.key_words ILIKE $1)
                    )
                 ORDER BY c.id
                "#,
            )
            .bind(like_pattern(word))
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let hit = CompanyHit {
                    id: row.try_get("id")?,
                    trade_name: row.try_get("trade_name")?,
                    country: row.try_get("country")?,
                    website: row.try_get("website")?,
                    city: row.try_get("city")?,
                    state: row.try_get("state")?,
                };
                push_unique(&mut out, &mut seen, hit);
            }
        }
        Ok(out)
    }

    async fn company(&self, id: i64) -> anyhow::Result<Option<CompanyDetail>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT trade_name, legal_name, website, year_founded, country, parent_id, statement,
                   total_employees, legal_form, for_profit, ownership, business_focus, address_id
              FROM company
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let company = Company {
            trade_name: row.try_get("trade_name")?,
            legal_name: row.try_get("legal_name")?,
            website: row.try_get("website")?,
            year_founded: row.try_get("year_founded")?,
            country: row.try_get("country")?,
            parent_id: row.try_get("parent_id")?,
            statement: row.try_get("statement")?,
            total_employees: row.try_get("total_employees")?,
            legal_form: row.try_get("legal_form")?,
            for_profit: row.try_get("for_profit")?,
            ownership: row.try_get("ownership")?,
            business_focus: row.try_get("business_focus")?,
        };
        let address = self.address(row.try_get("address_id")?).await?;

        let products = sqlx::query(
            r#"
            SELECT name, category, "user", description, key_words, distribution
              FROM product
             WHERE company_id = $1
             ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| -> anyhow::Result<Product> {
            Ok(Product {
                name: r.try_get("name")?,
                category: r.try_get("category")?,
                user: r.try_get("user")?,
                description: r.try_get("description")?,
                key_words: r.try_get("key_words")?,
                distribution: r.try_get("distribution")?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

        let facility_rows = sqlx::query(
            r#"
            SELECT nickname, "type", output, year_opened, employees, address_id
              FROM facility
             WHERE company_id = $1
             ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let mut facilities = Vec::with_capacity(facility_rows.len());
        for r in facility_rows {
            let facility = Facility {
                nickname: r.try_get("nickname")?,
                facility_type: r.try_get("type")?,
                output: r.try_get("output")?,
                year_opened: r.try_get("year_opened")?,
                employees: r.try_get("employees")?,
            };
            let address = self.address(r.try_get("address_id")?).await?;
            facilities.push(FacilityDetail { facility, address });
        }

        Ok(Some(CompanyDetail {
            id,
            company,
            address,
            products,
            facilities,
        }))
    }

    async fn totals(&self) -> anyhow::Result<Totals> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT count(*) FROM company) AS companies,
                   (SELECT count(*) FROM address) AS addresses,
                   (SELECT count(*) FROM product) AS products,
                   (SELECT count(*) FROM facility) AS facilities
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(Totals {
            companies: row.try_get("companies")?,
            addresses: row.try_get("addresses")?,
            products: row.try_get("products")?,
            facilities: row.try_get("facilities")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_split_on_any_whitespace() {
        assert_eq!(search_words("  leafy\tgreens \n"), vec!["leafy", "greens"]);
        assert!(search_words("   ").is_empty());
    }

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("kale"), "%kale%");
        assert_eq!(like_pattern("100%_raw"), "%100\\%\\_raw%");
    }

    #[test]
    fn hit_location_skips_blank_parts() {
        let mut hit = CompanyHit {
            id: 1,
            trade_name: "Acme Farms".into(),
            country: "US".into(),
            website: None,
            city: Some("Newark".into()),
            state: Some("NJ".into()),
        };
        assert_eq!(hit.location(), "Newark, NJ");
        hit.city = None;
        assert_eq!(hit.location(), "NJ");
    }
}
