//! Assembles one company tree per company row from the other prepared sheets.

use farmdir_core::{
    Address, Company, CompanyTree, Facility, FacilityTree, FromRecord, Product, Record,
};
use serde::Serialize;
use tracing::warn;

use crate::matcher::{find_all, find_first, flagged};
use crate::normalize::{PreparedSheets, TypedSheet};
use crate::JoinKeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    CompanyAddress,
    FacilityAddress,
}

/// A key whose owning relation was left empty because no row matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedKey {
    pub relation: Relation,
    pub key: String,
}

/// A join column the configuration names but the sheet lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingJoinColumn {
    pub sheet: String,
    pub column: String,
}

pub struct GraphBuilder<'a> {
    sheets: &'a PreparedSheets,
    keys: &'a JoinKeys,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(sheets: &'a PreparedSheets, keys: &'a JoinKeys) -> Self {
        Self { sheets, keys }
    }

    /// Build a company and everything it owns. Lookups that find nothing leave the
    /// relation empty; this never fails.
    pub fn build_company(&self, row: &Record) -> CompanyTree {
        let company = Company::from_record(&row.project(&self.sheets.company.fields));
        let trade_name = company.trade_name.clone();
        let mut tree = CompanyTree::new(company);

        tree.address = self.company_address(&trade_name);
        tree.products = self
            .owned_rows(&self.sheets.product, &self.keys.product_company, &trade_name)
            .iter()
            .map(Product::from_record)
            .collect();
        tree.facilities = self
            .owned_rows(&self.sheets.facility, &self.keys.facility_company, &trade_name)
            .iter()
            .map(|record| self.facility_tree(record))
            .collect();
        tree
    }

    fn owned_rows(&self, sheet: &TypedSheet, key_column: &str, trade_name: &str) -> Vec<Record> {
        find_all(trade_name, sheet, key_column, &sheet.fields).unwrap_or_default()
    }

    fn company_address(&self, trade_name: &str) -> Option<Address> {
        let sheet = &self.sheets.address;
        let is_default = flagged(&self.keys.address_default_flag);
        let filter = if sheet.has_column(&self.keys.address_default_flag) {
            Some(&is_default as &dyn Fn(&Record) -> bool)
        } else {
            None
        };
        find_first(trade_name, sheet, &self.keys.address_company, &sheet.fields, filter)
            .map(|r| Address::from_record(&r))
    }

    fn facility_tree(&self, record: &Record) -> FacilityTree {
        let facility = Facility::from_record(record);
        let address = match facility.nickname.as_deref() {
            Some(nickname) => {
                let sheet = &self.sheets.address;
                find_first(nickname, sheet, &self.keys.address_facility, &sheet.fields, None)
                    .map(|r| Address::from_record(&r))
            }
            None => {
                warn!("facility without a nickname; its address cannot be resolved");
                None
            }
        };
        FacilityTree { facility, address }
    }

    /// Join columns the configuration expects but the prepared sheets lack.
    pub fn missing_join_columns(&self) -> Vec<MissingJoinColumn> {
        let checks = [
            (&self.sheets.address, &self.keys.address_company),
            (&self.sheets.address, &self.keys.address_facility),
            (&self.sheets.product, &self.keys.product_company),
            (&self.sheets.facility, &self.keys.facility_company),
        ];
        checks
            .into_iter()
            .filter(|(sheet, column)| !sheet.has_column(column))
            .map(|(sheet, column)| MissingJoinColumn {
                sheet: sheet.name.clone(),
                column: column.clone(),
            })
            .collect()
    }
}

/// Relations of `tree` that a lookup left empty.
pub fn unmatched_keys(tree: &CompanyTree) -> Vec<UnmatchedKey> {
    let mut out = Vec::new();
    if tree.address.is_none() {
        out.push(UnmatchedKey {
            relation: Relation::CompanyAddress,
            key: tree.company.trade_name.clone(),
        });
    }
    for facility in tree.facilities.iter().filter(|f| f.address.is_none()) {
        out.push(UnmatchedKey {
            relation: Relation::FacilityAddress,
            key: facility.facility.nickname.clone().unwrap_or_default(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::prepare_sheets;
    use crate::test_support::sheet;
    use crate::SheetSet;

    fn acme_sheets() -> SheetSet {
        SheetSet {
            company: sheet(
                "company",
                &["trade_name", "country", "for_profit"],
                &[&["Acme Farms", "US", ""], &["Beta Greens", "CA", "TRUE"]],
            ),
            address: sheet(
                "address",
                &["trade_name", "nickname", "address_1", "city", "make_default"],
                &[
                    &["Acme Farms", "Acme HQ", "1 Main St", "Newark", "TRUE"],
                    &["Acme Farms", "Acme Annex", "9 Side St", "Newark", "TRUE"],
                ],
            ),
            product: sheet(
                "product",
                &["company_trade_name", "name", "user"],
                &[
                    &["Acme Farms", "Basil", ""],
                    &["Beta Greens", "Kale", "wholesale"],
                    &["Acme Farms", "Arugula", "consumer"],
                ],
            ),
            facility: sheet(
                "facility",
                &["company_trade_name", "nickname", "type", "year_opened"],
                &[
                    &["Acme Farms", "Acme HQ", "vertical farm", "2019"],
                    &["Acme Farms", "Acme West", "greenhouse", ""],
                ],
            ),
            locations: None,
        }
    }

    #[test]
    fn facilities_resolve_addresses_independently() {
        let keys = JoinKeys::default();
        let prepared = prepare_sheets(&acme_sheets(), &keys).expect("prepare");
        let builder = GraphBuilder::new(&prepared, &keys);

        let tree = builder.build_company(&prepared.company.rows[0]);

        assert_eq!(tree.facilities.len(), 2);
        let with_address = tree.facilities.iter().filter(|f| f.address.is_some()).count();
        assert_eq!(with_address, 1);
        let hq = tree.facilities[0].address.as_ref().expect("hq address");
        assert_eq!(hq.address_1.as_deref(), Some("1 Main St"));
        assert_eq!(tree.facilities[0].facility.facility_type.as_deref(), Some("vertical farm"));
        assert_eq!(tree.facilities[1].facility.year_opened, None);
    }

    #[test]
    fn company_takes_the_first_default_address() {
        let keys = JoinKeys::default();
        let prepared = prepare_sheets(&acme_sheets(), &keys).expect("prepare");
        let tree = GraphBuilder::new(&prepared, &keys).build_company(&prepared.company.rows[0]);

        let address = tree.address.expect("company address");
        assert_eq!(address.address_1.as_deref(), Some("1 Main St"));
        assert!(address.make_default);
        assert!(!tree.company.for_profit);
    }

    #[test]
    fn products_are_gathered_in_sheet_order() {
        let keys = JoinKeys::default();
        let prepared = prepare_sheets(&acme_sheets(), &keys).expect("prepare");
        let tree = GraphBuilder::new(&prepared, &keys).build_company(&prepared.company.rows[0]);

        let names = tree.products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Basil", "Arugula"]);
        assert_eq!(tree.products[0].user, None);
    }

    #[test]
    fn unmatched_relations_are_left_empty_and_reported() {
        let keys = JoinKeys::default();
        let prepared = prepare_sheets(&acme_sheets(), &keys).expect("prepare");
        let builder = GraphBuilder::new(&prepared, &keys);

        let beta = builder.build_company(&prepared.company.rows[1]);
        assert!(beta.address.is_none());
        assert!(beta.facilities.is_empty());
        assert_eq!(beta.products.len(), 1);
        assert_eq!(
            unmatched_keys(&beta),
            vec![UnmatchedKey {
                relation: Relation::CompanyAddress,
                key: "Beta Greens".into(),
            }]
        );

        let acme = builder.build_company(&prepared.company.rows[0]);
        assert_eq!(
            unmatched_keys(&acme),
            vec![UnmatchedKey {
                relation: Relation::FacilityAddress,
                key: "Acme West".into(),
            }]
        );
    }

    #[test]
    fn missing_join_column_leaves_relation_empty() {
        let mut sheets = acme_sheets();
        sheets.product.headers[0] = "owner".into();
        let keys = JoinKeys::default();
        let prepared = prepare_sheets(&sheets, &keys).expect("prepare");
        let builder = GraphBuilder::new(&prepared, &keys);

        let tree = builder.build_company(&prepared.company.rows[0]);

        assert!(tree.products.is_empty());
        assert_eq!(
            builder.missing_join_columns(),
            vec![MissingJoinColumn {
                sheet: "product".into(),
                column: "company_trade_name".into(),
            }]
        );
    }
}
