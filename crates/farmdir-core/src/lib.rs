//! Core directory model for farmdir: entity records, table schemas and relational rows.

pub mod record;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use record::{Record, Sheet, Value};
pub use schema::{FieldDefault, FieldKind, FieldSpec, TableSchema};

pub const CRATE_NAME: &str = "farmdir-core";

/// Construction of an entity from a normalized record.
///
/// Keys outside the entity's schema are ignored; schema fields absent from the
/// record take the schema default, or null when there is none.
pub trait FromRecord: Sized {
    fn schema() -> &'static TableSchema;
    fn from_record(record: &Record) -> Self;
}

struct FieldReader<'a> {
    record: &'a Record,
    schema: &'static TableSchema,
}

impl<'a> FieldReader<'a> {
    fn new<T: FromRecord>(record: &'a Record) -> Self {
        Self {
            record,
            schema: T::schema(),
        }
    }

    fn value(&self, name: &str) -> Option<Value> {
        match self.record.get(name) {
            Some(v) => Some(v.clone()),
            None => self
                .schema
                .field(name)
                .and_then(|f| f.default)
                .map(FieldDefault::to_value),
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn int(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    fn float(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    fn flag(&self, name: &str) -> bool {
        matches!(self.value(name), Some(Value::Bool(true)))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Company {
    pub trade_name: String,
    pub legal_name: Option<String>,
    pub website: Option<String>,
    pub year_founded: Option<i64>,
    pub country: String,
    /// Parent company id as given in the sheet; never resolved by the loader.
    pub parent_id: Option<i64>,
    pub statement: Option<String>,
    pub total_employees: Option<i64>,
    pub legal_form: Option<String>,
    pub for_profit: bool,
    pub ownership: Option<String>,
    pub business_focus: Option<String>,
}

impl FromRecord for Company {
    fn schema() -> &'static TableSchema {
        &schema::COMPANY
    }

    fn from_record(record: &Record) -> Self {
        let r = FieldReader::new::<Self>(record);
        Self {
            trade_name: r.text("trade_name").unwrap_or_default(),
            legal_name: r.text("legal_name"),
            website: r.text("website"),
            year_founded: r.int("year_founded"),
            country: r.text("country").unwrap_or_default(),
            parent_id: r.int("parent_id"),
            statement: r.text("statement"),
            total_employees: r.int("total_employees"),
            legal_form: r.text("legal_form"),
            for_profit: r.flag("for_profit"),
            ownership: r.text("ownership"),
            business_focus: r.text("business_focus"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub suite: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub make_default: bool,
}

impl FromRecord for Address {
    fn schema() -> &'static TableSchema {
        &schema::ADDRESS
    }

    fn from_record(record: &Record) -> Self {
        let r = FieldReader::new::<Self>(record);
        Self {
            address_1: r.text("address_1"),
            address_2: r.text("address_2"),
            suite: r.text("suite"),
            city: r.text("city"),
            state: r.text("state"),
            postal: r.text("postal"),
            country: r.text("country"),
            latitude: r.float("latitude"),
            longitude: r.float("longitude"),
            make_default: r.flag("make_default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub category: Option<String>,
    pub user: Option<String>,
    pub description: Option<String>,
    pub key_words: Option<String>,
    pub distribution: Option<String>,
}

impl FromRecord for Product {
    fn schema() -> &'static TableSchema {
        &schema::PRODUCT
    }

    fn from_record(record: &Record) -> Self {
        let r = FieldReader::new::<Self>(record);
        Self {
            name: r.text("name").unwrap_or_default(),
            category: r.text("category"),
            user: r.text("user"),
            description: r.text("description"),
            key_words: r.text("key_words"),
            distribution: r.text("distribution"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Facility {
    pub nickname: Option<String>,
    #[serde(rename = "type")]
    pub facility_type: Option<String>,
    pub output: Option<String>,
    pub year_opened: Option<i64>,
    pub employees: Option<i64>,
}

impl FromRecord for Facility {
    fn schema() -> &'static TableSchema {
        &schema::FACILITY
    }

    fn from_record(record: &Record) -> Self {
        let r = FieldReader::new::<Self>(record);
        Self {
            nickname: r.text("nickname"),
            facility_type: r.text("type"),
            output: r.text("output"),
            year_opened: r.int("year_opened"),
            employees: r.int("employees"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityTree {
    pub facility: Facility,
    pub address: Option<Address>,
}

/// A company with its owned relations, ready to be staged as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyTree {
    pub company: Company,
    pub address: Option<Address>,
    pub products: Vec<Product>,
    pub facilities: Vec<FacilityTree>,
}

impl CompanyTree {
    pub fn new(company: Company) -> Self {
        Self {
            company,
            address: None,
            products: Vec::new(),
            facilities: Vec::new(),
        }
    }

    pub fn address_count(&self) -> usize {
        usize::from(self.address.is_some())
            + self.facilities.iter().filter(|f| f.address.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRow {
    pub id: i64,
    #[serde(flatten)]
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRow {
    pub id: i64,
    pub address_id: Option<i64>,
    #[serde(flatten)]
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: i64,
    pub company_id: i64,
    #[serde(flatten)]
    pub product: Product,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityRow {
    pub id: i64,
    pub company_id: i64,
    pub address_id: Option<i64>,
    #[serde(flatten)]
    pub facility: Facility,
}

/// The four directory tables as rows with assigned ids and foreign keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoredTables {
    pub addresses: Vec<AddressRow>,
    pub companies: Vec<CompanyRow>,
    pub products: Vec<ProductRow>,
    pub facilities: Vec<FacilityRow>,
}

impl StoredTables {
    /// Appends a company tree, parents before children, ids continuing each table's sequence.
    pub fn insert_tree(&mut self, tree: &CompanyTree) -> i64 {
        let address_id = tree.address.as_ref().map(|a| self.push_address(a));
        let company_id = self.companies.len() as i64 + 1;
        self.companies.push(CompanyRow {
            id: company_id,
            address_id,
            company: tree.company.clone(),
        });

        for product in &tree.products {
            let id = self.products.len() as i64 + 1;
            self.products.push(ProductRow {
                id,
                company_id,
                product: product.clone(),
            });
        }

        for facility in &tree.facilities {
            let address_id = facility.address.as_ref().map(|a| self.push_address(a));
            let id = self.facilities.len() as i64 + 1;
            self.facilities.push(FacilityRow {
                id,
                company_id,
                address_id,
                facility: facility.facility.clone(),
            });
        }

        company_id
    }

    fn push_address(&mut self, address: &Address) -> i64 {
        let id = self.addresses.len() as i64 + 1;
        self.addresses.push(AddressRow {
            id,
            address: address.clone(),
        });
        id
    }

    pub fn company(&self, id: i64) -> Option<&CompanyRow> {
        self.companies.iter().find(|c| c.id == id)
    }

    pub fn address(&self, id: i64) -> Option<&AddressRow> {
        self.addresses.iter().find(|a| a.id == id)
    }

    pub fn products_of(&self, company_id: i64) -> impl Iterator<Item = &ProductRow> {
        self.products.iter().filter(move |p| p.company_id == company_id)
    }

    pub fn facilities_of(&self, company_id: i64) -> impl Iterator<Item = &FacilityRow> {
        self.facilities.iter().filter(move |f| f.company_id == company_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn absent_fields_take_schema_defaults() {
        let record: Record = [
            ("trade_name".to_string(), text("Acme Farms")),
            ("country".to_string(), text("US")),
        ]
        .into_iter()
        .collect();

        let company = Company::from_record(&record);

        assert!(company.for_profit);
        assert_eq!(company.business_focus.as_deref(), Some("specialty crop grower"));
        assert_eq!(company.year_founded, None);
    }

    #[test]
    fn present_null_overrides_default() {
        let record: Record = [
            ("name".to_string(), text("Basil")),
            ("user".to_string(), Value::Null),
            ("company_trade_name".to_string(), text("Acme Farms")),
        ]
        .into_iter()
        .collect();

        let product = Product::from_record(&record);

        assert_eq!(product.name, "Basil");
        assert_eq!(product.user, None);
    }

    #[test]
    fn inserting_trees_assigns_sequential_ids_and_foreign_keys() {
        let record: Record = [
            ("trade_name".to_string(), text("Acme Farms")),
            ("country".to_string(), text("US")),
        ]
        .into_iter()
        .collect();
        let hq = Address::from_record(&Record::new());
        let mut tree = CompanyTree::new(Company::from_record(&record));
        tree.address = Some(hq.clone());
        tree.facilities.push(FacilityTree {
            facility: Facility::from_record(&Record::new()),
            address: Some(hq),
        });
        tree.facilities.push(FacilityTree {
            facility: Facility::from_record(&Record::new()),
            address: None,
        });

        let mut tables = StoredTables::default();
        let first = tables.insert_tree(&tree);
        let second = tables.insert_tree(&tree);

        assert_eq!((first, second), (1, 2));
        assert_eq!(tree.address_count(), 2);
        assert_eq!(tables.addresses.len(), 4);
        assert_eq!(tables.companies[1].address_id, Some(3));
        assert_eq!(tables.facilities[2].address_id, Some(4));
        assert_eq!(tables.facilities[3].address_id, None);
        assert_eq!(tables.facilities_of(2).count(), 2);
    }
}
