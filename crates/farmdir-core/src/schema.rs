//! Table schema descriptions consumed by column intersection and type normalization.

use std::collections::BTreeSet;

use crate::record::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Bool(bool),
    Text(&'static str),
}

impl FieldDefault {
    pub fn to_value(self) -> Value {
        match self {
            FieldDefault::Bool(b) => Value::Bool(b),
            FieldDefault::Text(s) => Value::Text(s.to_string()),
        }
    }
}

/// One column of a target table: name, kind, nullability and insert default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub default: Option<FieldDefault>,
}

impl FieldSpec {
    pub const fn text(name: &'static str) -> Self {
        Self::of_kind(name, FieldKind::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::of_kind(name, FieldKind::Integer)
    }

    pub const fn float(name: &'static str) -> Self {
        Self::of_kind(name, FieldKind::Float)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::of_kind(name, FieldKind::Boolean)
    }

    const fn of_kind(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            default: None,
        }
    }

    pub const fn required(self) -> Self {
        Self {
            nullable: false,
            ..self
        }
    }

    pub const fn default_to(self, default: FieldDefault) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// Required fields with no default must be supplied by every source row.
    pub fn must_be_supplied(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.name.to_string()).collect()
    }

    pub fn supplied_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.must_be_supplied())
    }
}

pub const COMPANY: TableSchema = TableSchema {
    table: "company",
    fields: &[
        FieldSpec::text("trade_name").required(),
        FieldSpec::text("legal_name"),
        FieldSpec::text("website"),
        FieldSpec::integer("year_founded"),
        FieldSpec::text("country").required(),
        FieldSpec::integer("parent_id"),
        FieldSpec::text("statement"),
        FieldSpec::integer("total_employees"),
        FieldSpec::text("legal_form"),
        FieldSpec::boolean("for_profit").default_to(FieldDefault::Bool(true)),
        FieldSpec::text("ownership"),
        FieldSpec::text("business_focus").default_to(FieldDefault::Text("specialty crop grower")),
    ],
};

pub const ADDRESS: TableSchema = TableSchema {
    table: "address",
    fields: &[
        FieldSpec::text("address_1"),
        FieldSpec::text("address_2"),
        FieldSpec::text("suite"),
        FieldSpec::text("city"),
        FieldSpec::text("state"),
        FieldSpec::text("postal"),
        FieldSpec::text("country"),
        FieldSpec::float("latitude"),
        FieldSpec::float("longitude"),
        FieldSpec::boolean("make_default").default_to(FieldDefault::Bool(false)),
    ],
};

pub const PRODUCT: TableSchema = TableSchema {
    table: "product",
    fields: &[
        FieldSpec::text("name").required(),
        FieldSpec::text("category"),
        FieldSpec::text("user").default_to(FieldDefault::Text("consumer")),
        FieldSpec::text("description"),
        FieldSpec::text("key_words"),
        FieldSpec::text("distribution"),
    ],
};

pub const FACILITY: TableSchema = TableSchema {
    table: "facility",
    fields: &[
        FieldSpec::text("nickname"),
        FieldSpec::text("type"),
        FieldSpec::text("output"),
        FieldSpec::integer("year_opened"),
        FieldSpec::integer("employees"),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_fields_without_defaults_must_be_supplied() {
        let supplied = COMPANY.supplied_fields().map(|f| f.name).collect::<Vec<_>>();
        assert_eq!(supplied, vec!["trade_name", "country"]);
        assert_eq!(PRODUCT.supplied_fields().count(), 1);
        assert_eq!(FACILITY.supplied_fields().count(), 0);
    }

    #[test]
    fn defaults_are_declared_on_the_schema() {
        let for_profit = COMPANY.field("for_profit").expect("for_profit");
        assert_eq!(for_profit.kind, FieldKind::Boolean);
        assert_eq!(for_profit.default, Some(FieldDefault::Bool(true)));
        assert_eq!(
            PRODUCT.field("user").and_then(|f| f.default).map(FieldDefault::to_value),
            Some(Value::Text("consumer".into()))
        );
    }
}
