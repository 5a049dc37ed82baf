//! Error types for load runs: cell coercion, persistence and the fatal run error.

use serde::Serialize;
use thiserror::Error;

/// A cell that cannot be coerced into its column's declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeCoercionError {
    #[error("{sheet} line {line}: column {column} expects an integer, got {value:?}")]
    InvalidInteger {
        sheet: String,
        line: usize,
        column: String,
        value: String,
    },
    #[error("{sheet} line {line}: column {column} expects a number, got {value:?}")]
    InvalidFloat {
        sheet: String,
        line: usize,
        column: String,
        value: String,
    },
    #[error("{sheet} line {line}: required column {column} is blank")]
    MissingRequired {
        sheet: String,
        line: usize,
        column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Fatal errors; any of these aborts the whole load run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("reading sheets: {0:#}")]
    Source(anyhow::Error),
    #[error("sheet {sheet} is missing required column {column}")]
    SchemaMismatch { sheet: String, column: String },
    #[error(transparent)]
    TypeCoercion(#[from] TypeCoercionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    Configuration,
    Source,
    SchemaMismatch,
    TypeCoercion,
    Persistence,
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::Configuration(_) => LoadErrorKind::Configuration,
            LoadError::Source(_) => LoadErrorKind::Source,
            LoadError::SchemaMismatch { .. } => LoadErrorKind::SchemaMismatch,
            LoadError::TypeCoercion(_) => LoadErrorKind::TypeCoercion,
            LoadError::Persistence(_) => LoadErrorKind::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_in_snake_case() {
        let err = LoadError::from(TypeCoercionError::MissingRequired {
            sheet: "company".into(),
            line: 4,
            column: "country".into(),
        });
        assert_eq!(err.kind(), LoadErrorKind::TypeCoercion);
        assert_eq!(err.to_string(), "company line 4: required column country is blank");
        assert_eq!(
            serde_json::to_string(&LoadErrorKind::SchemaMismatch).expect("json"),
            "\"schema_mismatch\""
        );
    }

    #[test]
    fn persistence_error_keeps_the_store_message() {
        let err = LoadError::from(PersistenceError::new("duplicate key value"));
        assert_eq!(err.kind(), LoadErrorKind::Persistence);
        assert_eq!(err.to_string(), "duplicate key value");
    }
}
