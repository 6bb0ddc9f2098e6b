//! Error types for CRUD operations

use thiserror::Error;

use crate::types::Id;

/// Errors that can occur while building or executing entity queries
#[derive(Debug, Error)]
pub enum CrudError {
    /// One or more requested rows do not exist
    #[error("{entity} not found: {}", format_ids(.ids))]
    NotFound { entity: String, ids: Vec<Id> },

    /// Programming or setup defect: bad key, unknown sort, missing attribute
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A user supplied sort or filter callback failed
    #[error("Callback for '{key}' failed: {source}")]
    Callback {
        key: String,
        #[source]
        source: Box<CrudError>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_ids(ids: &[Id]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl CrudError {
    pub fn not_found(entity: impl Into<String>, ids: Vec<Id>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            ids,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn callback(key: impl Into<String>, source: CrudError) -> Self {
        Self::Callback {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Map unique-constraint violations to `Conflict`, pass everything else through
    pub(crate) fn from_database(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return Self::Conflict(db_err.message().to_string());
            }
        }
        Self::Sql(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CrudError>;
