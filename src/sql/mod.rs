//! SQL generation for entity queries
//!
//! Builders in this module are pure: they compile to a [`Statement`] that a
//! [`Session`](crate::session::Session) binds and executes.

pub mod condition;
pub mod sanitize;
pub mod select;
pub mod write;

use serde_json::Value;

use crate::types::{ColumnDefinition, ColumnType};

pub use condition::{Column, Condition, Expr, OrderBy, OrderDirection};
pub use sanitize::{POSTGRES_RESERVED_WORDS, qualify, quote_identifier, validate_identifier, validate_key};
pub use select::{LoadOption, Select};

/// A bound parameter and the column type that decides how it is bound
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub column_type: ColumnType,
}

impl Param {
    pub fn new(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type }
    }
}

/// Compiled SQL with its parameters and the columns each returned row carries
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    pub columns: Vec<ColumnDefinition>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
            columns: Vec::new(),
        }
    }

    /// Set the columns decoded from each returned row
    pub fn returning(mut self, columns: Vec<ColumnDefinition>) -> Self {
        self.columns = columns;
        self
    }
}
