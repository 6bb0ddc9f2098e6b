//! Sessions: the unit of work every query runs in
//!
//! Query builders compile to [`Statement`]s; a [`Session`] executes them and
//! decodes rows into attribute maps. [`PgSession`] is the PostgreSQL
//! implementation over one sqlx transaction. Dropping a `PgSession` without
//! committing rolls the transaction back.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::config::StoreConfig;
use crate::error::{CrudError, Result};
use crate::sql::Statement;
use crate::types::{ColumnDefinition, ColumnType, Values, parse_flag};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Executes compiled statements inside one unit of work
///
/// A session is used by one task at a time and is never shared.
#[async_trait]
pub trait Session: Send {
    /// Run a statement and decode every returned row by `statement.columns`
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Values>>;

    async fn fetch_optional(&mut self, statement: &Statement) -> Result<Option<Values>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// Run a statement returning a single integer, e.g. a count
    async fn fetch_scalar(&mut self, statement: &Statement) -> Result<i64>;

    /// Run a statement and return the number of affected rows
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;
}

/// PostgreSQL session over an open transaction
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    log_statements: bool,
}

impl PgSession {
    pub fn new(tx: Transaction<'static, Postgres>, log_statements: bool) -> Self {
        Self { tx, log_statements }
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(CrudError::from_database)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(CrudError::from_database)
    }

    fn log(&self, statement: &Statement) {
        if self.log_statements {
            tracing::debug!(
                sql = %statement.sql,
                params = statement.params.len(),
                "Executing statement"
            );
        }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Values>> {
        self.log(statement);
        let rows = build_query(statement)?
            .fetch_all(&mut *self.tx)
            .await
            .map_err(CrudError::from_database)?;

        rows.iter()
            .map(|row| row_to_values(row, &statement.columns))
            .collect()
    }

    async fn fetch_scalar(&mut self, statement: &Statement) -> Result<i64> {
        self.log(statement);
        let row = build_query(statement)?
            .fetch_one(&mut *self.tx)
            .await
            .map_err(CrudError::from_database)?;

        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.log(statement);
        let result = build_query(statement)?
            .execute(&mut *self.tx)
            .await
            .map_err(CrudError::from_database)?;

        Ok(result.rows_affected())
    }
}

/// Connection pool plus configuration; hands out sessions
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    config: StoreConfig,
}

impl Database {
    /// Connect a new pool from configuration
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| CrudError::Connection(format!("Database connection failed: {}", e)))?;

        Ok(Self { pool, config })
    }

    /// Use an existing pool
    pub fn from_pool(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Open a session over a new transaction
    pub async fn begin(&self) -> Result<PgSession> {
        let tx = self.pool.begin().await?;
        Ok(PgSession::new(tx, self.config.log_statements))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

fn build_query(statement: &Statement) -> Result<PgQuery<'_>> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_value(query, &param.column_type, &param.value)?;
    }
    Ok(query)
}

fn row_to_values(row: &PgRow, columns: &[ColumnDefinition]) -> Result<Values> {
    let mut values = Values::new();
    for column in columns {
        values.insert(column.name.clone(), extract_column_value(row, column)?);
    }
    Ok(values)
}

fn extract_column_value(row: &PgRow, col: &ColumnDefinition) -> Result<Value> {
    let name = col.name.as_str();
    let value = match &col.column_type {
        ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Enum { .. } => row
            .try_get::<Option<String>, _>(name)?
            .map(Value::String),
        ColumnType::Integer => row
            .try_get::<Option<i64>, _>(name)
            .or_else(|_| {
                row.try_get::<Option<i32>, _>(name)
                    .map(|v| v.map(i64::from))
            })?
            .map(Value::from),
        ColumnType::Decimal { .. } => {
            use rust_decimal::prelude::ToPrimitive;
            row.try_get::<Option<rust_decimal::Decimal>, _>(name)?
                .and_then(|d| d.to_f64())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        }
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
            .or_else(|_| {
                row.try_get::<Option<chrono::NaiveDateTime>, _>(name)
                    .map(|v| v.map(|naive| naive.and_utc()))
            })?
            .map(|v| Value::String(v.to_rfc3339())),
        ColumnType::Json => row.try_get::<Option<Value>, _>(name)?,
        ColumnType::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(name)?
            .map(|v| Value::String(v.to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn expected(column_type: &ColumnType, value: &Value) -> CrudError {
    CrudError::validation(format!(
        "Expected {} parameter, got {}",
        column_type.to_sql_type(),
        value
    ))
}

fn bind_value<'q>(
    query: PgQuery<'q>,
    column_type: &ColumnType,
    value: &'q Value,
) -> Result<PgQuery<'q>> {
    Ok(match column_type {
        ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Enum { .. } => {
            if value.is_null() {
                query.bind(None::<String>)
            } else {
                query.bind(value.as_str().ok_or_else(|| expected(column_type, value))?)
            }
        }
        ColumnType::Integer => {
            if value.is_null() {
                query.bind(None::<i64>)
            } else {
                let int_val = value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
                    .ok_or_else(|| expected(column_type, value))?;
                query.bind(int_val)
            }
        }
        ColumnType::Decimal { .. } => {
            if value.is_null() {
                query.bind(None::<rust_decimal::Decimal>)
            } else {
                let dec_val = match value {
                    Value::Number(n) => n
                        .as_i64()
                        .map(rust_decimal::Decimal::from)
                        .or_else(|| n.as_f64().and_then(rust_decimal::Decimal::from_f64_retain)),
                    Value::String(s) => s.parse::<rust_decimal::Decimal>().ok(),
                    _ => None,
                }
                .ok_or_else(|| expected(column_type, value))?;
                query.bind(dec_val)
            }
        }
        ColumnType::Boolean => {
            if value.is_null() {
                query.bind(None::<bool>)
            } else {
                let bool_val = value
                    .as_bool()
                    .or_else(|| value.as_str().and_then(parse_flag))
                    .ok_or_else(|| expected(column_type, value))?;
                query.bind(bool_val)
            }
        }
        ColumnType::Timestamp => {
            if value.is_null() {
                query.bind(None::<chrono::DateTime<chrono::Utc>>)
            } else {
                let timestamp_str = value.as_str().ok_or_else(|| expected(column_type, value))?;
                let timestamp = chrono::DateTime::parse_from_rfc3339(timestamp_str)
                    .map_err(|e| {
                        CrudError::validation(format!(
                            "Invalid timestamp '{}': {}",
                            timestamp_str, e
                        ))
                    })?
                    .with_timezone(&chrono::Utc);
                query.bind(timestamp)
            }
        }
        ColumnType::Uuid => {
            if value.is_null() {
                query.bind(None::<uuid::Uuid>)
            } else {
                let uuid_val = value
                    .as_str()
                    .and_then(|s| uuid::Uuid::parse_str(s).ok())
                    .ok_or_else(|| expected(column_type, value))?;
                query.bind(uuid_val)
            }
        }
        ColumnType::Json => query.bind(value),
    })
}
