//! # entity-crud
//!
//! A generic CRUD and query layer for typed PostgreSQL entities.
//!
//! Each entity type describes its table once with an [`EntityDescriptor`].
//! A [`Crud`] service built for that type then filters, sorts, paginates,
//! creates and updates rows on a caller-supplied [`Session`].
//!
//! ## Features
//!
//! - **Key Registry**: filter and sort keys are validated when the service is built
//! - **Filtering**: filter on any attribute, or only on registered keys and callbacks
//! - **Sorting**: one ORDER BY term per request, by attribute or callback expression
//! - **Pagination**: 1-based pages with an optional total count
//! - **Soft Delete**: flagged rows are excluded from every query unless a query opts in
//! - **Reconciliation**: sync a related collection with an incoming desired set
//! - **SQL Injection Prevention**: identifiers are quoted and validated, values are bound
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::LazyLock;
//!
//! use entity_crud::{
//!     ColumnDefinition, ColumnType, Crud, Database, Entity, EntityDescriptor, Id, ListQuery,
//!     StoreConfig, WriteOptions,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Task {
//!     id: i64,
//!     title: String,
//! }
//!
//! static TASKS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
//!     EntityDescriptor::new("Task", "tasks", ColumnType::Integer)
//!         .with_column(ColumnDefinition::new("title", ColumnType::String).not_null())
//! });
//!
//! impl Entity for Task {
//!     fn descriptor() -> &'static EntityDescriptor {
//!         &TASKS
//!     }
//!
//!     fn id(&self) -> Id {
//!         self.id.into()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect(StoreConfig::builder("postgres://localhost/mydb").build()).await?;
//!     let tasks = Crud::<Task>::new()?;
//!
//!     let mut session = db.begin().await?;
//!     tasks
//!         .create(&mut session, &serde_json::json!({"title": "Write docs"}), WriteOptions::new())
//!         .await?;
//!
//!     let (page, count) = tasks
//!         .get_multi(&mut session, &ListQuery::default().filter("title", "Write docs"))
//!         .await?;
//!     session.commit().await?;
//!
//!     println!("{} of {:?}", page.len(), count);
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! Every operation takes `&mut dyn Session`. [`PgSession`] wraps one sqlx
//! transaction; dropping it without [`PgSession::commit`] rolls back.

pub mod config;
pub mod crud;
pub mod entity;
pub mod error;
pub mod filtering;
pub mod filters;
pub mod naming;
pub mod reconcile;
pub mod registry;
pub mod retrieve;
pub mod session;
pub mod soft_delete;
pub mod sorting;
pub mod sql;
pub mod types;

// Re-export main types for convenience
pub use config::{StoreConfig, StoreConfigBuilder};
pub use crud::{Actor, CreatedBy, Crud, CrudBuilder, ListQuery, WriteContext, WriteHook, WriteOptions};
pub use entity::{Entity, EntityDescriptor, Relation, RelationKind};
pub use error::{CrudError, Result};
pub use filtering::FilterFn;
pub use filters::{Filter, IlikeFilter, IncludeFilter, LevenshteinFilter};
pub use reconcile::{Equality, Reconciliation, SecondaryRelation, reconcile, reconcile_secondary};
pub use registry::{Key, KeyEntry, Registry, RegistryKind, Resolver};
pub use retrieve::{ExecutionOptions, Page, load_related, paginate, retrieve_batch};
pub use session::{Database, PgSession, Session};
pub use soft_delete::SoftDelete;
pub use sorting::SortFn;
pub use types::{ColumnDefinition, ColumnType, Id, Values};

// Re-export SQL building blocks for callbacks
pub use sql::{Column, Condition, Expr, LoadOption, OrderBy, OrderDirection, Select, Statement};
