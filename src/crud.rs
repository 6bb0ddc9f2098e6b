//! Entity-scoped CRUD service
//!
//! A [`Crud`] owns the filter and sort registries of one entity type and
//! runs every operation on a caller-supplied [`Session`]. The actor of a
//! write is passed explicitly in [`WriteOptions`].

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::{DEFAULT_ROWS_PER_PAGE, StoreConfig};
use crate::entity::{DELETED_AT_COLUMN, Entity};
use crate::error::{CrudError, Result};
use crate::filtering::{FilterFn, apply_filtering};
use crate::registry::{KeyEntry, Registry, RegistryKind, register};
use crate::retrieve::{ExecutionOptions, Page, find_object, insert_many, paginate, retrieve_object};
use crate::session::Session;
use crate::soft_delete::SoftDelete;
use crate::sorting::{SortFn, apply_sorting};
use crate::sql::{LoadOption, Select, write};
use crate::types::{Id, Values};

// ============================================================================
// Write context and hooks
// ============================================================================

/// The user on whose behalf a write happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Id,
}

impl Actor {
    pub fn new(id: impl Into<Id>) -> Self {
        Self { id: id.into() }
    }
}

/// What a hook knows about the write in progress
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub is_create: bool,
    pub actor: Option<Actor>,
}

/// Adjusts extracted values before they are validated and written
#[async_trait]
pub trait WriteHook: Send + Sync {
    async fn after_values_extracted(
        &self,
        session: &mut dyn Session,
        values: Values,
        ctx: &WriteContext,
    ) -> Result<Values>;
}

/// Stamps the actor id into a field on create
#[derive(Debug, Clone)]
pub struct CreatedBy {
    field: String,
}

impl Default for CreatedBy {
    fn default() -> Self {
        Self::new("created_by")
    }
}

impl CreatedBy {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl WriteHook for CreatedBy {
    async fn after_values_extracted(
        &self,
        _session: &mut dyn Session,
        mut values: Values,
        ctx: &WriteContext,
    ) -> Result<Values> {
        if ctx.is_create {
            let actor = ctx.actor.as_ref().ok_or_else(|| {
                CrudError::validation(format!("An actor is required to fill '{}'", self.field))
            })?;
            values.insert(self.field.clone(), actor.id.to_json());
        }
        Ok(values)
    }
}

/// Options of a create or update
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Attributes of the data left out of the write
    pub exclude: HashSet<String>,
    /// Values written on top of the data, after hooks ran
    pub extra: Values,
    pub actor: Option<Actor>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }
}

// ============================================================================
// List query
// ============================================================================

/// Parameters of [`Crud::get_multi`]
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u64,
    /// `None` or `Some(0)` returns all rows
    pub per_page: Option<u64>,
    pub with_count: bool,
    pub with_deleted: bool,
    pub sort_by: String,
    pub descending: bool,
    pub execution_options: ExecutionOptions,
    /// Raw filter parameters; names may be camelCase
    pub filters: Values,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: Some(DEFAULT_ROWS_PER_PAGE),
            with_count: true,
            with_deleted: false,
            sort_by: "id".to_string(),
            descending: false,
            execution_options: ExecutionOptions::default(),
            filters: Values::new(),
        }
    }
}

impl ListQuery {
    /// Defaults with the configured page size
    pub fn for_config(config: &StoreConfig) -> Self {
        Self {
            per_page: Some(config.default_rows_per_page).filter(|rows| *rows > 0),
            ..Self::default()
        }
    }

    pub fn page(mut self, page: u64, per_page: Option<u64>) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    pub fn sort(mut self, sort_by: impl Into<String>, descending: bool) -> Self {
        self.sort_by = sort_by.into();
        self.descending = descending;
        self
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    pub fn without_count(mut self) -> Self {
        self.with_count = false;
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    fn to_page(&self) -> Page {
        Page {
            page: self.page,
            rows_per_page: self.per_page,
            with_count: self.with_count,
            with_deleted: self.with_deleted,
        }
    }
}

// ============================================================================
// Crud
// ============================================================================

/// CRUD operations for one entity type
pub struct Crud<E: Entity> {
    filtering: Registry<FilterFn>,
    sorting: Registry<SortFn>,
    get_options: Vec<LoadOption>,
    get_multi_options: Vec<LoadOption>,
    hooks: Vec<Arc<dyn WriteHook>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> fmt::Debug for Crud<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crud")
            .field("entity", &E::descriptor().name)
            .field("filtering", &self.filtering)
            .field("sorting", &self.sorting)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Builder for [`Crud`]
pub struct CrudBuilder<E: Entity> {
    filtering: Vec<KeyEntry<FilterFn>>,
    sorting: Vec<KeyEntry<SortFn>>,
    get_options: Vec<LoadOption>,
    get_multi_options: Vec<LoadOption>,
    hooks: Vec<Arc<dyn WriteHook>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for CrudBuilder<E> {
    fn default() -> Self {
        Self {
            filtering: Vec::new(),
            sorting: Vec::new(),
            get_options: Vec::new(),
            get_multi_options: Vec::new(),
            hooks: Vec::new(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> CrudBuilder<E> {
    /// Restrict filtering to these keys; tuples of names are allowed
    pub fn filtering_by(mut self, entries: Vec<KeyEntry<FilterFn>>) -> Self {
        self.filtering = entries;
        self
    }

    /// Restrict sorting to these keys
    pub fn sorting_by(mut self, entries: Vec<KeyEntry<SortFn>>) -> Self {
        self.sorting = entries;
        self
    }

    /// Load options applied by `get` and `retrieve`
    pub fn get_options(mut self, options: Vec<LoadOption>) -> Self {
        self.get_options = options;
        self
    }

    /// Load options applied by `get_multi`
    pub fn get_multi_options(mut self, options: Vec<LoadOption>) -> Self {
        self.get_multi_options = options;
        self
    }

    /// Add a write hook; hooks run in the order they were added
    pub fn hook(mut self, hook: Arc<dyn WriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Validate the descriptor and the registered keys
    pub fn build(self) -> Result<Crud<E>> {
        let descriptor = E::descriptor();
        descriptor.validate()?;

        let filtering = register(self.filtering, true, RegistryKind::Filtering)?;
        let sorting = register(self.sorting, false, RegistryKind::Sorting)?;
        for alias in filtering.aliases().chain(sorting.aliases()) {
            descriptor.require_column(alias)?;
        }

        Select::new(descriptor).options(&self.get_options)?;
        Select::new(descriptor).options(&self.get_multi_options)?;

        Ok(Crud {
            filtering,
            sorting,
            get_options: self.get_options,
            get_multi_options: self.get_multi_options,
            hooks: self.hooks,
            _entity: PhantomData,
        })
    }
}

fn application_error(what: &str, err: CrudError) -> CrudError {
    match err {
        CrudError::Configuration(msg) | CrudError::Validation(msg) => {
            CrudError::configuration(format!("Failed to apply {}: {}", what, msg))
        }
        other => other,
    }
}

impl<E: Entity> Crud<E> {
    pub fn builder() -> CrudBuilder<E> {
        CrudBuilder::default()
    }

    /// A service in default mode: filter and sort by any attribute
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn filtering(&self) -> &Registry<FilterFn> {
        &self.filtering
    }

    pub fn sorting(&self) -> &Registry<SortFn> {
        &self.sorting
    }

    pub async fn get(
        &self,
        session: &mut dyn Session,
        id: &Id,
        options: ExecutionOptions,
    ) -> Result<Option<E>> {
        find_object(session, id, options, &self.get_options).await
    }

    /// Like [`get`](Self::get), failing with `NotFound`
    pub async fn retrieve(
        &self,
        session: &mut dyn Session,
        id: &Id,
        options: ExecutionOptions,
    ) -> Result<E> {
        retrieve_object(session, id, options, &self.get_options).await
    }

    /// Filter, sort and paginate
    pub async fn get_multi(
        &self,
        session: &mut dyn Session,
        query: &ListQuery,
    ) -> Result<(Vec<E>, Option<i64>)> {
        let descriptor = E::descriptor();
        let select = Select::new(descriptor)
            .options(&self.get_multi_options)?
            .scope(query.execution_options.include_deleted);

        let select = apply_filtering(select, descriptor, &self.filtering, &query.filters)
            .map_err(|e| application_error("filter", e))?;
        let select = apply_sorting(
            select,
            descriptor,
            &self.sorting,
            &query.sort_by,
            query.descending,
        )
        .map_err(|e| application_error("sorting", e))?;

        paginate(session, &query.to_page(), select).await
    }

    pub async fn create<D: Serialize + Sync>(
        &self,
        session: &mut dyn Session,
        data: &D,
        options: WriteOptions,
    ) -> Result<E> {
        let ctx = WriteContext {
            is_create: true,
            actor: options.actor.clone(),
        };
        let values = self.prepare(session, data, &options, &ctx).await?;

        let mut created: Vec<E> = insert_many(session, std::slice::from_ref(&values)).await?;
        if created.is_empty() {
            return Err(CrudError::Sql(sqlx::Error::RowNotFound));
        }
        let created = created.swap_remove(0);
        tracing::debug!(entity = %E::descriptor().name, id = %created.id(), "Entity created");
        Ok(created)
    }

    /// Write the data's attributes onto `entity`
    ///
    /// Returns the row as stored. An update with nothing to write returns
    /// `entity` as given.
    pub async fn update<D: Serialize + Sync>(
        &self,
        session: &mut dyn Session,
        entity: E,
        data: &D,
        options: WriteOptions,
    ) -> Result<E> {
        let ctx = WriteContext {
            is_create: false,
            actor: options.actor.clone(),
        };
        let values = self.prepare(session, data, &options, &ctx).await?;
        if values.is_empty() {
            return Ok(entity);
        }

        self.write_back(session, &entity.id(), &values).await
    }

    /// Flag `entity` as deleted at `at` (or now) and persist the flag
    ///
    /// `entity` is only changed once the row has been written.
    pub async fn soft_delete(
        &self,
        session: &mut dyn Session,
        entity: &mut E,
        at: Option<DateTime<Utc>>,
    ) -> Result<()>
    where
        E: SoftDelete,
    {
        let at = at.unwrap_or_else(Utc::now);
        self.persist_deleted_at(session, entity, Some(at)).await
    }

    pub async fn restore(&self, session: &mut dyn Session, entity: &mut E) -> Result<()>
    where
        E: SoftDelete,
    {
        self.persist_deleted_at(session, entity, None).await
    }

    async fn persist_deleted_at(
        &self,
        session: &mut dyn Session,
        entity: &mut E,
        flag: Option<DateTime<Utc>>,
    ) -> Result<()>
    where
        E: SoftDelete,
    {
        let descriptor = E::descriptor();
        if descriptor.deleted_at().is_none() {
            return Err(CrudError::configuration(format!(
                "{} does not support soft deletion",
                descriptor.name
            )));
        }

        let mut values = Values::new();
        values.insert(
            DELETED_AT_COLUMN.to_string(),
            flag.map(|at| Value::String(at.to_rfc3339()))
                .unwrap_or(Value::Null),
        );

        *entity = self.write_back(session, &entity.id(), &values).await?;
        Ok(())
    }

    async fn write_back(&self, session: &mut dyn Session, id: &Id, values: &Values) -> Result<E> {
        let descriptor = E::descriptor();
        let statement = write::update(descriptor, id, values)?;
        match session.fetch_optional(&statement).await? {
            Some(row) => E::from_values(row),
            None => Err(CrudError::not_found(&descriptor.name, vec![id.clone()])),
        }
    }

    /// Extract, hook, merge extras and validate
    async fn prepare<D: Serialize + Sync>(
        &self,
        session: &mut dyn Session,
        data: &D,
        options: &WriteOptions,
        ctx: &WriteContext,
    ) -> Result<Values> {
        let descriptor = E::descriptor();
        let mut values = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            other => {
                return Err(CrudError::validation(format!(
                    "Data for {} must serialize to an object, got {}",
                    descriptor.name, other
                )));
            }
        };
        values.retain(|name, _| !options.exclude.contains(name));

        for hook in &self.hooks {
            values = hook.after_values_extracted(session, values, ctx).await?;
        }

        for (name, value) in &options.extra {
            if values.contains_key(name) {
                return Err(CrudError::validation(format!(
                    "Attribute '{}' is given both in the data and as an extra value",
                    name
                )));
            }
            values.insert(name.clone(), value.clone());
        }

        descriptor.validate_values(&values, ctx.is_create)?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // ListQuery Tests
    // =========================================================================

    #[test]
    fn test_list_query_defaults() {
        let query = ListQuery::default();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, Some(25));
        assert!(query.with_count);
        assert!(!query.with_deleted);
        assert_eq!(query.sort_by, "id");
        assert!(!query.descending);
        assert!(query.filters.is_empty());
    }

    #[test]
    fn test_list_query_for_config() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .default_rows_per_page(50)
            .build();
        assert_eq!(ListQuery::for_config(&config).per_page, Some(50));

        let config = StoreConfig::builder("postgres://localhost/test")
            .default_rows_per_page(0)
            .build();
        assert_eq!(ListQuery::for_config(&config).per_page, None);
    }

    #[test]
    fn test_list_query_to_page() {
        let page = ListQuery::default()
            .page(3, Some(10))
            .without_count()
            .with_deleted()
            .to_page();
        assert_eq!(page.offset().unwrap(), 20);
        assert!(!page.with_count);
        assert!(page.with_deleted);
    }

    // =========================================================================
    // Error Mapping Tests
    // =========================================================================

    #[test]
    fn test_application_error_wraps_configuration() {
        let err = application_error("sorting", CrudError::configuration("Sorting field does not exist"));
        assert_eq!(
            err.to_string(),
            "Configuration error: Failed to apply sorting: Sorting field does not exist"
        );
    }

    #[test]
    fn test_application_error_wraps_validation() {
        let err = application_error("filter", CrudError::validation("Parameter tags should be a list"));
        assert!(matches!(err, CrudError::Configuration(ref msg) if msg.starts_with("Failed to apply filter")));
    }

    #[test]
    fn test_application_error_keeps_callback() {
        let err = application_error(
            "sorting",
            CrudError::callback("rating", CrudError::validation("boom")),
        );
        assert!(matches!(err, CrudError::Callback { .. }));
    }

    // =========================================================================
    // Write Options Tests
    // =========================================================================

    #[test]
    fn test_write_options_builder() {
        let options = WriteOptions::new()
            .exclude(["password"])
            .extra("status_id", 3)
            .actor(Actor::new(7));
        assert!(options.exclude.contains("password"));
        assert_eq!(options.extra.get("status_id"), Some(&Value::from(3)));
        assert_eq!(options.actor, Some(Actor::new(7)));
    }
}
