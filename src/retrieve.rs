//! Retrieval: single objects, pages, batches and related collections
//!
//! Every query here goes through [`Select`], so the soft-delete rule applies
//! unless the caller raised `include_deleted` for that query.

use std::collections::{HashMap, HashSet};

use crate::entity::{Entity, ID_COLUMN, RelationKind};
use crate::error::{CrudError, Result};
use crate::session::Session;
use crate::sql::{Condition, LoadOption, OrderBy, OrderDirection, Select, write};
use crate::types::{ColumnType, Id, Values};

/// Per-call execution switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Return soft-deleted rows too
    pub include_deleted: bool,
}

impl ExecutionOptions {
    pub fn with_deleted() -> Self {
        Self {
            include_deleted: true,
        }
    }
}

/// Pagination request
///
/// Pages are 1-based; page 0 is read as page 1. `rows_per_page` of `None`
/// or `Some(0)` returns every row from the offset on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub rows_per_page: Option<u64>,
    /// Also compute the total row count
    pub with_count: bool,
    /// Include soft-deleted rows for this page only
    pub with_deleted: bool,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            rows_per_page: None,
            with_count: true,
            with_deleted: false,
        }
    }
}

impl Page {
    pub fn new(page: u64, rows_per_page: Option<u64>) -> Self {
        Self {
            page,
            rows_per_page,
            ..Self::default()
        }
    }

    pub fn without_count(mut self) -> Self {
        self.with_count = false;
        self
    }

    pub fn with_deleted(mut self, with_deleted: bool) -> Self {
        self.with_deleted = with_deleted;
        self
    }

    /// Rows skipped before this page
    ///
    /// Fails with `Validation` when the offset does not fit a BIGINT.
    pub fn offset(&self) -> Result<u64> {
        (self.page.max(1) - 1)
            .checked_mul(self.rows_per_page.unwrap_or(0))
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| {
                CrudError::validation(format!(
                    "Page {} with {} rows per page is out of range",
                    self.page,
                    self.rows_per_page.unwrap_or(0)
                ))
            })
    }

    pub fn limit(&self) -> Option<u64> {
        self.rows_per_page.filter(|rows| *rows > 0)
    }
}

/// Load one object by id, or `None`
pub async fn find_object<E: Entity>(
    session: &mut dyn Session,
    id: &Id,
    options: ExecutionOptions,
    load_options: &[LoadOption],
) -> Result<Option<E>> {
    let descriptor = E::descriptor();
    let select = Select::new(descriptor)
        .options(load_options)?
        .filter(Condition::Eq(descriptor.id_column(), id.to_json()))
        .scope(options.include_deleted);

    match session.fetch_optional(&select.compile()).await? {
        Some(values) => Ok(Some(E::from_values(values)?)),
        None => Ok(None),
    }
}

/// Load one object by id and fail with `NotFound` if it does not exist
pub async fn retrieve_object<E: Entity>(
    session: &mut dyn Session,
    id: &Id,
    options: ExecutionOptions,
    load_options: &[LoadOption],
) -> Result<E> {
    find_object(session, id, options, load_options)
        .await?
        .ok_or_else(|| CrudError::not_found(&E::descriptor().name, vec![id.clone()]))
}

/// Execute a select with pagination
///
/// The count is taken over the filtered select before limit and offset.
/// Rows that repeat an id (from joins) are collapsed to the first one.
pub async fn paginate<E: Entity>(
    session: &mut dyn Session,
    page: &Page,
    select: Select,
) -> Result<(Vec<E>, Option<i64>)> {
    let offset = page.offset()?;
    let include_deleted = select.includes_deleted() || page.with_deleted;
    let mut select = select.scope(include_deleted);

    let count = if page.with_count {
        Some(session.fetch_scalar(&select.compile_count()).await?)
    } else {
        None
    };

    if let Some(limit) = page.limit() {
        select = select.limit(limit);
    }
    select = select.offset(offset);

    let rows = session.fetch_all(&select.compile()).await?;
    let mut seen = HashSet::with_capacity(rows.len());
    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(id) = row.get(ID_COLUMN).and_then(Id::from_json) {
            if !seen.insert(id) {
                continue;
            }
        }
        objects.push(E::from_values(row)?);
    }

    Ok((objects, count))
}

/// Compare requested ids against found ids
///
/// Fails with `NotFound` listing the symmetric difference.
pub fn check_missing_entities(
    entity_name: &str,
    requested: &HashSet<Id>,
    found: &HashSet<Id>,
) -> Result<()> {
    if requested == found {
        return Ok(());
    }

    let mut diff: Vec<Id> = requested.symmetric_difference(found).cloned().collect();
    diff.sort();
    tracing::warn!(
        entity = entity_name,
        missing = ?diff,
        "Batch retrieval mismatch"
    );
    Err(CrudError::not_found(entity_name, diff))
}

/// Load a set of objects keyed by `attribute` (usually `id`)
///
/// Every requested key must exist exactly; otherwise `NotFound` lists the
/// keys that differ.
pub async fn retrieve_batch<E: Entity>(
    session: &mut dyn Session,
    ids: &[Id],
    attribute: &str,
) -> Result<HashMap<Id, E>> {
    retrieve_batch_in(session, Select::new(E::descriptor()), ids, attribute).await
}

/// [`retrieve_batch`] over a caller-supplied base select
pub async fn retrieve_batch_in<E: Entity>(
    session: &mut dyn Session,
    select: Select,
    ids: &[Id],
    attribute: &str,
) -> Result<HashMap<Id, E>> {
    let descriptor = E::descriptor();
    let column = descriptor.require_column(attribute)?;
    let ids = ids
        .iter()
        .map(|id| normalize_key(&column.column_type, id))
        .collect::<Result<Vec<_>>>()?;
    let select = select.filter(Condition::In(
        column,
        ids.iter().map(Id::to_json).collect(),
    ));

    let rows = session.fetch_all(&select.compile()).await?;
    let mut objects = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = row.get(attribute).and_then(Id::from_json).ok_or_else(|| {
            CrudError::validation(format!(
                "Attribute '{}' of {} is not usable as a key",
                attribute, descriptor.name
            ))
        })?;
        objects.insert(key, E::from_values(row)?);
    }

    let requested: HashSet<Id> = ids.iter().cloned().collect();
    let found: HashSet<Id> = objects.keys().cloned().collect();
    check_missing_entities(&descriptor.name, &requested, &found)?;

    Ok(objects)
}

/// Bring a requested key into the shape rows decode to for this column type
fn normalize_key(column_type: &ColumnType, id: &Id) -> Result<Id> {
    let mismatch = || {
        CrudError::validation(format!(
            "Key '{}' is not a valid {}",
            id,
            column_type.to_sql_type()
        ))
    };
    match (column_type, id) {
        (ColumnType::Integer, Id::Str(text)) => {
            text.trim().parse::<i64>().map(Id::Int).map_err(|_| mismatch())
        }
        (ColumnType::Uuid, Id::Str(text)) => uuid::Uuid::parse_str(text)
            .map(|uuid| Id::Str(uuid.to_string()))
            .map_err(|_| mismatch()),
        (ColumnType::Uuid, Id::Int(_)) => Err(mismatch()),
        (
            ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Enum { .. },
            Id::Int(value),
        ) => Ok(Id::Str(value.to_string())),
        _ => Ok(id.clone()),
    }
}

/// Lazily load a relation of `entity`
///
/// The related query is soft-delete scoped like any other select.
pub async fn load_related<E: Entity, T: Entity>(
    session: &mut dyn Session,
    entity: &E,
    relation_name: &str,
) -> Result<Vec<T>> {
    let source = E::descriptor();
    let target = T::descriptor();
    let relation = source.relation(relation_name).ok_or_else(|| {
        CrudError::configuration(format!("{} has no relation '{}'", source.name, relation_name))
    })?;
    if relation.target().table_name != target.table_name {
        return Err(CrudError::configuration(format!(
            "Relation '{}' of {} targets {}, not {}",
            relation_name,
            source.name,
            relation.target().name,
            target.name
        )));
    }

    let select = match &relation.kind {
        RelationKind::BelongsTo { foreign_key } => {
            let reference = entity.attribute(foreign_key)?;
            if reference.is_null() {
                return Ok(Vec::new());
            }
            Select::new(target).filter(Condition::Eq(target.id_column(), reference))
        }
        RelationKind::HasMany { remote_key } => Select::new(target).filter(Condition::Eq(
            target.require_column(remote_key)?,
            entity.id().to_json(),
        )),
        RelationKind::ManyToMany {
            through,
            source_key,
            target_key,
        } => {
            let through = through();
            Select::new(target)
                .inner_join(
                    through,
                    Condition::ColumnsEq(through.require_column(target_key)?, target.id_column()),
                )
                .filter(Condition::Eq(
                    through.require_column(source_key)?,
                    entity.id().to_json(),
                ))
        }
    }
    .order_by(OrderBy::new(target.id_column(), OrderDirection::Ascending));

    let (objects, _) = paginate(session, &Page::default().without_count(), select).await?;
    Ok(objects)
}

/// Insert rows in one statement and decode what the database returned
pub async fn insert_many<E: Entity>(session: &mut dyn Session, rows: &[Values]) -> Result<Vec<E>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let statement = write::insert(E::descriptor(), rows)?;
    session
        .fetch_all(&statement)
        .await?
        .into_iter()
        .map(E::from_values)
        .collect()
}
