//! Entity descriptors and the attribute resolver
//!
//! Every entity type carries one static [`EntityDescriptor`] that maps
//! canonical attribute names to typed columns. Query builders, filters and
//! sorting resolve names through it; it is built once per type, usually in a
//! `LazyLock`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CrudError, Result};
use crate::sql::Column;
use crate::sql::sanitize::validate_identifier;
use crate::types::{ColumnDefinition, ColumnType, Id, Values};

/// Primary key column every entity has
pub const ID_COLUMN: &str = "id";

/// Soft-delete timestamp column of entities that opt in
pub const DELETED_AT_COLUMN: &str = "deleted_at";

const MANAGED_COLUMNS: &[&str] = &[ID_COLUMN, DELETED_AT_COLUMN];

/// A persisted type with a static descriptor
///
/// Entities travel through the crate as JSON attribute maps, so any serde
/// type whose field names match its column names works.
///
/// # Example
/// ```
/// use std::sync::LazyLock;
/// use entity_crud::{ColumnDefinition, ColumnType, Entity, EntityDescriptor, Id};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Status {
///     id: i64,
///     name: String,
/// }
///
/// static STATUS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
///     EntityDescriptor::new("Status", "statuses", ColumnType::Integer)
///         .with_column(ColumnDefinition::new("name", ColumnType::varchar(64)).not_null())
/// });
///
/// impl Entity for Status {
///     fn descriptor() -> &'static EntityDescriptor {
///         &STATUS
///     }
///
///     fn id(&self) -> Id {
///         self.id.into()
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor;

    fn id(&self) -> Id;

    fn to_values(&self) -> Result<Values> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CrudError::validation(format!(
                "{} must serialize to an object, got {}",
                Self::descriptor().name,
                other
            ))),
        }
    }

    fn from_values(values: Values) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(values))?)
    }

    /// Read one attribute by its column name
    fn attribute(&self, name: &str) -> Result<Value> {
        Ok(self.to_values()?.remove(name).unwrap_or(Value::Null))
    }
}

/// Shape of a relationship between two entities
#[derive(Debug, Clone)]
pub enum RelationKind {
    /// The source row holds `foreign_key` pointing at the target's id
    BelongsTo { foreign_key: String },
    /// Target rows hold `remote_key` pointing at the source's id
    HasMany { remote_key: String },
    /// A join entity links source ids (`source_key`) to target ids (`target_key`)
    ManyToMany {
        through: fn() -> &'static EntityDescriptor,
        source_key: String,
        target_key: String,
    },
}

/// A named relationship, usable as a join option or for lazy loading
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub target: fn() -> &'static EntityDescriptor,
    pub kind: RelationKind,
}

impl Relation {
    pub fn belongs_to<T: Entity>(name: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: T::descriptor,
            kind: RelationKind::BelongsTo {
                foreign_key: foreign_key.into(),
            },
        }
    }

    pub fn has_many<T: Entity>(name: impl Into<String>, remote_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: T::descriptor,
            kind: RelationKind::HasMany {
                remote_key: remote_key.into(),
            },
        }
    }

    /// Many-to-many through the join entity `J`
    pub fn many_to_many<T: Entity, J: Entity>(
        name: impl Into<String>,
        source_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: T::descriptor,
            kind: RelationKind::ManyToMany {
                through: J::descriptor,
                source_key: source_key.into(),
                target_key: target_key.into(),
            },
        }
    }

    pub fn target(&self) -> &'static EntityDescriptor {
        (self.target)()
    }
}

/// Static description of an entity table
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Entity name used in messages
    pub name: String,
    pub table_name: String,
    /// The `id` column
    pub primary_key: ColumnDefinition,
    /// User columns, in declaration order
    pub columns: Vec<ColumnDefinition>,
    /// Whether rows carry a `deleted_at` flag
    pub soft_delete: bool,
    relations: Vec<Relation>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table_name: impl Into<String>, id_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            primary_key: ColumnDefinition::new(ID_COLUMN, id_type)
                .not_null()
                .with_default(),
            columns: Vec::new(),
            soft_delete: false,
            relations: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Opt in to soft deletion through a nullable `deleted_at` timestamp
    pub fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Resolve an attribute name to its column definition
    pub fn attribute(&self, name: &str) -> Option<ColumnDefinition> {
        if name == ID_COLUMN {
            return Some(self.primary_key.clone());
        }
        if name == DELETED_AT_COLUMN {
            return self.deleted_at();
        }
        self.columns.iter().find(|c| c.name == name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Qualified column reference for an attribute
    pub fn column_ref(&self, name: &str) -> Option<Column> {
        self.attribute(name)
            .map(|def| Column::new(&self.table_name, def.name, def.column_type))
    }

    /// Like [`column_ref`](Self::column_ref) but fails with a configuration error
    pub fn require_column(&self, name: &str) -> Result<Column> {
        self.column_ref(name).ok_or_else(|| {
            CrudError::configuration(format!(
                "{} has no attribute '{}'",
                self.name, name
            ))
        })
    }

    pub fn id_column(&self) -> Column {
        Column::new(
            &self.table_name,
            ID_COLUMN,
            self.primary_key.column_type.clone(),
        )
    }

    pub fn deleted_at(&self) -> Option<ColumnDefinition> {
        self.soft_delete
            .then(|| ColumnDefinition::new(DELETED_AT_COLUMN, ColumnType::Timestamp))
    }

    pub fn deleted_at_column(&self) -> Option<Column> {
        self.soft_delete
            .then(|| Column::new(&self.table_name, DELETED_AT_COLUMN, ColumnType::Timestamp))
    }

    /// Every column a row carries: `id`, user columns, then `deleted_at`
    pub fn all_columns(&self) -> Vec<ColumnDefinition> {
        let mut columns = Vec::with_capacity(self.columns.len() + 2);
        columns.push(self.primary_key.clone());
        columns.extend(self.columns.iter().cloned());
        columns.extend(self.deleted_at());
        columns
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Check table, column and relation names
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table_name, &[]).map_err(CrudError::configuration)?;

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name, MANAGED_COLUMNS)
                .map_err(CrudError::configuration)?;
            if !seen.insert(column.name.as_str()) {
                return Err(CrudError::configuration(format!(
                    "Duplicate column '{}' on {}",
                    column.name, self.name
                )));
            }
        }

        for relation in &self.relations {
            let target = relation.target();
            match &relation.kind {
                RelationKind::BelongsTo { foreign_key } => {
                    self.require_column(foreign_key)?;
                }
                RelationKind::HasMany { remote_key } => {
                    target.require_column(remote_key)?;
                }
                RelationKind::ManyToMany {
                    through,
                    source_key,
                    target_key,
                } => {
                    let through = through();
                    through.require_column(source_key)?;
                    through.require_column(target_key)?;
                }
            }
        }

        Ok(())
    }

    /// Check a write payload: known attributes, types, nullability, and on
    /// create the presence of every required column
    pub fn validate_values(&self, values: &Values, is_create: bool) -> Result<()> {
        for (name, value) in values {
            let column = self.attribute(name).ok_or_else(|| {
                CrudError::validation(format!("Unknown attribute '{}' for {}", name, self.name))
            })?;
            column.check(value).map_err(CrudError::validation)?;
        }

        if is_create {
            for column in &self.columns {
                if !column.nullable && !column.has_default && !values.contains_key(&column.name) {
                    return Err(CrudError::validation(format!(
                        "Missing required attribute '{}' for {}",
                        column.name, self.name
                    )));
                }
            }
        }

        Ok(())
    }
}
