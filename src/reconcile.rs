//! Reconciliation of a related collection against an incoming desired set
//!
//! Existing elements that match an incoming element are kept untouched.
//! Incoming elements without a match are created in one multi-row insert.
//! Existing elements that nothing matched are left out of the result; they
//! are not deleted.
//!
//! The result lists matched elements in existing order, then created ones
//! in incoming order. When several existing elements match, the first wins,
//! and an existing element appears at most once.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::entity::{Entity, ID_COLUMN, Relation, RelationKind};
use crate::error::{CrudError, Result};
use crate::retrieve::{insert_many, retrieve_batch};
use crate::session::Session;
use crate::types::{Id, Values};

type CreationFn = Box<dyn Fn(Values) -> Result<Values> + Send + Sync>;

/// How an existing element is compared with an incoming one
pub enum Equality<T> {
    /// Equal, non-null values of this attribute on both sides
    Attribute(String),
    Custom(Box<dyn Fn(&T, &Values) -> bool + Send + Sync>),
}

impl<T> Default for Equality<T> {
    fn default() -> Self {
        Equality::Attribute(ID_COLUMN.to_string())
    }
}

/// Reconciliation settings
pub struct Reconciliation<T> {
    equality: Equality<T>,
    exclude: HashSet<String>,
    extra: Values,
    creation_fn: Option<CreationFn>,
}

impl<T> Default for Reconciliation<T> {
    fn default() -> Self {
        Self {
            equality: Equality::default(),
            exclude: HashSet::new(),
            extra: Values::new(),
            creation_fn: None,
        }
    }
}

impl<T> Reconciliation<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare by an attribute other than `id`
    pub fn equal_by(mut self, attribute: impl Into<String>) -> Self {
        self.equality = Equality::Attribute(attribute.into());
        self
    }

    pub fn equal_with<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T, &Values) -> bool + Send + Sync + 'static,
    {
        self.equality = Equality::Custom(Box::new(predicate));
        self
    }

    /// Drop these incoming attributes before creation
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add a value to every created row, e.g. the owning parent's id
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Build created rows with a function instead of the incoming attributes
    pub fn create_with<F>(mut self, creation_fn: F) -> Self
    where
        F: Fn(Values) -> Result<Values> + Send + Sync + 'static,
    {
        self.creation_fn = Some(Box::new(creation_fn));
        self
    }

    fn stage(&self, incoming: &Values) -> Result<Values> {
        let mut values: Values = incoming
            .iter()
            .filter(|(name, _)| !self.exclude.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        for (name, value) in &self.extra {
            if values.contains_key(name) {
                return Err(CrudError::validation(format!(
                    "Attribute '{}' is given both by the incoming element and as an extra value",
                    name
                )));
            }
            values.insert(name.clone(), value.clone());
        }

        match &self.creation_fn {
            Some(creation_fn) => creation_fn(values),
            None => Ok(values),
        }
    }
}

/// Join-row settings for secondary reconciliation
#[derive(Debug, Clone)]
pub struct SecondaryRelation {
    /// Attribute of the join row that references the target entity
    pub target_key: String,
}

impl SecondaryRelation {
    pub fn new(target_key: impl Into<String>) -> Self {
        Self {
            target_key: target_key.into(),
        }
    }

    /// Take the target key from a many-to-many relation
    pub fn from_relation(relation: &Relation) -> Result<Self> {
        match &relation.kind {
            RelationKind::ManyToMany { target_key, .. } => Ok(Self::new(target_key.clone())),
            _ => Err(CrudError::configuration(format!(
                "Relation '{}' is not many-to-many",
                relation.name
            ))),
        }
    }
}

struct Partition {
    /// Indices into the existing list, ascending
    matched: Vec<usize>,
    staged: Vec<Values>,
}

fn serialize_all<I: Serialize>(incoming: &[I]) -> Result<Vec<Values>> {
    incoming
        .iter()
        .map(|item| match serde_json::to_value(item)? {
            Value::Object(map) => Ok(map),
            other => Err(CrudError::validation(format!(
                "Incoming element must serialize to an object, got {}",
                other
            ))),
        })
        .collect()
}

fn partition<T: Entity>(
    existing: &[T],
    incoming: &[Values],
    reconciliation: &Reconciliation<T>,
) -> Result<Partition> {
    let existing_values = match &reconciliation.equality {
        Equality::Attribute(_) => existing
            .iter()
            .map(T::to_values)
            .collect::<Result<Vec<_>>>()?,
        Equality::Custom(_) => Vec::new(),
    };

    let is_match = |index: usize, candidate: &Values| match &reconciliation.equality {
        Equality::Attribute(name) => match (existing_values[index].get(name), candidate.get(name)) {
            (Some(left), Some(right)) => !left.is_null() && left == right,
            _ => false,
        },
        Equality::Custom(predicate) => predicate(&existing[index], candidate),
    };

    let mut matched = HashSet::new();
    let mut staged = Vec::new();
    for candidate in incoming {
        match (0..existing.len()).find(|&index| is_match(index, candidate)) {
            Some(index) => {
                matched.insert(index);
            }
            None => staged.push(reconciliation.stage(candidate)?),
        }
    }

    let mut matched: Vec<usize> = matched.into_iter().collect();
    matched.sort_unstable();
    Ok(Partition { matched, staged })
}

fn take_matched<T>(existing: Vec<T>, matched: &[usize]) -> Vec<T> {
    existing
        .into_iter()
        .enumerate()
        .filter(|(index, _)| matched.binary_search(index).is_ok())
        .map(|(_, element)| element)
        .collect()
}

/// Reconcile a collection of `T` with incoming elements, creating `T` rows
pub async fn reconcile<T, I>(
    session: &mut dyn Session,
    existing: Vec<T>,
    incoming: &[I],
    reconciliation: &Reconciliation<T>,
) -> Result<Vec<T>>
where
    T: Entity,
    I: Serialize,
{
    let incoming = serialize_all(incoming)?;
    let Partition { matched, staged } = partition(&existing, &incoming, reconciliation)?;

    let created: Vec<T> = insert_many(session, &staged).await?;
    tracing::debug!(
        entity = %T::descriptor().name,
        matched = matched.len(),
        created = created.len(),
        "Collection reconciled"
    );

    let mut result = take_matched(existing, &matched);
    result.extend(created);
    Ok(result)
}

/// Reconcile a collection of `T` reached through join rows `J`
///
/// Unmatched incoming elements become `J` rows. After the insert, the `T`
/// entities they reference are loaded in one batch and appended in the
/// order the join rows were created.
pub async fn reconcile_secondary<T, J, I>(
    session: &mut dyn Session,
    existing: Vec<T>,
    incoming: &[I],
    relation: &SecondaryRelation,
    reconciliation: &Reconciliation<T>,
) -> Result<Vec<T>>
where
    T: Entity,
    J: Entity,
    I: Serialize,
{
    let incoming = serialize_all(incoming)?;
    let Partition { matched, staged } = partition(&existing, &incoming, reconciliation)?;

    let join_rows: Vec<J> = insert_many(session, &staged).await?;
    let target_ids = join_rows
        .iter()
        .map(|row| {
            let value = row.attribute(&relation.target_key)?;
            Id::from_json(&value).ok_or_else(|| {
                CrudError::validation(format!(
                    "Join row {} has no usable '{}'",
                    row.id(),
                    relation.target_key
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut created = Vec::with_capacity(target_ids.len());
    if !target_ids.is_empty() {
        let mut targets = retrieve_batch::<T>(session, &target_ids, ID_COLUMN).await?;
        for id in &target_ids {
            // a target referenced twice is returned once
            if let Some(target) = targets.remove(id) {
                created.push(target);
            }
        }
    }

    tracing::debug!(
        entity = %T::descriptor().name,
        through = %J::descriptor().name,
        matched = matched.len(),
        created = created.len(),
        "Secondary collection reconciled"
    );

    let mut result = take_matched(existing, &matched);
    result.extend(created);
    Ok(result)
}
