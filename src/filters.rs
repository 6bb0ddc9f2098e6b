//! Reusable filter builders
//!
//! A builder is registered through [`Filter::activate`], which turns it into
//! a `(key, callback)` entry. Passing a builder directly converts it into an
//! entry that registration rejects with a hint to activate it.

use std::sync::Arc;

use serde_json::Value;

use crate::entity::EntityDescriptor;
use crate::error::{CrudError, Result};
use crate::filtering::FilterFn;
use crate::registry::KeyEntry;
use crate::sql::{Condition, Expr, OrderBy, OrderDirection, Param, Select};
use crate::types::{ColumnType, Values};

/// Longest string the Levenshtein distance supports
const LEVENSHTEIN_MAX_LENGTH: usize = 255;

/// A parameterised filter over one key
pub trait Filter: Send + Sync + 'static {
    /// Parameter name the filter is registered under
    fn key(&self) -> &str;

    fn apply(&self, select: Select, entity: &EntityDescriptor, params: &Values) -> Result<Select>;

    /// Turn the builder into a registration entry
    fn activate(self) -> KeyEntry<FilterFn>
    where
        Self: Sized,
    {
        let key = self.key().to_string();
        let filter = Arc::new(self);
        KeyEntry::with_callback(
            key,
            Arc::new(move |select: Select, entity: &EntityDescriptor, params: &Values| {
                filter.apply(select, entity, params)
            }) as FilterFn,
        )
    }
}

fn param<'a>(params: &'a Values, key: &str) -> Result<&'a Value> {
    params
        .get(key)
        .ok_or_else(|| CrudError::validation(format!("Missing filter parameter '{}'", key)))
}

fn string_param<'a>(params: &'a Values, key: &str) -> Result<&'a str> {
    param(params, key)?
        .as_str()
        .ok_or_else(|| CrudError::validation(format!("Parameter {} should be a string", key)))
}

/// Case-insensitive substring match on a text attribute
#[derive(Debug, Clone)]
pub struct IlikeFilter {
    field: String,
}

impl IlikeFilter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Filter for IlikeFilter {
    fn key(&self) -> &str {
        &self.field
    }

    fn apply(&self, select: Select, entity: &EntityDescriptor, params: &Values) -> Result<Select> {
        let column = entity.require_column(&self.field)?;
        let needle = string_param(params, &self.field)?.to_lowercase();
        Ok(select.filter(Condition::ILike(column, needle)))
    }
}

/// `IN` membership; the parameter must be a list
///
/// The parameter name defaults to the field name and can be changed with
/// [`alias`](Self::alias), e.g. `status_ids` for the `status_id` field.
#[derive(Debug, Clone)]
pub struct IncludeFilter {
    field: String,
    alias: Option<String>,
}

impl IncludeFilter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl Filter for IncludeFilter {
    fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }

    fn apply(&self, select: Select, entity: &EntityDescriptor, params: &Values) -> Result<Select> {
        let values = param(params, self.key())?.as_array().ok_or_else(|| {
            CrudError::validation(format!(
                "Parameter {} should be a list for IN comparison",
                self.key()
            ))
        })?;
        let column = entity.require_column(&self.field)?;
        for value in values {
            column.column_type.validate_value(value).map_err(|e| {
                CrudError::validation(format!("Parameter {}: {}", self.key(), e))
            })?;
        }
        Ok(select.filter(Condition::In(column, values.clone())))
    }
}

/// Orders rows by similarity of a short text attribute to the parameter
///
/// Deleting characters from the stored value is free, so a substring of the
/// value has distance zero. This adds an ORDER BY term rather than a
/// predicate; it becomes the primary ordering.
#[derive(Debug, Clone)]
pub struct LevenshteinFilter {
    field: String,
}

impl LevenshteinFilter {
    /// Fails unless `field` is a `Varchar` shorter than 256 characters
    pub fn new(field: impl Into<String>, entity: &EntityDescriptor) -> Result<Self> {
        let field = field.into();
        let column = entity.attribute(&field).ok_or_else(|| {
            CrudError::configuration(format!("{} has no attribute '{}'", entity.name, field))
        })?;

        match column.column_type {
            ColumnType::Varchar { length } if (length as usize) <= LEVENSHTEIN_MAX_LENGTH => {
                Ok(Self { field })
            }
            _ => Err(CrudError::configuration(format!(
                "Unable to use Levenshtein filter on '{}'. It works only with text fields shorter than 256 characters",
                field
            ))),
        }
    }
}

impl Filter for LevenshteinFilter {
    fn key(&self) -> &str {
        &self.field
    }

    fn apply(&self, select: Select, entity: &EntityDescriptor, params: &Values) -> Result<Select> {
        let value = string_param(params, &self.field)?;
        if value.chars().count() > LEVENSHTEIN_MAX_LENGTH {
            return Err(CrudError::validation(
                "Levenshtein filter can't work with strings longer than 255 characters",
            ));
        }

        let column = entity.require_column(&self.field)?;
        let distance = Expr::raw(
            format!("levenshtein(lower({}), ?, 1, 0, 1)", column.sql()),
            vec![Param::new(
                Value::String(value.to_lowercase()),
                ColumnType::String,
            )],
        );
        Ok(select.order_by(OrderBy::new(distance, OrderDirection::Ascending)))
    }
}

impl From<IlikeFilter> for KeyEntry<FilterFn> {
    fn from(_: IlikeFilter) -> Self {
        KeyEntry::Unactivated {
            builder: "IlikeFilter",
        }
    }
}

impl From<IncludeFilter> for KeyEntry<FilterFn> {
    fn from(_: IncludeFilter) -> Self {
        KeyEntry::Unactivated {
            builder: "IncludeFilter",
        }
    }
}

impl From<LevenshteinFilter> for KeyEntry<FilterFn> {
    fn from(_: LevenshteinFilter) -> Self {
        KeyEntry::Unactivated {
            builder: "LevenshteinFilter",
        }
    }
}
