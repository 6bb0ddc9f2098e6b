//! Filter dispatch
//!
//! Two mutually exclusive modes, chosen per `Crud` by whether any filter
//! keys were registered:
//!
//! - **default**: every parameter must name an attribute of the entity and
//!   becomes an equality predicate;
//! - **registered**: only registered keys apply. A key-set is applied when
//!   all of its names are present; unknown parameters are ignored.

use std::sync::Arc;

use serde_json::Value;

use crate::entity::EntityDescriptor;
use crate::error::{CrudError, Result};
use crate::naming::to_snake;
use crate::registry::{IntoKey, KeyEntry, Registry, Resolver};
use crate::sql::{Condition, Select};
use crate::types::Values;

/// Filter callback: receives the select, the entity and exactly the
/// parameters of its key-set
pub type FilterFn = Arc<dyn Fn(Select, &EntityDescriptor, &Values) -> Result<Select> + Send + Sync>;

impl KeyEntry<FilterFn> {
    /// Register a filter callback under one name or a tuple of names
    pub fn filter<F>(key: impl IntoKey, callback: F) -> Self
    where
        F: Fn(Select, &EntityDescriptor, &Values) -> Result<Select> + Send + Sync + 'static,
    {
        KeyEntry::with_callback(key, Arc::new(callback) as FilterFn)
    }
}

/// Snake-case parameter names and drop nulls
pub fn normalize_params(raw: &Values) -> Values {
    raw.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (to_snake(name), value.clone()))
        .collect()
}

/// Apply filter parameters to a select
pub fn apply_filtering(
    select: Select,
    descriptor: &EntityDescriptor,
    registry: &Registry<FilterFn>,
    raw_params: &Values,
) -> Result<Select> {
    let params = normalize_params(raw_params);

    if registry.is_empty() {
        apply_default_filtering(select, descriptor, &params)
    } else {
        apply_user_defined_filtering(select, descriptor, registry, &params)
    }
}

fn apply_default_filtering(
    mut select: Select,
    descriptor: &EntityDescriptor,
    params: &Values,
) -> Result<Select> {
    for (name, value) in params {
        let column = descriptor.column_ref(name).ok_or_else(|| {
            CrudError::configuration(format!("Filtering field does not exist: {}", name))
        })?;
        select = select.filter(Condition::Eq(column, value.clone()));
    }
    Ok(select)
}

fn apply_user_defined_filtering(
    mut select: Select,
    descriptor: &EntityDescriptor,
    registry: &Registry<FilterFn>,
    params: &Values,
) -> Result<Select> {
    for (key, resolver) in registry.iter() {
        if !key.is_satisfied_by(|name| params.contains_key(name)) {
            continue;
        }

        match resolver {
            Resolver::Alias(attribute) => {
                let column = descriptor.require_column(attribute)?;
                let value = params.get(attribute).cloned().unwrap_or(Value::Null);
                select = select.filter(Condition::Eq(column, value));
            }
            Resolver::Callback(callback) => {
                let sub_params: Values = key
                    .names()
                    .iter()
                    .filter_map(|name| params.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();

                select = callback(select, descriptor, &sub_params).map_err(|e| {
                    tracing::error!(key = %key, error = %e, "Filter callback failed");
                    e
                })?;
            }
        }
    }

    Ok(select)
}
