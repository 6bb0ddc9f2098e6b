//! Sort dispatch
//!
//! With no registered sort keys any attribute of the entity can be sorted
//! on. Once keys are registered only those keys are accepted.

use std::sync::Arc;

use crate::entity::EntityDescriptor;
use crate::error::{CrudError, Result};
use crate::naming::to_snake;
use crate::registry::{KeyEntry, Registry, Resolver};
use crate::sql::{Expr, OrderBy, OrderDirection, Select};

/// Sort callback: builds the expression to order by
pub type SortFn = Arc<dyn Fn(&Select, &EntityDescriptor) -> Result<Expr> + Send + Sync>;

impl KeyEntry<SortFn> {
    pub fn sort<F>(name: &str, callback: F) -> Self
    where
        F: Fn(&Select, &EntityDescriptor) -> Result<Expr> + Send + Sync + 'static,
    {
        KeyEntry::with_callback(name, Arc::new(callback) as SortFn)
    }
}

/// Append exactly one ORDER BY term for `sort_name`
pub fn apply_sorting(
    select: Select,
    descriptor: &EntityDescriptor,
    registry: &Registry<SortFn>,
    sort_name: &str,
    descending: bool,
) -> Result<Select> {
    let sort_name = to_snake(sort_name);
    let direction = OrderDirection::from_descending(descending);

    if registry.is_empty() {
        let column = descriptor
            .column_ref(&sort_name)
            .ok_or_else(|| CrudError::configuration("Sorting field does not exist"))?;
        return Ok(select.order_by(OrderBy::new(column, direction)));
    }

    match registry.get(&sort_name) {
        None => Err(CrudError::configuration(
            "Specified sorting param does not exist",
        )),
        Some(Resolver::Alias(attribute)) => {
            let column = descriptor.require_column(attribute)?;
            Ok(select.order_by(OrderBy::new(column, direction)))
        }
        Some(Resolver::Callback(callback)) => {
            let expr = callback(&select, descriptor)
                .map_err(|e| CrudError::callback(sort_name.as_str(), e))?;
            Ok(select.order_by(OrderBy::new(expr, direction)))
        }
    }
}
