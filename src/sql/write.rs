//! INSERT and UPDATE statement builders

use crate::entity::EntityDescriptor;
use crate::error::{CrudError, Result};
use crate::sql::condition::Condition;
use crate::sql::sanitize::quote_identifier;
use crate::sql::{Param, Statement};
use crate::types::{ColumnDefinition, Id, Values};

/// Build one multi-row `INSERT ... RETURNING` statement
///
/// The column list is the union of every row's keys in declaration order.
/// A row that lacks one of those keys gets `DEFAULT` in that position.
pub fn insert(entity: &EntityDescriptor, rows: &[Values]) -> Result<Statement> {
    if rows.is_empty() {
        return Err(CrudError::configuration(format!(
            "Nothing to insert into {}",
            entity.name
        )));
    }

    for row in rows {
        if let Some(unknown) = row.keys().find(|k| !entity.has_attribute(k)) {
            return Err(CrudError::validation(format!(
                "Unknown attribute '{}' for {}",
                unknown, entity.name
            )));
        }
    }

    let all_columns = entity.all_columns();
    let mut columns: Vec<&ColumnDefinition> = all_columns
        .iter()
        .filter(|c| rows.iter().any(|row| row.contains_key(&c.name)))
        .collect();

    // Rows with no values at all still need one column to spell DEFAULT into
    if columns.is_empty() {
        columns.push(&entity.primary_key);
    }

    let mut params = Vec::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let slots = columns
            .iter()
            .map(|col| match row.get(&col.name) {
                Some(value) => {
                    params.push(Param::new(value.clone(), col.column_type.clone()));
                    format!("${}", params.len())
                }
                None => "DEFAULT".to_string(),
            })
            .collect::<Vec<_>>();
        tuples.push(format!("({})", slots.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {} RETURNING {}",
        quote_identifier(&entity.table_name),
        columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", "),
        tuples.join(", "),
        returning_list(&all_columns)
    );

    Ok(Statement::new(sql, params).returning(all_columns))
}

/// Build `UPDATE ... WHERE id = $1 RETURNING`
///
/// Updates ignore the soft-delete scope so that deleted rows can be restored.
pub fn update(entity: &EntityDescriptor, id: &Id, values: &Values) -> Result<Statement> {
    if values.is_empty() {
        return Err(CrudError::configuration(format!(
            "Nothing to update on {} {}",
            entity.name, id
        )));
    }

    let mut params = Vec::new();
    let where_clause = Condition::Eq(entity.id_column(), id.to_json()).render(&mut params);

    let mut assignments = Vec::with_capacity(values.len());
    for (name, value) in values {
        let column = entity.attribute(name).ok_or_else(|| {
            CrudError::validation(format!("Unknown attribute '{}' for {}", name, entity.name))
        })?;
        params.push(Param::new(value.clone(), column.column_type));
        assignments.push(format!("{} = ${}", quote_identifier(name), params.len()));
    }

    let all_columns = entity.all_columns();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        quote_identifier(&entity.table_name),
        assignments.join(", "),
        where_clause,
        returning_list(&all_columns)
    );

    Ok(Statement::new(sql, params).returning(all_columns))
}

fn returning_list(columns: &[ColumnDefinition]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}
