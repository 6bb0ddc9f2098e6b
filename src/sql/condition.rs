//! Condition and ordering expressions for SQL WHERE / ON / ORDER BY clauses
//!
//! Conditions are plain data until a statement is compiled. Rendering
//! appends the bound values to a shared parameter list and emits `$n`
//! placeholders numbered from the current length of that list, so fragments
//! can be rendered in any order into one statement.

use std::fmt;

use serde_json::Value;

use crate::sql::Param;
use crate::sql::sanitize::qualify;
use crate::types::ColumnType;

/// A typed, table-qualified column reference
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub table: String,
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(table: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            column_type,
        }
    }

    /// Render as `"table"."name"`
    pub fn sql(&self) -> String {
        qualify(&self.table, &self.name)
    }

    fn bind(&self, value: Value, params: &mut Vec<Param>) -> String {
        params.push(Param::new(value, self.column_type.clone()));
        format!("${}", params.len())
    }
}

/// Free-form SQL fragment with `?` markers for its bound values
///
/// Markers are substituted left to right with the fragment's own params
/// when rendered. Write `??` for a literal `?`, such as the JSONB key-exists
/// operator; a single `?` is always a marker.
///
/// # Example
/// ```
/// use entity_crud::sql::{Expr, Param};
/// use entity_crud::types::ColumnType;
///
/// let expr = Expr::raw(
///     "levenshtein(lower(\"tasks\".\"name\"), ?, 1, 0, 1)",
///     vec![Param::new("hello".into(), ColumnType::String)],
/// );
/// let mut params = Vec::new();
/// assert_eq!(
///     expr.render(&mut params),
///     "levenshtein(lower(\"tasks\".\"name\"), $1, 1, 0, 1)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    sql: String,
    params: Vec<Param>,
}

impl Expr {
    pub fn raw(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn column(column: &Column) -> Self {
        Self::raw(column.sql(), Vec::new())
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Render the fragment, moving its params into `params`
    pub fn render(&self, params: &mut Vec<Param>) -> String {
        let mut out = String::with_capacity(self.sql.len() + 4);
        let mut own = self.params.iter();

        let mut chars = self.sql.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '?' {
                if chars.next_if_eq(&'?').is_some() {
                    out.push('?');
                    continue;
                }
                if let Some(param) = own.next() {
                    params.push(param.clone());
                    out.push_str(&format!("${}", params.len()));
                    continue;
                }
            }
            out.push(ch);
        }

        out
    }
}

impl From<Column> for Expr {
    fn from(column: Column) -> Self {
        Expr::column(&column)
    }
}

/// A boolean predicate over entity columns
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `col = value`, or `col IS NULL` for a null value
    Eq(Column, Value),
    /// `col != value`, or `col IS NOT NULL` for a null value
    Ne(Column, Value),
    /// Membership in a list of values, cast to the column's type
    In(Column, Vec<Value>),
    /// Case-insensitive substring match
    ILike(Column, String),
    IsNull(Column),
    IsNotNull(Column),
    /// `left = right`, used for join conditions
    ColumnsEq(Column, Column),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Raw(Expr),
}

impl Condition {
    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Condition::Eq(column, value.into())
    }

    pub fn is_in(column: Column, values: Vec<Value>) -> Self {
        Condition::In(column, values)
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut items) => {
                items.push(other);
                Condition::And(items)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Render to SQL, appending bound values to `params`
    pub fn render(&self, params: &mut Vec<Param>) -> String {
        match self {
            Condition::Eq(col, value) if value.is_null() => format!("{} IS NULL", col.sql()),
            Condition::Eq(col, value) => {
                let placeholder = col.bind(value.clone(), params);
                format!("{} = {}", col.sql(), placeholder)
            }
            Condition::Ne(col, value) if value.is_null() => format!("{} IS NOT NULL", col.sql()),
            Condition::Ne(col, value) => {
                let placeholder = col.bind(value.clone(), params);
                format!("{} != {}", col.sql(), placeholder)
            }
            Condition::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Condition::In(col, values) if col.column_type == ColumnType::Json => {
                params.push(Param::new(Value::Array(values.clone()), ColumnType::Json));
                format!(
                    "{} = ANY(SELECT jsonb_array_elements(${}::jsonb))",
                    col.sql(),
                    params.len()
                )
            }
            Condition::In(col, values) => {
                // The list travels as one JSONB array of text and each element is cast back
                let text_values = values.iter().map(json_value_to_text).collect();
                params.push(Param::new(Value::Array(text_values), ColumnType::Json));
                format!(
                    "{} = ANY(SELECT jsonb_array_elements_text(${}::jsonb)::{})",
                    col.sql(),
                    params.len(),
                    col.column_type.cast_type()
                )
            }
            Condition::ILike(col, needle) => {
                params.push(Param::new(
                    Value::String(format!("%{}%", needle)),
                    ColumnType::String,
                ));
                format!("{}::text ILIKE ${}", col.sql(), params.len())
            }
            Condition::IsNull(col) => format!("{} IS NULL", col.sql()),
            Condition::IsNotNull(col) => format!("{} IS NOT NULL", col.sql()),
            Condition::ColumnsEq(left, right) => format!("{} = {}", left.sql(), right.sql()),
            Condition::And(items) => join_group(items, " AND ", "TRUE", params),
            Condition::Or(items) => join_group(items, " OR ", "FALSE", params),
            Condition::Not(inner) => format!("NOT ({})", inner.render(params)),
            Condition::Raw(expr) => expr.render(params),
        }
    }
}

fn join_group(items: &[Condition], sep: &str, empty: &str, params: &mut Vec<Param>) -> String {
    match items {
        [] => empty.to_string(),
        [single] => single.render(params),
        _ => items
            .iter()
            .map(|c| format!("({})", c.render(params)))
            .collect::<Vec<_>>()
            .join(sep),
    }
}

/// Text form of a JSON value, as accepted by a cast from text
fn json_value_to_text(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            Self::Descending
        } else {
            Self::Ascending
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn new(expr: impl Into<Expr>, direction: OrderDirection) -> Self {
        Self {
            expr: expr.into(),
            direction,
        }
    }

    pub fn render(&self, params: &mut Vec<Param>) -> String {
        format!("{} {}", self.expr.render(params), self.direction)
    }
}
