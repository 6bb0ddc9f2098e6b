//! SELECT statement builder
//!
//! A [`Select`] always selects the root entity's columns. Joins make related
//! tables available to filter and sort expressions. The soft-delete rule is
//! applied at compile time: unless the query was scoped with
//! `scope(true)`, rows whose `deleted_at` is set are excluded from the root
//! and from every joined soft-delete entity.

use crate::entity::{EntityDescriptor, Relation, RelationKind};
use crate::error::{CrudError, Result};
use crate::sql::condition::{Condition, OrderBy};
use crate::sql::sanitize::quote_identifier;
use crate::sql::{Param, Statement};

/// Per-query load option passed through from `Crud` configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOption {
    /// LEFT OUTER JOIN the named relation
    Join(String),
}

impl LoadOption {
    pub fn joined(relation: impl Into<String>) -> Self {
        LoadOption::Join(relation.into())
    }
}

#[derive(Debug, Clone)]
struct Join {
    entity: &'static EntityDescriptor,
    on: Condition,
    inner: bool,
}

/// Query over one root entity
#[derive(Debug, Clone)]
pub struct Select {
    entity: &'static EntityDescriptor,
    conditions: Vec<Condition>,
    joins: Vec<Join>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    include_deleted: bool,
}

impl Select {
    pub fn new(entity: &'static EntityDescriptor) -> Self {
        Self {
            entity,
            conditions: Vec::new(),
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            include_deleted: false,
        }
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Include soft-deleted rows for this query only
    pub fn scope(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Whether a table is already joined into this query
    pub fn is_joined(&self, table_name: &str) -> bool {
        self.joins.iter().any(|j| j.entity.table_name == table_name)
    }

    /// INNER JOIN an entity on an explicit condition
    pub fn inner_join(mut self, entity: &'static EntityDescriptor, on: Condition) -> Self {
        if !self.is_joined(&entity.table_name) {
            self.joins.push(Join {
                entity,
                on,
                inner: true,
            });
        }
        self
    }

    fn outer_join(&mut self, entity: &'static EntityDescriptor, on: Condition) {
        if !self.is_joined(&entity.table_name) {
            self.joins.push(Join {
                entity,
                on,
                inner: false,
            });
        }
    }

    /// LEFT OUTER JOIN a relation of the root entity
    pub fn join_relation(mut self, relation: &Relation) -> Result<Self> {
        let root = self.entity;
        let target = relation.target();

        match &relation.kind {
            RelationKind::BelongsTo { foreign_key } => {
                let on = Condition::ColumnsEq(target.id_column(), root.require_column(foreign_key)?);
                self.outer_join(target, on);
            }
            RelationKind::HasMany { remote_key } => {
                let on = Condition::ColumnsEq(target.require_column(remote_key)?, root.id_column());
                self.outer_join(target, on);
            }
            RelationKind::ManyToMany {
                through,
                source_key,
                target_key,
            } => {
                let through = through();
                let on = Condition::ColumnsEq(through.require_column(source_key)?, root.id_column());
                self.outer_join(through, on);
                let on = Condition::ColumnsEq(target.id_column(), through.require_column(target_key)?);
                self.outer_join(target, on);
            }
        }

        Ok(self)
    }

    /// Apply load options, resolving relation names on the root entity
    pub fn options(mut self, options: &[LoadOption]) -> Result<Self> {
        for option in options {
            match option {
                LoadOption::Join(name) => {
                    let relation = self.entity.relation(name).ok_or_else(|| {
                        CrudError::configuration(format!(
                            "{} has no relation '{}'",
                            self.entity.name, name
                        ))
                    })?;
                    self = self.join_relation(relation)?;
                }
            }
        }
        Ok(self)
    }

    /// Compile to a SELECT returning the root entity's columns
    ///
    /// A paged query with joins pages over distinct root ids rather than
    /// joined rows.
    pub fn compile(&self) -> Statement {
        let columns = self.entity.all_columns();
        let select_list = columns
            .iter()
            .map(|c| crate::sql::qualify(&self.entity.table_name, &c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let paged = self.limit.is_some() || self.offset.is_some_and(|offset| offset > 0);
        if paged && !self.joins.is_empty() {
            return self.compile_paged(&select_list).returning(columns);
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT {} {}", select_list, self.from_where(&mut params));
        if let Some(order) = self.render_order(&mut params) {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        self.push_window(&mut sql);

        Statement::new(sql, params).returning(columns)
    }

    /// Limit and offset apply to root ids, not to joined rows
    ///
    /// Each root id is ranked by the position of its first joined row in the
    /// requested order, then the page of ids is joined back to the root table.
    fn compile_paged(&self, select_list: &str) -> Statement {
        let mut params = Vec::new();
        let from_where = self.from_where(&mut params);
        let window = self
            .render_order(&mut params)
            .map(|order| format!("ORDER BY {}", order))
            .unwrap_or_default();

        let mut ids = format!(
            "SELECT \"ranked_rows\".\"id\", MIN(\"ranked_rows\".\"position\") AS \"position\" \
             FROM (SELECT {} AS \"id\", ROW_NUMBER() OVER ({}) AS \"position\" {}) AS \"ranked_rows\" \
             GROUP BY \"ranked_rows\".\"id\" ORDER BY \"position\"",
            self.entity.id_column().sql(),
            window,
            from_where
        );
        self.push_window(&mut ids);

        let sql = format!(
            "SELECT {} FROM {} INNER JOIN ({}) AS \"paged_ids\" ON \"paged_ids\".\"id\" = {} \
             ORDER BY \"paged_ids\".\"position\"",
            select_list,
            quote_identifier(&self.entity.table_name),
            ids,
            self.entity.id_column().sql()
        );
        Statement::new(sql, params)
    }

    fn render_order(&self, params: &mut Vec<Param>) -> Option<String> {
        if self.order_by.is_empty() {
            return None;
        }
        let terms = self
            .order_by
            .iter()
            .map(|o| o.render(params))
            .collect::<Vec<_>>()
            .join(", ");
        Some(terms)
    }

    fn push_window(&self, sql: &mut String) {
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    /// Compile `SELECT COUNT(*)` over this query, ignoring order, limit and offset
    ///
    /// Joined rows are collapsed to distinct root ids so the count matches the
    /// de-duplicated page.
    pub fn compile_count(&self) -> Statement {
        let mut params = Vec::new();
        let distinct = if self.joins.is_empty() { "" } else { "DISTINCT " };
        let inner = format!(
            "SELECT {}{} {}",
            distinct,
            self.entity.id_column().sql(),
            self.from_where(&mut params)
        );
        Statement::new(
            format!("SELECT COUNT(*) FROM ({}) AS \"counted\"", inner),
            params,
        )
    }

    fn from_where(&self, params: &mut Vec<Param>) -> String {
        let mut sql = format!("FROM {}", quote_identifier(&self.entity.table_name));

        for join in &self.joins {
            let mut on = join.on.render(params);
            if let Some(deleted_at) = self.deleted_filter(join.entity) {
                on = format!("{} AND {}", on, deleted_at.render(params));
            }
            let kind = if join.inner { "INNER JOIN" } else { "LEFT OUTER JOIN" };
            sql.push_str(&format!(
                " {} {} ON {}",
                kind,
                quote_identifier(&join.entity.table_name),
                on
            ));
        }

        let mut conditions = Vec::with_capacity(self.conditions.len() + 1);
        if let Some(deleted_at) = self.deleted_filter(self.entity) {
            conditions.push(deleted_at);
        }
        conditions.extend(self.conditions.iter().cloned());

        if !conditions.is_empty() {
            let clause = conditions
                .iter()
                .map(|c| c.render(params))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", clause));
        }

        sql
    }

    fn deleted_filter(&self, entity: &EntityDescriptor) -> Option<Condition> {
        if self.include_deleted {
            return None;
        }
        entity.deleted_at_column().map(Condition::IsNull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::sql::condition::{Expr, OrderDirection};
    use crate::types::{ColumnDefinition, ColumnType, Id};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::LazyLock;

    #[derive(Serialize, Deserialize)]
    struct Tag {
        id: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct TaskTag {
        id: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct Task {
        id: i64,
    }

    static TAGS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::new("Tag", "tags", ColumnType::Integer)
            .with_column(ColumnDefinition::new("label", ColumnType::String))
            .with_soft_delete()
    });

    static TASK_TAGS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::new("TaskTag", "task_tags", ColumnType::Integer)
            .with_column(ColumnDefinition::new("task_id", ColumnType::Integer))
            .with_column(ColumnDefinition::new("tag_id", ColumnType::Integer))
    });

    static TASKS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::new("Task", "tasks", ColumnType::Integer)
            .with_column(ColumnDefinition::new("name", ColumnType::String))
            .with_column(ColumnDefinition::new("tag_id", ColumnType::Integer))
            .with_soft_delete()
            .with_relation(Relation::belongs_to::<Tag>("main_tag", "tag_id"))
            .with_relation(Relation::many_to_many::<Tag, TaskTag>("tags", "task_id", "tag_id"))
    });

    impl Entity for Tag {
        fn descriptor() -> &'static EntityDescriptor {
            &TAGS
        }
        fn id(&self) -> Id {
            self.id.into()
        }
    }

    impl Entity for TaskTag {
        fn descriptor() -> &'static EntityDescriptor {
            &TASK_TAGS
        }
        fn id(&self) -> Id {
            self.id.into()
        }
    }

    impl Entity for Task {
        fn descriptor() -> &'static EntityDescriptor {
            &TASKS
        }
        fn id(&self) -> Id {
            self.id.into()
        }
    }

    const TASK_COLUMNS: &str =
        "\"tasks\".\"id\", \"tasks\".\"name\", \"tasks\".\"tag_id\", \"tasks\".\"deleted_at\"";

    // =========================================================================
    // Soft-Delete Scope Tests
    // =========================================================================

    #[test]
    fn test_default_scope_excludes_deleted() {
        let stmt = Select::new(&TASKS).compile();
        assert_eq!(
            stmt.sql,
            format!(
                "SELECT {} FROM \"tasks\" WHERE \"tasks\".\"deleted_at\" IS NULL",
                TASK_COLUMNS
            )
        );
        assert_eq!(stmt.columns.len(), 4);
    }

    #[test]
    fn test_scope_includes_deleted() {
        let stmt = Select::new(&TASKS).scope(true).compile();
        assert_eq!(stmt.sql, format!("SELECT {} FROM \"tasks\"", TASK_COLUMNS));
    }

    #[test]
    fn test_entity_without_soft_delete_has_no_rule() {
        let stmt = Select::new(&TASK_TAGS).compile();
        assert!(!stmt.sql.contains("deleted_at"));
        assert!(!stmt.sql.contains("WHERE"));
    }

    #[test]
    fn test_joined_soft_delete_entity_gets_on_criterion() {
        let stmt = Select::new(&TASKS)
            .options(&[LoadOption::joined("main_tag")])
            .unwrap()
            .compile();
        assert!(stmt.sql.contains(
            "LEFT OUTER JOIN \"tags\" ON \"tags\".\"id\" = \"tasks\".\"tag_id\" AND \"tags\".\"deleted_at\" IS NULL"
        ));

        let stmt = Select::new(&TASKS)
            .scope(true)
            .options(&[LoadOption::joined("main_tag")])
            .unwrap()
            .compile();
        assert!(!stmt.sql.contains("deleted_at\" IS NULL"));
    }

    // =========================================================================
    // Join Tests
    // =========================================================================

    #[test]
    fn test_many_to_many_joins_through_table() {
        let stmt = Select::new(&TASKS)
            .options(&[LoadOption::joined("tags")])
            .unwrap()
            .compile();
        assert!(stmt.sql.contains(
            "LEFT OUTER JOIN \"task_tags\" ON \"task_tags\".\"task_id\" = \"tasks\".\"id\""
        ));
        assert!(stmt.sql.contains(
            "LEFT OUTER JOIN \"tags\" ON \"tags\".\"id\" = \"task_tags\".\"tag_id\" AND \"tags\".\"deleted_at\" IS NULL"
        ));
    }

    #[test]
    fn test_join_is_added_once() {
        let select = Select::new(&TASKS)
            .options(&[LoadOption::joined("main_tag"), LoadOption::joined("main_tag")])
            .unwrap();
        assert_eq!(select.compile().sql.matches("JOIN").count(), 1);
    }

    #[test]
    fn test_unknown_relation_option() {
        let err = Select::new(&TASKS)
            .options(&[LoadOption::joined("owner")])
            .unwrap_err();
        assert!(err.to_string().contains("Task has no relation 'owner'"));
    }

    #[test]
    fn test_inner_join_explicit_condition() {
        let on = Condition::ColumnsEq(
            TASK_TAGS.require_column("task_id").unwrap(),
            TASKS.id_column(),
        );
        let stmt = Select::new(&TASKS).inner_join(&TASK_TAGS, on).compile();
        assert!(stmt.sql.contains(
            "INNER JOIN \"task_tags\" ON \"task_tags\".\"task_id\" = \"tasks\".\"id\""
        ));
    }

    // =========================================================================
    // Filter / Order / Page Tests
    // =========================================================================

    #[test]
    fn test_filters_follow_soft_delete_rule() {
        let stmt = Select::new(&TASKS)
            .filter(Condition::eq(TASKS.require_column("name").unwrap(), "a"))
            .compile();
        assert!(stmt.sql.ends_with(
            "WHERE \"tasks\".\"deleted_at\" IS NULL AND \"tasks\".\"name\" = $1"
        ));
        assert_eq!(stmt.params[0].value, json!("a"));
    }

    #[test]
    fn test_limit_offset_and_order() {
        let stmt = Select::new(&TASKS)
            .order_by(OrderBy::new(TASKS.id_column(), OrderDirection::Descending))
            .limit(10)
            .offset(10)
            .compile();
        assert!(stmt.sql.ends_with("ORDER BY \"tasks\".\"id\" DESC LIMIT 10 OFFSET 10"));
    }

    #[test]
    fn test_order_params_numbered_after_filters() {
        let stmt = Select::new(&TASKS)
            .filter(Condition::eq(TASKS.require_column("name").unwrap(), "a"))
            .order_by(OrderBy::new(
                Expr::raw(
                    "length(?)",
                    vec![Param::new(json!("x"), ColumnType::String)],
                ),
                OrderDirection::Ascending,
            ))
            .compile();
        assert!(stmt.sql.contains("ORDER BY length($2) ASC"));
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_paged_join_pages_over_root_ids() {
        let stmt = Select::new(&TASKS)
            .options(&[LoadOption::joined("tags")])
            .unwrap()
            .order_by(OrderBy::new(TASKS.id_column(), OrderDirection::Descending))
            .limit(2)
            .offset(2)
            .compile();
        assert!(stmt.sql.starts_with(&format!(
            "SELECT {} FROM \"tasks\" INNER JOIN (SELECT \"ranked_rows\".\"id\"",
            TASK_COLUMNS
        )));
        assert!(stmt.sql.contains(
            "ROW_NUMBER() OVER (ORDER BY \"tasks\".\"id\" DESC) AS \"position\" FROM \"tasks\" LEFT OUTER JOIN"
        ));
        assert!(stmt.sql.contains(
            "GROUP BY \"ranked_rows\".\"id\" ORDER BY \"position\" LIMIT 2 OFFSET 2) AS \"paged_ids\""
        ));
        assert!(stmt.sql.ends_with(
            "ON \"paged_ids\".\"id\" = \"tasks\".\"id\" ORDER BY \"paged_ids\".\"position\""
        ));
        assert_eq!(stmt.columns.len(), 4);
    }

    #[test]
    fn test_unpaged_join_stays_flat() {
        let stmt = Select::new(&TASKS)
            .options(&[LoadOption::joined("tags")])
            .unwrap()
            .offset(0)
            .compile();
        assert!(!stmt.sql.contains("paged_ids"));
        assert!(stmt.sql.ends_with("OFFSET 0"));
    }

    #[test]
    fn test_count_wraps_select_without_paging() {
        let stmt = Select::new(&TASKS)
            .filter(Condition::eq(TASKS.require_column("name").unwrap(), "a"))
            .order_by(OrderBy::new(TASKS.id_column(), OrderDirection::Ascending))
            .limit(5)
            .offset(5)
            .compile_count();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT \"tasks\".\"id\" FROM \"tasks\" WHERE \"tasks\".\"deleted_at\" IS NULL AND \"tasks\".\"name\" = $1) AS \"counted\""
        );
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_count_with_join_is_distinct() {
        let stmt = Select::new(&TASKS)
            .options(&[LoadOption::joined("tags")])
            .unwrap()
            .compile_count();
        assert!(stmt.sql.contains("SELECT DISTINCT \"tasks\".\"id\""));
    }
}
