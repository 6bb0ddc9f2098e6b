//! Shared fixtures: a recording session and a small task-tracker model

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity_crud::sql::Statement;
use entity_crud::{
    ColumnDefinition, ColumnType, Entity, EntityDescriptor, Id, Relation, Result, Session,
    SoftDelete, Values,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session that records every statement and replays queued results
#[derive(Debug, Default)]
pub struct RecordingSession {
    pub statements: Vec<Statement>,
    rows: VecDeque<Vec<Values>>,
    scalars: VecDeque<i64>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows returned by the next `fetch_all`
    pub fn push_rows(&mut self, rows: Vec<Value>) -> &mut Self {
        self.rows.push_back(rows.into_iter().map(object).collect());
        self
    }

    /// Queue the value returned by the next `fetch_scalar`
    pub fn push_scalar(&mut self, value: i64) -> &mut Self {
        self.scalars.push_back(value);
        self
    }

    pub fn sql(&self, index: usize) -> &str {
        &self.statements[index].sql
    }

    pub fn params(&self, index: usize) -> Vec<Value> {
        self.statements[index]
            .params
            .iter()
            .map(|p| p.value.clone())
            .collect()
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Values>> {
        self.statements.push(statement.clone());
        Ok(self.rows.pop_front().unwrap_or_default())
    }

    async fn fetch_scalar(&mut self, statement: &Statement) -> Result<i64> {
        self.statements.push(statement.clone());
        Ok(self.scalars.pop_front().unwrap_or(0))
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.statements.push(statement.clone());
        Ok(0)
    }
}

/// Route library logs to the test output; `RUST_LOG=entity_crud=debug` shows statements
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn object(value: Value) -> Values {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub status_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub static TASKS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::new("Task", "tasks", ColumnType::Integer)
        .with_column(ColumnDefinition::new("title", ColumnType::varchar(255)).not_null())
        .with_column(ColumnDefinition::new("status_id", ColumnType::Integer))
        .with_column(ColumnDefinition::new("created_by", ColumnType::Integer))
        .with_column(ColumnDefinition::new("created_at", ColumnType::Timestamp).with_default())
        .with_soft_delete()
        .with_relation(Relation::many_to_many::<Tag, TaskTag>("tags", "task_id", "tag_id"))
});

impl Entity for Task {
    fn descriptor() -> &'static EntityDescriptor {
        &TASKS
    }

    fn id(&self) -> Id {
        self.id.into()
    }
}

impl SoftDelete for Task {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.deleted_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

pub static TAGS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::new("Tag", "tags", ColumnType::Integer)
        .with_column(ColumnDefinition::new("label", ColumnType::String).not_null())
});

impl Entity for Tag {
    fn descriptor() -> &'static EntityDescriptor {
        &TAGS
    }

    fn id(&self) -> Id {
        self.id.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTag {
    pub id: i64,
    pub task_id: i64,
    pub tag_id: i64,
}

pub static TASK_TAGS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::new("TaskTag", "task_tags", ColumnType::Integer)
        .with_column(ColumnDefinition::new("task_id", ColumnType::Integer).not_null())
        .with_column(ColumnDefinition::new("tag_id", ColumnType::Integer).not_null())
});

impl Entity for TaskTag {
    fn descriptor() -> &'static EntityDescriptor {
        &TASK_TAGS
    }

    fn id(&self) -> Id {
        self.id.into()
    }
}

pub fn task_row(id: i64, title: &str) -> Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "status_id": 1,
        "created_by": null,
        "created_at": "2024-01-15T10:30:00+00:00",
        "deleted_at": null,
    })
}
