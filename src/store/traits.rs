//! `Database` trait — the persistence contract the pipeline writes through.
//!
//! Insert a record, update records matching an equality filter, read them
//! back. Records are JSON objects and every collection carries a
//! `message_id` field.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DatabaseError;

/// Field every collection is keyed by.
pub const MESSAGE_ID_FIELD: &str = "message_id";

/// Logical collections written by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// One row per ingested email.
    IntakeLog,
    /// Classification decisions (auto, escalated, human).
    Decisions,
    /// One row per dispatch attempt.
    ActionRuns,
}

impl Collection {
    /// Every collection keyed by message identity.
    pub const ALL: [Collection; 3] = [
        Collection::IntakeLog,
        Collection::Decisions,
        Collection::ActionRuns,
    ];

    /// Table / collection name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IntakeLog => "email_logs",
            Self::Decisions => "email_decisions",
            Self::ActionRuns => "action_runs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality filter on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFilter {
    pub field: String,
    pub value: String,
}

impl MatchFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn message_id(value: impl Into<String>) -> Self {
        Self::eq(MESSAGE_ID_FIELD, value)
    }
}

/// Backend-agnostic persistence over the pipeline's collections.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Append a record. The record must be a JSON object.
    async fn insert(&self, collection: Collection, record: &Value) -> Result<(), DatabaseError>;

    /// Merge `patch` into every record matching `filter`.
    /// Returns the number of records changed.
    async fn update(
        &self,
        collection: Collection,
        filter: &MatchFilter,
        patch: &Map<String, Value>,
    ) -> Result<u64, DatabaseError>;

    /// Records matching `filter`, in insertion order.
    async fn find(
        &self,
        collection: Collection,
        filter: &MatchFilter,
    ) -> Result<Vec<Value>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names() {
        let names: Vec<String> = Collection::ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["email_logs", "email_decisions", "action_runs"]);
    }

    #[test]
    fn message_id_filter() {
        let f = MatchFilter::message_id("M1");
        assert_eq!(f.field, "message_id");
        assert_eq!(f.value, "M1");
    }
}
