//! Action audit trail — one `action_runs` row per dispatch attempt.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::pipeline::types::DispatchResult;
use crate::store::traits::{Collection, Database};

/// Persisted shape of one dispatch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub message_id: String,
    pub action: String,
    pub url: Option<String>,
    pub request: Value,
    pub response_status: Option<u16>,
    pub response_body: Value,
}

impl AuditRecord {
    pub fn new(
        message_id: &str,
        action: &str,
        params: &Map<String, Value>,
        result: &DispatchResult,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            action: action.to_string(),
            url: result.url.clone(),
            request: json!({ "params": params, "message_id": message_id }),
            response_status: result.status,
            response_body: result.body_or_error(),
        }
    }
}

/// What happened to an audit write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Written,
    Failed { reason: String },
}

impl AuditOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Best-effort writer for the action audit trail.
#[derive(Clone)]
pub struct AuditLogger {
    db: Arc<dyn Database>,
}

impl AuditLogger {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist one attempt. Never fails; the outcome says whether it stuck.
    pub async fn log(
        &self,
        message_id: &str,
        action: &str,
        params: &Map<String, Value>,
        result: &DispatchResult,
    ) -> AuditOutcome {
        let record = AuditRecord::new(message_id, action, params, result);
        let value = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!(message_id, action, error = %e, "Failed to serialize audit record");
                return AuditOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match self.db.insert(Collection::ActionRuns, &value).await {
            Ok(()) => {
                debug!(message_id, action, ok = result.ok, "Audit record written");
                AuditOutcome::Written
            }
            Err(e) => {
                warn!(message_id, action, error = %e, "Failed to write audit record");
                AuditOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::libsql_backend::LibSqlBackend;
    use crate::store::traits::MatchFilter;

    fn params() -> Map<String, Value> {
        json!({"folder": "Archive"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn writes_body_on_success() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let logger = AuditLogger::new(db.clone());
        let result = DispatchResult {
            ok: true,
            status: Some(200),
            body: Some(json!({"moved": true})),
            url: Some("https://hooks.example.com/move".into()),
            error: None,
        };

        let outcome = logger.log("M1", "move", &params(), &result).await;
        assert!(outcome.is_written());

        let rows = db
            .find(Collection::ActionRuns, &MatchFilter::message_id("M1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["action"], "move");
        assert_eq!(rows[0]["url"], "https://hooks.example.com/move");
        assert_eq!(rows[0]["response_status"], 200);
        assert_eq!(rows[0]["response_body"], json!({"moved": true}));
        assert_eq!(rows[0]["request"]["params"]["folder"], "Archive");
        assert_eq!(rows[0]["request"]["message_id"], "M1");
    }

    #[tokio::test]
    async fn writes_error_when_no_body() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let logger = AuditLogger::new(db.clone());
        let result = DispatchResult::failed(None, "no endpoint configured for action flag");

        logger.log("M1", "flag", &Map::new(), &result).await;

        let rows = db
            .find(Collection::ActionRuns, &MatchFilter::message_id("M1"))
            .await
            .unwrap();
        assert!(rows[0]["url"].is_null());
        assert!(rows[0]["response_status"].is_null());
        assert_eq!(rows[0]["response_body"], "no endpoint configured for action flag");
    }
}
