//! Identity reconciliation.
//!
//! Moving a message to another folder gives it a new mailbox id. Rows
//! written earlier in the email's life still carry the old one, so a
//! successful move rewrites `message_id` across every collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::store::traits::{Collection, Database, MESSAGE_ID_FIELD, MatchFilter};

/// Response fields that may carry the new identity, highest priority first.
///
/// Tool implementations disagree on naming; the first non-empty string wins.
pub const NEW_IDENTITY_FIELDS: &[&str] = &[
    "new_message_id",
    "newMessageId",
    "message_id",
    "messageId",
    "id",
];

/// Pull the new message identity out of a move response body.
///
/// Looks at the top-level object (or the first element of an array body),
/// then at a nested `data` object.
pub fn extract_new_identity(body: &Value) -> Option<String> {
    let obj = match body {
        Value::Object(obj) => obj,
        Value::Array(items) => items.first()?.as_object()?,
        _ => return None,
    };

    first_candidate(obj).or_else(|| obj.get("data")?.as_object().and_then(first_candidate))
}

fn first_candidate(obj: &Map<String, Value>) -> Option<String> {
    NEW_IDENTITY_FIELDS.iter().find_map(|field| {
        obj.get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

/// Result of one reconciliation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// False only when the preconditions made the call a no-op.
    pub updated: bool,
    /// Collection name → rows rewritten.
    pub summary: BTreeMap<String, u64>,
    /// Collection name → failure cause. Informational only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl ReconcileOutcome {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn total_updated(&self) -> u64 {
        self.summary.values().sum()
    }
}

/// Rewrites `message_id` in every collection keyed by it.
#[derive(Clone)]
pub struct IdentityReconciler {
    db: Arc<dyn Database>,
}

impl IdentityReconciler {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Point every row under `old` at `new`.
    ///
    /// No-op without writes when `new` is empty or equal to `old`. Each
    /// collection is attempted independently; failures are logged and
    /// reported in `failures` but never flip `updated`.
    pub async fn reconcile(&self, old: &str, new: &str) -> ReconcileOutcome {
        let new = new.trim();
        if old.is_empty() || new.is_empty() || old == new {
            return ReconcileOutcome::noop();
        }

        let filter = MatchFilter::message_id(old);
        let mut patch = Map::new();
        patch.insert(MESSAGE_ID_FIELD.into(), Value::String(new.to_string()));

        let mut outcome = ReconcileOutcome {
            updated: true,
            ..Default::default()
        };

        for collection in Collection::ALL {
            match self.db.update(collection, &filter, &patch).await {
                Ok(count) => {
                    outcome.summary.insert(collection.name().into(), count);
                }
                Err(e) => {
                    warn!(
                        %collection,
                        old,
                        new,
                        error = %e,
                        "Identity update failed for collection"
                    );
                    outcome.summary.insert(collection.name().into(), 0);
                    outcome
                        .failures
                        .insert(collection.name().into(), e.to_string());
                }
            }
        }

        info!(
            old,
            new,
            rows = outcome.total_updated(),
            failed_collections = outcome.failures.len(),
            "Message identity reconciled"
        );
        outcome
    }
}
