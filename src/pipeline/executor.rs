//! Action executor — runs rendered actions one at a time.
//!
//! Per step:
//! 1. Normalize known parameter shapes (`forward.to` → list)
//! 2. Dispatch through the [`ToolDispatcher`]
//! 3. On a successful `move`, reconcile the message identity
//! 4. Write the audit record (under the post-move identity)
//! 5. Append the receipt
//!
//! Steps never run concurrently and a failing step never stops the run:
//! a later step may depend on identity changes made by an earlier one.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::pipeline::render::RenderContext;
use crate::pipeline::types::{ActionReceipt, DispatchEmail, EmailPayload, RenderedAction};
use crate::store::audit::AuditLogger;
use crate::store::reconcile::{IdentityReconciler, extract_new_identity};
use crate::store::traits::Database;
use crate::tools::dispatcher::{DispatchPayload, ToolDispatcher};

/// Actions whose success gives the message a new mailbox identity.
pub const IDENTITY_CHANGING_ACTIONS: &[&str] = &["move"];

/// Mutable state of a single pipeline run.
///
/// Owned by exactly one run, so no locking is needed.
#[derive(Debug, Clone)]
pub struct ActionRun {
    email: DispatchEmail,
    context: RenderContext,
    receipts: Vec<ActionReceipt>,
}

impl ActionRun {
    pub fn new(email: &EmailPayload) -> Self {
        Self {
            email: DispatchEmail::from_email(email),
            context: RenderContext::from_email(email),
            receipts: Vec::new(),
        }
    }

    /// Render context as of now (reflects identity changes so far).
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Current message identity.
    pub fn message_id(&self) -> &str {
        &self.context.message_id
    }

    pub fn receipts(&self) -> &[ActionReceipt] {
        &self.receipts
    }

    pub fn into_receipts(self) -> Vec<ActionReceipt> {
        self.receipts
    }

    fn set_message_id(&mut self, new_id: &str) {
        self.context.message_id = new_id.to_string();
        self.email.message_id = new_id.to_string();
    }
}

/// Wrap a single `forward.to` address into a one-element list.
pub fn normalize(action: &mut RenderedAction) {
    if action.action == "forward"
        && let Some(to) = action.params.get_mut("to")
        && to.is_string()
    {
        let addr = to.take();
        *to = Value::Array(vec![addr]);
    }
}

/// Drives rendered actions through dispatch, audit and reconciliation.
pub struct ActionExecutor {
    dispatcher: Arc<dyn ToolDispatcher>,
    audit: Option<AuditLogger>,
    reconciler: Option<IdentityReconciler>,
}

impl ActionExecutor {
    /// Executor without persistence: no audit trail, identity changes stay
    /// local to the run.
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            audit: None,
            reconciler: None,
        }
    }

    /// Attach a store for audit records and identity reconciliation.
    pub fn with_store(mut self, db: Arc<dyn Database>) -> Self {
        self.audit = Some(AuditLogger::new(Arc::clone(&db)));
        self.reconciler = Some(IdentityReconciler::new(db));
        self
    }

    /// Execute all actions in order, one receipt each.
    pub async fn execute(
        &self,
        email: &EmailPayload,
        actions: &[RenderedAction],
    ) -> Vec<ActionReceipt> {
        let mut run = ActionRun::new(email);
        info!(
            message_id = %run.message_id(),
            actions = actions.len(),
            "Executing actions"
        );
        for action in actions {
            self.execute_step(&mut run, action.clone()).await;
        }
        run.into_receipts()
    }

    /// Execute one action within a run and append its receipt.
    pub async fn execute_step(&self, run: &mut ActionRun, mut action: RenderedAction) {
        normalize(&mut action);

        let payload = DispatchPayload {
            email: run.email.clone(),
            params: action.params.clone(),
        };
        let result = self.dispatcher.dispatch(&action.action, &payload).await;

        if result.ok {
            debug!(action = %action.action, status = ?result.status, "Action succeeded");
        } else {
            warn!(
                action = %action.action,
                status = ?result.status,
                error = result.error.as_deref().unwrap_or(""),
                "Action failed"
            );
        }

        if result.ok && IDENTITY_CHANGING_ACTIONS.contains(&action.action.as_str()) {
            let old_id = run.message_id().to_string();
            match result.body.as_ref().and_then(extract_new_identity) {
                Some(new_id) if new_id != old_id => {
                    if let Some(reconciler) = &self.reconciler {
                        reconciler.reconcile(&old_id, &new_id).await;
                    }
                    run.set_message_id(&new_id);
                    info!(
                        old = %old_id,
                        new = %new_id,
                        "Message identity changed by {}",
                        action.action
                    );
                }
                Some(_) => {}
                None => {
                    debug!(action = %action.action, "Response carried no new message identity");
                }
            }
        }

        if let Some(audit) = &self.audit {
            // The outcome is already logged by the audit logger.
            let _ = audit
                .log(run.message_id(), &action.action, &action.params, &result)
                .await;
        }

        run.receipts.push(ActionReceipt {
            action: action.action,
            ok: result.ok,
            detail: result,
        });
    }
}
