//! Action pipeline — classification in, receipts out.
//!
//! Flow:
//! 1. Rule resolver → declared steps for the classification
//! 2. Renderer → placeholders resolved against the email
//! 3. Executor → dispatch, audit, identity reconciliation
//!
//! Also owns the intake/decision bookkeeping around a run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, Error, PipelineError};
use crate::pipeline::executor::{ActionExecutor, ActionRun};
use crate::pipeline::render::{RenderContext, render_params};
use crate::pipeline::rules::{RuleResolver, RuleTable};
use crate::pipeline::types::{
    ActionReceipt, ActionStep, Attachment, Classification, EmailParty, EmailPayload,
    RenderedAction,
};
use crate::store::traits::{Collection, Database, MatchFilter};

/// Who made a classification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    /// Classifier output accepted as-is.
    Auto,
    /// Escalated for human review.
    Nhr,
    /// Human reviewer's override.
    Human,
}

impl DecisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Nhr => "nhr",
            Self::Human => "human",
        }
    }
}

/// Final status written back to the intake row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Received,
    Executed,
    Escalated,
    NoAction,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Executed => "executed",
            Self::Escalated => "escalated",
            Self::NoAction => "no_action",
        }
    }

    /// `Executed` if anything ran, otherwise `NoAction`.
    pub fn from_receipts(receipts: &[ActionReceipt]) -> Self {
        if receipts.is_empty() {
            Self::NoAction
        } else {
            Self::Executed
        }
    }
}

/// Everything a caller needs after a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub receipts: Vec<ActionReceipt>,
    /// Identity at the end of the run (differs from the input after a move).
    pub message_id: String,
}

/// Classification-driven action pipeline.
pub struct ActionPipeline {
    resolver: RuleResolver,
    executor: Arc<ActionExecutor>,
    db: Option<Arc<dyn Database>>,
}

impl ActionPipeline {
    pub fn new(resolver: RuleResolver, executor: Arc<ActionExecutor>) -> Self {
        Self {
            resolver,
            executor,
            db: None,
        }
    }

    /// Attach the store used for intake and decision records.
    pub fn with_store(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// A new pipeline over a freshly loaded table; `self` is left untouched.
    pub fn reload_rules(&self, table: RuleTable) -> Self {
        info!(classifications = table.len(), "Rule table reloaded");
        Self {
            resolver: RuleResolver::new(table),
            executor: Arc::clone(&self.executor),
            db: self.db.clone(),
        }
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    /// Resolve and render the actions for a classification without
    /// executing anything.
    pub fn plan(
        &self,
        email: &EmailPayload,
        classification: &Classification,
    ) -> Vec<RenderedAction> {
        let ctx = RenderContext::from_email(email);
        self.resolver
            .resolve(&classification.classification)
            .iter()
            .map(|step| render_step(step, &ctx))
            .collect()
    }

    /// Plan and execute.
    ///
    /// Each step is rendered right before it runs, against the run's
    /// current context, so a step after a successful move sees the new
    /// `{message_id}`.
    pub async fn run(&self, email: &EmailPayload, classification: &Classification) -> RunOutcome {
        let steps = self.resolver.resolve(&classification.classification);
        info!(
            message_id = %email.message_id,
            classification = %classification.classification,
            steps = steps.len(),
            "Running action pipeline"
        );

        let mut run = ActionRun::new(email);
        for step in &steps {
            let rendered = render_step(step, run.context());
            self.executor.execute_step(&mut run, rendered).await;
        }

        let message_id = run.message_id().to_string();
        let receipts = run.into_receipts();
        info!(
            message_id = %message_id,
            executed = receipts.len(),
            succeeded = receipts.iter().filter(|r| r.ok).count(),
            "Action pipeline finished"
        );
        RunOutcome {
            receipts,
            message_id,
        }
    }

    /// Insert the intake row for an email. No-op without a store.
    pub async fn record_intake(&self, email: &EmailPayload) -> Result<(), DatabaseError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let record = json!({
            "message_id": email.message_id,
            "internet_message_id": email.internet_message_id,
            "subject": email.subject,
            "from_email": email.from.email,
            "body_text": email.body_text,
            "attachment_links": email
                .attachments
                .iter()
                .map(|a| a.download_url.clone())
                .collect::<Vec<_>>(),
            "status": RunStatus::Received.as_str(),
            "email": email,
        });
        db.insert(Collection::IntakeLog, &record).await
    }

    /// Insert a decision row. Returns the review token for `Nhr` decisions.
    pub async fn record_decision(
        &self,
        email: &EmailPayload,
        classification: &Classification,
        stage: DecisionStage,
        nhr_token: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        let token = match (stage, nhr_token) {
            (_, Some(t)) => Some(t.to_string()),
            (DecisionStage::Nhr, None) => Some(new_nhr_token()),
            _ => None,
        };
        let Some(db) = &self.db else {
            return Ok(token);
        };
        let record = json!({
            "message_id": email.message_id,
            "internet_message_id": email.internet_message_id,
            "classification": classification.classification,
            "confidence": classification.confidence,
            "rationale": classification.rationale.join("\n"),
            "stage": stage.as_str(),
            "nhr": stage == DecisionStage::Nhr,
            "nhr_token": token,
        });
        db.insert(Collection::Decisions, &record).await?;
        debug!(message_id = %email.message_id, stage = stage.as_str(), "Decision recorded");
        Ok(token)
    }

    /// Look up the escalated decision for a review token.
    pub async fn decision_for_token(&self, token: &str) -> Result<Option<Value>, DatabaseError> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let rows = db
            .find(Collection::Decisions, &MatchFilter::eq("nhr_token", token))
            .await?;
        Ok(rows
            .into_iter()
            .find(|r| r.get("stage").and_then(Value::as_str) == Some(DecisionStage::Nhr.as_str())))
    }

    /// Apply a reviewer's answer to an escalated email and run its actions.
    ///
    /// The email is rebuilt from its intake row, so the caller only needs
    /// the review token and the final classification.
    pub async fn apply_feedback(
        &self,
        token: &str,
        label: &str,
        note: Option<&str>,
    ) -> Result<RunOutcome, Error> {
        let Some(db) = &self.db else {
            return Err(PipelineError::StoreRequired.into());
        };
        let decision = self
            .decision_for_token(token)
            .await?
            .ok_or_else(|| PipelineError::UnknownToken(token.to_string()))?;
        let message_id = decision
            .get("message_id")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::UnknownToken(token.to_string()))?
            .to_string();
        let intake = db
            .find(Collection::IntakeLog, &MatchFilter::message_id(&message_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::IntakeMissing(message_id.clone()))?;
        let email = email_from_intake(&intake, &message_id)?;

        let mut decided = Classification::human_override(label);
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            decided.rationale = vec![note.to_string()];
        }
        self.record_decision(&email, &decided, DecisionStage::Human, Some(token))
            .await?;
        info!(message_id = %message_id, classification = label, "Applying review feedback");

        let outcome = self.run(&email, &Classification::human_override(label)).await;
        let status = RunStatus::from_receipts(&outcome.receipts);
        if let Err(e) = self.finalize_status(&outcome.message_id, status).await {
            warn!(message_id = %outcome.message_id, error = %e, "Failed to finalize status");
        }
        Ok(outcome)
    }

    /// Write the run's final status onto the intake row(s) for `message_id`.
    pub async fn finalize_status(
        &self,
        message_id: &str,
        status: RunStatus,
    ) -> Result<u64, DatabaseError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let mut patch = Map::new();
        patch.insert("status".into(), Value::String(status.as_str().into()));
        db.update(Collection::IntakeLog, &MatchFilter::message_id(message_id), &patch)
            .await
    }
}

fn render_step(step: &ActionStep, ctx: &RenderContext) -> RenderedAction {
    RenderedAction {
        action: step.action.clone(),
        params: render_params(&step.params, ctx),
    }
}

/// Rebuild an email from its intake row under its current identity.
///
/// Rows carry a full snapshot under `email`; older rows only have the
/// flat columns.
fn email_from_intake(row: &Value, message_id: &str) -> Result<EmailPayload, PipelineError> {
    let snapshot = row
        .get("email")
        .cloned()
        .map(serde_json::from_value::<EmailPayload>);
    let mut email = match snapshot {
        Some(Ok(email)) => email,
        Some(Err(e)) => {
            warn!(message_id, error = %e, "Unreadable intake snapshot, using flat fields");
            email_from_flat_row(row)
        }
        None => email_from_flat_row(row),
    };
    // A move rewrites the row's identity but not the snapshot inside it.
    email.message_id = message_id.to_string();
    email.validate()
}

fn email_from_flat_row(row: &Value) -> EmailPayload {
    let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    let attachments = row
        .get("attachment_links")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(|url| Attachment {
            filename: url.rsplit('/').next().unwrap_or_default().to_string(),
            content_type: "application/octet-stream".into(),
            download_url: url.to_string(),
        })
        .collect();
    EmailPayload {
        message_id: String::new(),
        internet_message_id: text("internet_message_id").unwrap_or_default(),
        subject: text("subject").unwrap_or_default(),
        from: EmailParty {
            name: None,
            email: text("from_email").unwrap_or_default(),
        },
        to: Vec::new(),
        cc: Vec::new(),
        bcc: Vec::new(),
        body_text: text("body_text"),
        body_html: None,
        attachments,
        headers: Map::new(),
    }
}

/// `NHR_` + 32 hex chars.
pub fn new_nhr_token() -> String {
    format!("NHR_{}", Uuid::new_v4().simple())
}
