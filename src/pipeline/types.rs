//! Shared types for the action pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

// ── Inbound email ───────────────────────────────────────────────────

/// A sender or recipient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailParty {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

/// Attachment metadata. Content is never carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub download_url: String,
}

/// Inbound email, as handed over by the ingestion layer.
///
/// Validated once with [`EmailPayload::validate`]; everything downstream
/// consumes this type only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    /// Mailbox-native message identity. Changes when the message is moved.
    pub message_id: String,
    /// RFC 5322 Message-ID header.
    #[serde(default)]
    pub internet_message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(rename = "from", alias = "from_")]
    pub from: EmailParty,
    #[serde(default)]
    pub to: Vec<EmailParty>,
    #[serde(default)]
    pub cc: Vec<EmailParty>,
    #[serde(default)]
    pub bcc: Vec<EmailParty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub headers: Map<String, Value>,
}

impl EmailPayload {
    /// Check required identity fields and fill derivable ones.
    ///
    /// `internet_message_id` falls back to `message_id` when absent.
    pub fn validate(mut self) -> Result<Self, PipelineError> {
        self.message_id = self.message_id.trim().to_string();
        if self.message_id.is_empty() {
            return Err(PipelineError::InvalidEmail("message_id is empty".into()));
        }
        self.internet_message_id = self.internet_message_id.trim().to_string();
        if self.internet_message_id.is_empty() {
            self.internet_message_id = self.message_id.clone();
        }
        Ok(self)
    }

    /// Value of the `WebLink` header, if it is a string.
    pub fn weblink(&self) -> Option<&str> {
        self.headers.get("WebLink").and_then(Value::as_str)
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Result handed over by the external classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub classification: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Vec<String>,
}

impl Classification {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            classification: label.into(),
            confidence,
            rationale: Vec::new(),
        }
    }

    /// A classification chosen by a human reviewer.
    pub fn human_override(label: impl Into<String>) -> Self {
        Self {
            classification: label.into(),
            confidence: 1.0,
            rationale: vec!["human override".into()],
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// One declared step from the rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub action: String,
    pub params: Map<String, Value>,
}

/// A step whose parameters have been through the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedAction {
    pub action: String,
    pub params: Map<String, Value>,
}

/// Normalized outcome of one webhook call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    /// A failure that happened before or instead of a response.
    pub fn failed(url: Option<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            body: None,
            url,
            error: Some(error.into()),
        }
    }

    /// Body if present, otherwise the error, for audit storage.
    pub fn body_or_error(&self) -> Value {
        match (&self.body, &self.error) {
            (Some(body), _) => body.clone(),
            (None, Some(err)) => Value::String(err.clone()),
            (None, None) => Value::Null,
        }
    }
}

/// Recorded outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub action: String,
    pub ok: bool,
    pub detail: DispatchResult,
}

/// Email metadata sent to every webhook alongside the rendered params.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEmail {
    pub message_id: String,
    pub internet_message_id: String,
    pub subject: String,
    pub from: EmailParty,
    pub to: Vec<EmailParty>,
    pub cc: Vec<EmailParty>,
    pub headers: Map<String, Value>,
    pub attachments: Vec<Attachment>,
}

impl DispatchEmail {
    pub fn from_email(email: &EmailPayload) -> Self {
        Self {
            message_id: email.message_id.clone(),
            internet_message_id: email.internet_message_id.clone(),
            subject: email.subject.clone(),
            from: email.from.clone(),
            to: email.to.clone(),
            cc: email.cc.clone(),
            headers: email.headers.clone(),
            attachments: email.attachments.clone(),
        }
    }
}
