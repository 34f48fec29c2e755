//! Tool dispatch — one rendered action, one webhook call.
//!
//! Every call returns a [`DispatchResult`]; nothing here raises. Missing
//! endpoints, transport errors, timeouts and non-2xx responses all come
//! back as `ok: false` with as much detail as was available.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::pipeline::types::{DispatchEmail, DispatchResult};
use crate::tools::registry::EndpointRegistry;

/// Raw (non-JSON) response bodies are truncated to this many characters.
pub const MAX_RAW_BODY_CHARS: usize = 8192;

/// Wire body for a webhook call.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPayload {
    pub email: DispatchEmail,
    pub params: Map<String, Value>,
}

/// Sends one action to whatever executes it.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, action: &str, payload: &DispatchPayload) -> DispatchResult;
}

/// Dispatcher that POSTs JSON to per-action webhook URLs (n8n and friends).
pub struct WebhookDispatcher {
    endpoints: EndpointRegistry,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(endpoints: EndpointRegistry, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                reqwest::Client::new()
            });
        Self { endpoints, client }
    }
}

#[async_trait]
impl ToolDispatcher for WebhookDispatcher {
    async fn dispatch(&self, action: &str, payload: &DispatchPayload) -> DispatchResult {
        let Some(url) = self.endpoints.get(action) else {
            debug!(action, "No endpoint bound, skipping dispatch");
            return DispatchResult::failed(
                None,
                format!("no endpoint configured for action {action}"),
            );
        };

        let response = match self.client.post(url).json(payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let cause = if e.is_timeout() {
                    format!("request timed out: {e}")
                } else {
                    e.to_string()
                };
                warn!(action, url, error = %cause, "Webhook call failed");
                return DispatchResult::failed(Some(url.to_string()), cause);
            }
        };

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_json_content_type);

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    action,
                    url,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read webhook response body"
                );
                return DispatchResult {
                    ok: false,
                    status: Some(status.as_u16()),
                    body: None,
                    url: Some(url.to_string()),
                    error: Some(format!("failed to read response body: {e}")),
                };
            }
        };

        let body = if is_json {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(cap_text(&text)))
        } else {
            Value::String(cap_text(&text))
        };

        let ok = status.is_success();
        debug!(action, url, status = status.as_u16(), ok, "Webhook responded");

        DispatchResult {
            ok,
            status: Some(status.as_u16()),
            body: Some(body),
            url: Some(url.to_string()),
            error: None,
        }
    }
}

/// `application/json`, `application/problem+json`, with or without params.
fn is_json_content_type(value: &str) -> bool {
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

fn cap_text(text: &str) -> String {
    match text.char_indices().nth(MAX_RAW_BODY_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EmailParty;

    fn payload() -> DispatchPayload {
        DispatchPayload {
            email: DispatchEmail {
                message_id: "M1".into(),
                internet_message_id: "<m1@example.com>".into(),
                subject: "Hi".into(),
                from: EmailParty {
                    name: None,
                    email: "v@example.com".into(),
                },
                to: vec![],
                cc: vec![],
                headers: Map::new(),
                attachments: vec![],
            },
            params: Map::new(),
        }
    }

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/Problem+JSON"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn raw_text_is_capped_on_char_boundary() {
        let long = "é".repeat(MAX_RAW_BODY_CHARS + 10);
        assert_eq!(cap_text(&long).chars().count(), MAX_RAW_BODY_CHARS);
        assert_eq!(cap_text("short"), "short");
    }

    #[tokio::test]
    async fn unbound_action_fails_without_io() {
        let dispatcher = WebhookDispatcher::new(EndpointRegistry::new(), Duration::from_secs(1));
        let result = dispatcher.dispatch("flag", &payload()).await;
        assert!(!result.ok);
        assert_eq!(result.url, None);
        assert_eq!(result.status, None);
        assert!(result.error.unwrap().contains("no endpoint configured"));
    }

    #[tokio::test]
    async fn connection_refused_is_a_failed_result() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/hook");
        let dispatcher = WebhookDispatcher::new(
            EndpointRegistry::new().with_endpoint("forward", &url),
            Duration::from_secs(2),
        );
        let result = dispatcher.dispatch("forward", &payload()).await;
        assert!(!result.ok);
        assert_eq!(result.url.as_deref(), Some(url.as_str()));
        assert!(result.error.is_some());
        assert!(result.body.is_none());
    }
}
