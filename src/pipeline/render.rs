//! Placeholder rendering for action parameters.
//!
//! Two passes run on every string in the parameter tree:
//! 1. `{env:NAME}` → value of the environment variable (empty if unset).
//! 2. `{field}` → the matching [`RenderContext`] field. `{{` and `}}` are
//!    literal braces. If the string can't be interpolated (unknown field,
//!    stray brace, format spec) it is returned as-is after pass 1.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::pipeline::types::EmailPayload;

static ENV_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{env:([A-Z0-9_]+)\}").expect("env token regex is valid")
});

/// Email fields available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    pub subject: String,
    pub from_email: String,
    pub internet_message_id: String,
    pub message_id: String,
    pub weblink: String,
}

impl RenderContext {
    pub fn from_email(email: &EmailPayload) -> Self {
        Self {
            subject: email.subject.clone(),
            from_email: email.from.email.clone(),
            internet_message_id: email.internet_message_id.clone(),
            message_id: email.message_id.clone(),
            weblink: email.weblink().unwrap_or_default().to_string(),
        }
    }

    /// Look up a template field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "subject" => Some(&self.subject),
            "from_email" => Some(&self.from_email),
            "internet_message_id" => Some(&self.internet_message_id),
            "message_id" => Some(&self.message_id),
            "weblink" => Some(&self.weblink),
            _ => None,
        }
    }
}

/// Render a parameter object. Never fails.
pub fn render_params(params: &Map<String, Value>, ctx: &RenderContext) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, ctx)))
        .collect()
}

/// Render any JSON value, recursing through arrays and objects.
pub fn render_value(value: &Value, ctx: &RenderContext) -> Value {
    match value {
        Value::String(s) => Value::String(render_str(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(render_params(map, ctx)),
        other => other.clone(),
    }
}

/// Render a single string: env tokens, then field interpolation.
pub fn render_str(s: &str, ctx: &RenderContext) -> String {
    let with_env = substitute_env(s);
    interpolate(&with_env, ctx).unwrap_or(with_env)
}

fn substitute_env(s: &str) -> String {
    if !s.contains("{env:") {
        return s.to_string();
    }
    ENV_TOKEN
        .replace_all(s, |caps: &Captures<'_>| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}

/// `None` means the string is not a valid template for this context.
fn interpolate(s: &str, ctx: &RenderContext) -> Option<String> {
    if !s.contains(['{', '}']) {
        return Some(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        '{' => return None,
                        ch => name.push(ch),
                    }
                }
                out.push_str(ctx.field(&name)?);
            }
            '}' => return None,
            ch => out.push(ch),
        }
    }
    Some(out)
}
