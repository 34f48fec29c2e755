//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default per-call timeout for webhook dispatch.
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Env vars holding the webhook URL for each built-in action.
pub const ACTION_ENDPOINT_VARS: &[(&str, &str)] = &[
    ("forward", "N8N_FORWARD_URL"),
    ("move", "N8N_MOVE_URL"),
    ("flag", "N8N_FLAG_URL"),
    ("delete", "N8N_DELETE_URL"),
    ("create_jira", "N8N_CREATE_JIRA_URL"),
    ("create_ticket", "N8N_CREATE_TICKET_URL"),
];

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the YAML rule table.
    pub rules_path: PathBuf,
    /// Path to the local libSQL database.
    pub db_path: PathBuf,
    /// Timeout applied to every outbound webhook call.
    pub dispatch_timeout: Duration,
    /// Action name → webhook URL.
    pub endpoints: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("rules/actions.yaml"),
            db_path: PathBuf::from("./data/mail-actions.db"),
            dispatch_timeout: Duration::from_secs(DEFAULT_DISPATCH_TIMEOUT_SECS),
            endpoints: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = non_empty_var("MAIL_ACTIONS_RULES_PATH") {
            config.rules_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_var("MAIL_ACTIONS_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = non_empty_var("MAIL_ACTIONS_DISPATCH_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "MAIL_ACTIONS_DISPATCH_TIMEOUT_SECS".into(),
                message: format!("{raw:?} is not a number of seconds: {e}"),
            })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MAIL_ACTIONS_DISPATCH_TIMEOUT_SECS".into(),
                    message: "timeout must be at least one second".into(),
                });
            }
            config.dispatch_timeout = Duration::from_secs(secs);
        }

        config.endpoints = endpoints_from_env();
        Ok(config)
    }
}

/// Read the per-action webhook URLs. Empty values count as unset.
pub fn endpoints_from_env() -> HashMap<String, String> {
    ACTION_ENDPOINT_VARS
        .iter()
        .filter_map(|(action, var)| non_empty_var(var).map(|url| (action.to_string(), url)))
        .collect()
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.rules_path, PathBuf::from("rules/actions.yaml"));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn endpoint_vars_cover_builtin_actions() {
        let actions: Vec<&str> = ACTION_ENDPOINT_VARS.iter().map(|(a, _)| *a).collect();
        for expected in ["forward", "move", "flag", "delete", "create_jira"] {
            assert!(actions.contains(&expected), "missing {expected}");
        }
    }
}
