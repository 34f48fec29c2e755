//! Classification → action rules.
//!
//! The rule table is a YAML document mapping classification labels to the
//! ordered steps to run for them:
//!
//! ```yaml
//! classifications:
//!   invoice.overdue:
//!     actions:
//!       - forward: { to: "{from_email}" }
//!       - flag: {}
//!   default:
//!     actions:
//!       - move: { folder: "Triage" }
//! ```
//!
//! The `classifications:` wrapper is optional. A step is exactly one
//! action name mapped to a parameter object (or nothing). Anything else is
//! dropped at load time; a broken table never stops the pipeline, it just
//! yields no actions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use serde_yaml::Value as YamlValue;
use tracing::{debug, error, info, warn};

use crate::error::RulesError;
use crate::pipeline::types::ActionStep;

/// Reserved key used when a classification has no entry of its own.
pub const DEFAULT_CLASSIFICATION: &str = "default";

/// Immutable classification → steps table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    entries: HashMap<String, Vec<ActionStep>>,
}

impl RuleTable {
    /// An empty table: every classification resolves to no actions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a rule table from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, RulesError> {
        let root: YamlValue =
            serde_yaml::from_str(text).map_err(|e| RulesError::Parse(e.to_string()))?;

        let root = match root {
            YamlValue::Null => return Ok(Self::empty()),
            YamlValue::Mapping(map) => map,
            other => {
                return Err(RulesError::Parse(format!(
                    "root must be a mapping, found {}",
                    yaml_kind(&other)
                )));
            }
        };

        let classes = match root.get("classifications") {
            Some(YamlValue::Mapping(inner)) => inner.clone(),
            Some(YamlValue::Null) => return Ok(Self::empty()),
            Some(other) => {
                return Err(RulesError::Parse(format!(
                    "`classifications` must be a mapping, found {}",
                    yaml_kind(other)
                )));
            }
            None => root,
        };

        let mut entries = HashMap::new();
        for (key, entry) in classes {
            let Some(label) = key.as_str() else {
                warn!(key = ?key, "Skipping rule entry with non-string classification");
                continue;
            };
            let steps = parse_entry(label, &entry);
            let key = label.to_lowercase();
            if entries.insert(key.clone(), steps).is_some() {
                warn!(
                    classification = %key,
                    label,
                    "Rule key repeated ignoring case, later entry wins"
                );
            }
        }

        Ok(Self { entries })
    }

    /// Load a rule table from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            classifications = table.entries.len(),
            "Rule table loaded"
        );
        Ok(table)
    }

    /// Load a rule table, degrading to an empty one on any failure.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(table) => table,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Rule table unusable, no actions will run"
                );
                Self::empty()
            }
        }
    }

    /// Steps declared for an exact (already lowercased) key.
    pub fn get(&self, key: &str) -> Option<&[ActionStep]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// All classification keys, sorted.
    pub fn classifications(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse one `{actions: [...]}` entry, dropping malformed steps.
fn parse_entry(label: &str, entry: &YamlValue) -> Vec<ActionStep> {
    let actions = match entry.get("actions") {
        Some(YamlValue::Sequence(seq)) => seq,
        Some(YamlValue::Null) | None => return Vec::new(),
        Some(other) => {
            warn!(
                classification = label,
                found = yaml_kind(other),
                "Rule `actions` is not a list, ignoring entry"
            );
            return Vec::new();
        }
    };

    actions
        .iter()
        .enumerate()
        .filter_map(|(index, step)| {
            let parsed = parse_step(step);
            if parsed.is_none() {
                warn!(classification = label, index, "Dropping malformed rule step");
            }
            parsed
        })
        .collect()
}

/// A step must be a single-key mapping whose value is a mapping or null.
fn parse_step(step: &YamlValue) -> Option<ActionStep> {
    let map = step.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    let (name, params) = map.iter().next()?;
    let action = name.as_str()?.trim();
    if action.is_empty() {
        return None;
    }

    let params = match params {
        YamlValue::Null => Map::new(),
        YamlValue::Mapping(_) => match serde_json::to_value(params) {
            Ok(Value::Object(obj)) => obj,
            _ => return None,
        },
        _ => return None,
    };

    Some(ActionStep {
        action: action.to_string(),
        params,
    })
}

fn yaml_kind(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "bool",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}

/// Maps a classification label to its declared steps.
#[derive(Debug, Clone)]
pub struct RuleResolver {
    table: Arc<RuleTable>,
}

impl RuleResolver {
    pub fn new(table: RuleTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// Steps for `classification` (case-insensitive), falling back to
    /// `default`, then to nothing.
    pub fn resolve(&self, classification: &str) -> Vec<ActionStep> {
        let key = classification.to_lowercase();
        if let Some(steps) = self.table.get(&key) {
            debug!(classification = %key, steps = steps.len(), "Resolved rule");
            return steps.to_vec();
        }
        if let Some(steps) = self.table.get(DEFAULT_CLASSIFICATION) {
            debug!(classification = %key, steps = steps.len(), "Falling back to default rule");
            return steps.to_vec();
        }
        debug!(classification = %key, "No rule and no default, nothing to do");
        Vec::new()
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }
}
