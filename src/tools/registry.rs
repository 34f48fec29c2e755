//! Endpoint registry: which webhook URL serves which action.

use std::collections::HashMap;

/// Static action → URL bindings, fixed for the lifetime of a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, String>,
}

impl EndpointRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(endpoints: HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        for (action, url) in endpoints {
            registry.register(&action, &url);
        }
        registry
    }

    /// Bind an action to a URL. Blank URLs are ignored.
    pub fn register(&mut self, action: &str, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            tracing::warn!(action, "Ignoring blank endpoint URL");
            return;
        }
        self.endpoints.insert(action.to_string(), url.to_string());
        tracing::debug!(action, "Registered endpoint");
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_endpoint(mut self, action: &str, url: &str) -> Self {
        self.register(action, url);
        self
    }

    /// Get the URL for an action.
    pub fn get(&self, action: &str) -> Option<&str> {
        self.endpoints.get(action).map(String::as_str)
    }

    /// List all bound action names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.keys().cloned().collect();
        names.sort();
        names
    }
}
