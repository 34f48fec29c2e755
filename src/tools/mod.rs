//! Outbound tool calls — endpoint bindings and webhook dispatch.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchPayload, ToolDispatcher, WebhookDispatcher};
pub use registry::EndpointRegistry;
