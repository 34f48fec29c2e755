//! Classification-driven action pipeline.
//!
//! Every email flows through:
//! 1. `RuleResolver::resolve()` — classification → declared steps
//! 2. `render_params()` — `{env:NAME}` and `{field}` placeholders
//! 3. `ActionExecutor` — dispatch, audit, identity reconciliation
//!
//! A run is strictly sequential and always yields one receipt per step.

pub mod executor;
pub mod processor;
pub mod render;
pub mod rules;
pub mod types;

pub use executor::{ActionExecutor, ActionRun};
pub use processor::{ActionPipeline, DecisionStage, RunOutcome, RunStatus};
pub use render::RenderContext;
pub use rules::{RuleResolver, RuleTable};
pub use types::{
    ActionReceipt, ActionStep, Classification, DispatchResult, EmailPayload, RenderedAction,
};
