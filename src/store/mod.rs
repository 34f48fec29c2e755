//! Persistence layer — the narrow collection contract, its libSQL
//! implementation, and the two components that write through it.

pub mod audit;
pub mod libsql_backend;
pub mod migrations;
pub mod reconcile;
pub mod traits;

pub use audit::{AuditLogger, AuditOutcome};
pub use libsql_backend::LibSqlBackend;
pub use reconcile::{IdentityReconciler, ReconcileOutcome};
pub use traits::{Collection, Database, MatchFilter};
