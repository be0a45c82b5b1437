pub mod models;
pub mod pipeline;
pub mod routes;
pub mod service;

pub use models::{AuditAction, AuditEntry, AuditEvent};
pub use pipeline::{ChangePipeline, MutationCtx, MutationOutcome};
pub use service::AuditService;
