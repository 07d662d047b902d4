//! Service layer: the component-level control surface the transport
//! adapters (REST handlers, or any other embedding) call into.

pub mod revision_orchestrator;

pub use revision_orchestrator::RevisionOrchestrator;
