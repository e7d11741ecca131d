//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and the engine.

pub mod approval;
pub mod deployment;
pub mod execution;
pub mod pipeline;

// Re-export for convenience
pub use approval as approval_service;
pub use deployment as deployment_service;
pub use execution as execution_service;
pub use pipeline as pipeline_service;
