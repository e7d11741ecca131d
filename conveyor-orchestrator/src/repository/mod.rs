//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod approval;
pub mod artifact;
pub mod deployment;
pub mod execution;
pub mod pipeline;

// Re-export for convenience
pub use approval as approval_repository;
pub use artifact as artifact_repository;
pub use deployment as deployment_repository;
pub use execution as execution_repository;
pub use pipeline as pipeline_repository;
