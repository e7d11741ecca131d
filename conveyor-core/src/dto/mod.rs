//! Data Transfer Objects for the orchestrator HTTP API
//!
//! This module contains DTOs exchanged between the orchestrator and its
//! clients (CLI, automation). DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod approval;
pub mod execution;
pub mod pipeline;
