//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor crates.
//! They are shared between the orchestrator (which persists and executes them)
//! and the client/CLI (which displays them).

pub mod approval;
pub mod artifact;
pub mod deployment;
pub mod duration;
pub mod event;
pub mod execution;
pub mod pipeline;
