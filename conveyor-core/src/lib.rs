//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor deployment pipeline engine.
//!
//! This crate contains:
//! - Domain types: pipelines, stages, actions, artifacts, executions,
//!   approval requests and blue/green deployments
//! - DTOs: Data transfer objects for the orchestrator HTTP API

pub mod domain;
pub mod dto;
