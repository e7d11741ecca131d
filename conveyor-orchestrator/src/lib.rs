//! Conveyor Orchestrator
//!
//! Runs deployment pipelines: stores definitions, schedules executions,
//! gates them on manual approval, shifts traffic between blue and green
//! fleets and reports failures.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod repository;
pub mod service;
