//! Vigil Engine Library
//!
//! This library provides the core functionality of the Vigil agent engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Project root confinement module
pub mod fs_guard;

/// Command execution security module
pub mod executor;

/// Durable task queue module
pub mod queue;

/// Workflow and task state machine module
pub mod workflow;

/// Change observer module
pub mod observer;

/// Plan generation module
pub mod planner;

/// Persistent memory store module
pub mod memory;

/// Context index module
pub mod context;

/// Project analysis module
pub mod analyzer;

/// Protocol servers module
pub mod server;

/// Agent engine orchestration module
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;
