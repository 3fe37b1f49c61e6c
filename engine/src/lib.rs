//! Pilot Engine Library
//!
//! Task orchestration for a desktop automation agent. Used by the `pilot`
//! binary and by integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Message bus for interrupts and lifecycle events
pub mod message_bus;

/// LLM provider abstraction layer
pub mod llm;

/// Actuation endpoint client
pub mod actuation;

/// Task processor, tool dispatcher and orchestrator state
pub mod agent;

/// Planner and reflector
pub mod conductor;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
