//! Conductor System
//!
//! One-shot LLM judgments around task execution: the planner breaks a task
//! into steps once, the reflector grades each executed step.

pub mod planner;
pub mod reflector;
pub mod types;

pub use planner::Planner;
pub use reflector::Reflector;
pub use types::{ParsedOutput, Reflection, ReflectionStatus};
