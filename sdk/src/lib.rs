//! Pilot SDK
//!
//! Shared data model for the Pilot engine: conversation content blocks,
//! actuation actions and the engine error taxonomy. Kept free of runtime
//! dependencies so that any component speaking to the engine can reuse it.

/// Error types and handling
pub mod errors;

/// Conversation and actuation types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, PilotErrorExt};
pub use types::{
    collect_text, Button, ComputerAction, ContentBlock, Coordinates, PressDirection, Role,
    ScrollDirection,
};
