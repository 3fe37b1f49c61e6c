//! Agent Task Orchestration
//!
//! The processor drives a task through plan-driven or reactive iterations,
//! the dispatcher executes the tools of each assistant turn, and the state
//! record enforces that only one task is in flight per process.

pub mod context;
pub mod dispatcher;
pub mod input_capture;
pub mod processor;
pub mod prompts;
pub mod state;

pub use dispatcher::{Dispatch, RequestedStatus, StatusDirective, ToolDispatcher};
pub use input_capture::{BusInputCapture, InputCapture};
pub use processor::{AgentProcessor, ProcessorSettings, ProcessorStatus, StartOutcome};
pub use state::OrchestratorState;
