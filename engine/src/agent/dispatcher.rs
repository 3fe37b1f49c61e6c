//! Tool Dispatcher
//!
//! Interprets the tool-use blocks of one assistant turn:
//! - `computer_*` tools are forwarded to the actuation endpoint
//! - `create_task` spawns a follow-up task
//! - `set_task_status` becomes a directive the processor applies later
//!
//! Every tool use gets exactly one ToolResult, in source order. When an
//! actuation call is interrupted, it and every later tool use of the turn
//! are answered with an error result instead of being executed.

use crate::actuation::{ActuationResponse, Actuator};
use crate::db::{NewTask, Task, TaskPriority, TaskRepository, TaskStatus, TaskType};
use crate::llm::tools::{COMPUTER_TOOL_PREFIX, CREATE_TASK_TOOL, SET_TASK_STATUS_TOOL};
use sdk::errors::EngineError;
use sdk::types::{ComputerAction, ContentBlock, Role};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TASK_CREATED_TEXT: &str = "The task has been created";
const TOOL_SUCCESS_TEXT: &str = "Tool executed successfully";
const INTERRUPTED_TEXT: &str =
    "ERROR: Interrupted before the tool finished; its effect on the desktop is unknown";

/// Status a model may request through `set_task_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedStatus {
    Completed,
    Failed,
    NeedsHelp,
}

impl RequestedStatus {
    pub fn task_status(&self) -> TaskStatus {
        match self {
            RequestedStatus::Completed => TaskStatus::Completed,
            RequestedStatus::Failed => TaskStatus::Failed,
            RequestedStatus::NeedsHelp => TaskStatus::NeedsHelp,
        }
    }
}

/// A status change requested by the model, applied after reflection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusDirective {
    pub status: RequestedStatus,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskInput {
    description: String,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    scheduled_for: Option<String>,
}

/// A tool-use block classified by kind
#[derive(Debug)]
enum ToolCall<'a> {
    Computer {
        id: &'a str,
        action: Result<ComputerAction, String>,
    },
    CreateTask {
        id: &'a str,
        input: &'a Value,
    },
    SetTaskStatus {
        id: &'a str,
        input: &'a Value,
    },
    Unknown {
        id: &'a str,
        name: &'a str,
    },
}

impl<'a> ToolCall<'a> {
    fn id(&self) -> &'a str {
        match self {
            ToolCall::Computer { id, .. }
            | ToolCall::CreateTask { id, .. }
            | ToolCall::SetTaskStatus { id, .. }
            | ToolCall::Unknown { id, .. } => *id,
        }
    }

    fn classify(block: &'a ContentBlock) -> Option<Self> {
        let ContentBlock::ToolUse { id, name, input } = block else {
            return None;
        };

        let call = if let Some(action) = name.strip_prefix(COMPUTER_TOOL_PREFIX) {
            ToolCall::Computer {
                id: id.as_str(),
                action: parse_computer_action(action, input),
            }
        } else if name == CREATE_TASK_TOOL {
            ToolCall::CreateTask {
                id: id.as_str(),
                input,
            }
        } else if name == SET_TASK_STATUS_TOOL {
            ToolCall::SetTaskStatus {
                id: id.as_str(),
                input,
            }
        } else {
            ToolCall::Unknown {
                id: id.as_str(),
                name: name.as_str(),
            }
        };
        Some(call)
    }
}

/// Build the actuation payload for `computer_<action>` from the tool input
fn parse_computer_action(action: &str, input: &Value) -> Result<ComputerAction, String> {
    let mut payload = match input {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => return Err(format!("expected an object, got {}", other)),
    };
    payload.insert("action".to_string(), Value::String(action.to_string()));
    serde_json::from_value(Value::Object(payload)).map_err(|e| e.to_string())
}

/// Outcome of dispatching one turn
#[derive(Debug, Default)]
pub struct Dispatch {
    pub tool_results: Vec<ContentBlock>,
    /// First `set_task_status` of the turn, if any
    pub directive: Option<StatusDirective>,
    /// An actuation call was cut short by the cancellation token
    pub interrupted: bool,
}

pub struct ToolDispatcher {
    actuator: Arc<dyn Actuator>,
    tasks: TaskRepository,
}

impl ToolDispatcher {
    pub fn new(actuator: Arc<dyn Actuator>, tasks: TaskRepository) -> Self {
        Self { actuator, tasks }
    }

    /// Execute every tool use in `blocks` on behalf of `task`.
    ///
    /// Never fails: problems become error results, and an interruption is
    /// reported through `Dispatch::interrupted` alongside the results
    /// gathered so far.
    pub async fn dispatch(
        &self,
        task: &Task,
        blocks: &[ContentBlock],
        cancel: Option<&CancellationToken>,
    ) -> Dispatch {
        let mut dispatch = Dispatch::default();

        for call in blocks.iter().filter_map(ToolCall::classify) {
            if dispatch.interrupted {
                dispatch
                    .tool_results
                    .push(ContentBlock::tool_result(call.id(), INTERRUPTED_TEXT, true));
                continue;
            }

            let result = match call {
                ToolCall::Computer { id, action } => match action {
                    Ok(action) => match self.run_computer_action(id, &action, cancel).await {
                        Some(result) => result,
                        None => {
                            info!("Actuation {} interrupted for task {}", action.name(), task.id);
                            dispatch.interrupted = true;
                            ContentBlock::tool_result(id, INTERRUPTED_TEXT, true)
                        }
                    },
                    Err(e) => {
                        warn!("Invalid computer tool input for {}: {}", id, e);
                        ContentBlock::tool_result(
                            id,
                            format!("ERROR: {}", EngineError::InvalidToolInput(e)),
                            true,
                        )
                    }
                },
                ToolCall::CreateTask { id, input } => {
                    self.create_task(task, input).await;
                    ContentBlock::tool_result(id, TASK_CREATED_TEXT, false)
                }
                ToolCall::SetTaskStatus { id, input } => {
                    match StatusDirective::deserialize(input) {
                        Ok(directive) => {
                            let result = ContentBlock::tool_result(
                                id,
                                directive.description.clone(),
                                directive.status == RequestedStatus::Failed,
                            );
                            if dispatch.directive.is_none() {
                                dispatch.directive = Some(directive);
                            } else {
                                debug!("Ignoring extra set_task_status in turn for {}", task.id);
                            }
                            result
                        }
                        Err(e) => ContentBlock::tool_result(
                            id,
                            format!("ERROR: {}", EngineError::InvalidToolInput(e.to_string())),
                            true,
                        ),
                    }
                }
                ToolCall::Unknown { id, name } => {
                    warn!("Model called unknown tool: {}", name);
                    ContentBlock::tool_result(
                        id,
                        format!("ERROR: {}", EngineError::ToolNotFound(name.to_string())),
                        true,
                    )
                }
            };
            dispatch.tool_results.push(result);
        }

        dispatch
    }

    /// `None` when the call was interrupted
    async fn run_computer_action(
        &self,
        id: &str,
        action: &ComputerAction,
        cancel: Option<&CancellationToken>,
    ) -> Option<ContentBlock> {
        let result = match self.actuator.execute(action, cancel).await {
            Ok(ActuationResponse::Screenshot(data)) => ContentBlock::ToolResult {
                tool_use_id: id.to_string(),
                content: vec![ContentBlock::png(data)],
                is_error: false,
            },
            Ok(ActuationResponse::CursorPosition { x, y }) => {
                ContentBlock::tool_result(id, format!("Cursor position: {}, {}", x, y), false)
            }
            Ok(ActuationResponse::Ack) => ContentBlock::tool_result(id, TOOL_SUCCESS_TEXT, false),
            Err(EngineError::Interrupted) => return None,
            Err(e) => {
                warn!("Actuation {} failed: {}", action.name(), e);
                ContentBlock::tool_result(id, format!("ERROR: {}", e), true)
            }
        };
        Some(result)
    }

    /// Spawn a follow-up task. The outcome never reaches the model.
    async fn create_task(&self, parent: &Task, input: &Value) {
        let input = match CreateTaskInput::deserialize(input) {
            Ok(input) => input,
            Err(e) => {
                warn!("Ignoring create_task with invalid input: {}", e);
                return;
            }
        };

        let mut new_task = NewTask::new(input.description, parent.model.clone())
            .created_by(Role::Assistant);

        if let Some(task_type) = input.task_type.as_deref() {
            match TaskType::from_str(&task_type.to_uppercase()) {
                Ok(task_type) => new_task = new_task.with_type(task_type),
                Err(e) => warn!("create_task: {}", e),
            }
        }
        if let Some(priority) = input.priority.as_deref() {
            match TaskPriority::from_str(&priority.to_uppercase()) {
                Ok(priority) => new_task = new_task.with_priority(priority),
                Err(e) => warn!("create_task: {}", e),
            }
        }
        if let Some(scheduled_for) = input.scheduled_for.as_deref() {
            match chrono::DateTime::parse_from_rfc3339(scheduled_for) {
                Ok(at) => new_task.scheduled_for = Some(at.timestamp()),
                Err(e) => warn!("create_task: invalid scheduledFor {}: {}", scheduled_for, e),
            }
        }

        match self.tasks.create(new_task).await {
            Ok(created) => info!("Task {} created task {}", parent.id, created.id),
            Err(e) => warn!("Failed to create follow-up task for {}: {:#}", parent.id, e),
        }
    }
}
