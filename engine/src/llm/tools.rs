//! Agent tool catalogue
//!
//! Provider-neutral definitions of the tools offered to the model when a
//! call has tools enabled. Each provider converts these into its own wire
//! format. Computer tools map one-to-one onto actuation actions: the tool
//! `computer_<action>` carries the parameters of `<action>`.

use serde::Serialize;
use serde_json::{json, Value};

/// Prefix shared by every actuation tool
pub const COMPUTER_TOOL_PREFIX: &str = "computer_";
pub const CREATE_TASK_TOOL: &str = "create_task";
pub const SET_TASK_STATUS_TOOL: &str = "set_task_status";

/// A tool offered to the model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the input object
    pub input_schema: Value,
}

impl ToolDefinition {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

fn coordinates_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "x": {"type": "integer", "description": "Horizontal pixel position"},
            "y": {"type": "integer", "description": "Vertical pixel position"}
        },
        "required": ["x", "y"]
    })
}

fn path_schema() -> Value {
    json!({
        "type": "array",
        "items": coordinates_schema(),
        "description": "Points visited in order"
    })
}

fn button_schema() -> Value {
    json!({"type": "string", "enum": ["left", "right", "middle"]})
}

fn press_schema() -> Value {
    json!({"type": "string", "enum": ["up", "down"]})
}

fn hold_keys_schema() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": "Keys held down during the action"
    })
}

/// Every tool the agent may call
pub fn agent_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "computer_move_mouse",
            "Moves the mouse cursor to the specified coordinates",
            json!({
                "type": "object",
                "properties": {"coordinates": coordinates_schema()},
                "required": ["coordinates"]
            }),
        ),
        ToolDefinition::new(
            "computer_trace_mouse",
            "Moves the mouse cursor along a path of coordinates",
            json!({
                "type": "object",
                "properties": {"path": path_schema(), "holdKeys": hold_keys_schema()},
                "required": ["path"]
            }),
        ),
        ToolDefinition::new(
            "computer_click_mouse",
            "Clicks a mouse button, optionally after moving to coordinates",
            json!({
                "type": "object",
                "properties": {
                    "coordinates": coordinates_schema(),
                    "button": button_schema(),
                    "holdKeys": hold_keys_schema(),
                    "clickCount": {"type": "integer", "description": "Number of clicks"}
                },
                "required": ["button", "clickCount"]
            }),
        ),
        ToolDefinition::new(
            "computer_press_mouse",
            "Presses or releases a mouse button",
            json!({
                "type": "object",
                "properties": {
                    "coordinates": coordinates_schema(),
                    "button": button_schema(),
                    "press": press_schema()
                },
                "required": ["button", "press"]
            }),
        ),
        ToolDefinition::new(
            "computer_drag_mouse",
            "Drags the mouse along a path while holding a button",
            json!({
                "type": "object",
                "properties": {
                    "path": path_schema(),
                    "button": button_schema(),
                    "holdKeys": hold_keys_schema()
                },
                "required": ["path", "button"]
            }),
        ),
        ToolDefinition::new(
            "computer_scroll",
            "Scrolls the mouse wheel in a direction",
            json!({
                "type": "object",
                "properties": {
                    "coordinates": coordinates_schema(),
                    "direction": {"type": "string", "enum": ["up", "down", "left", "right"]},
                    "scrollCount": {"type": "integer", "description": "Number of wheel steps"},
                    "holdKeys": hold_keys_schema()
                },
                "required": ["direction", "scrollCount"]
            }),
        ),
        ToolDefinition::new(
            "computer_type_keys",
            "Types a sequence of keys, pressing and releasing each",
            json!({
                "type": "object",
                "properties": {
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "delay": {"type": "integer", "description": "Milliseconds between keys"}
                },
                "required": ["keys"]
            }),
        ),
        ToolDefinition::new(
            "computer_press_keys",
            "Presses or releases keys, for shortcuts and held modifiers",
            json!({
                "type": "object",
                "properties": {
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "press": press_schema()
                },
                "required": ["keys", "press"]
            }),
        ),
        ToolDefinition::new(
            "computer_type_text",
            "Types a string of text",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "delay": {"type": "integer", "description": "Milliseconds between characters"}
                },
                "required": ["text"]
            }),
        ),
        ToolDefinition::new(
            "computer_wait",
            "Waits for the given number of milliseconds",
            json!({
                "type": "object",
                "properties": {"duration": {"type": "integer"}},
                "required": ["duration"]
            }),
        ),
        ToolDefinition::new(
            "computer_screenshot",
            "Captures a screenshot of the desktop",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDefinition::new(
            "computer_cursor_position",
            "Reports the current mouse cursor position",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDefinition::new(
            CREATE_TASK_TOOL,
            "Creates a new task to be worked on separately from the current one",
            json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string"},
                    "type": {"type": "string", "enum": ["IMMEDIATE", "SCHEDULED"]},
                    "priority": {"type": "string", "enum": ["LOW", "MEDIUM", "HIGH", "URGENT"]},
                    "scheduledFor": {"type": "string", "description": "RFC 3339 date-time for scheduled tasks"}
                },
                "required": ["description"]
            }),
        ),
        ToolDefinition::new(
            SET_TASK_STATUS_TOOL,
            "Marks the current task as completed or failed, or asks a human for help",
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["completed", "failed", "needs_help"]},
                    "description": {"type": "string", "description": "Summary of the outcome or the help needed"}
                },
                "required": ["status", "description"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_covers_every_action() {
        let tools = agent_tools();
        let computer: Vec<_> = tools
            .iter()
            .filter(|t| t.name.starts_with(COMPUTER_TOOL_PREFIX))
            .collect();
        assert_eq!(computer.len(), 12);
        assert!(tools.iter().any(|t| t.name == CREATE_TASK_TOOL));
        assert!(tools.iter().any(|t| t.name == SET_TASK_STATUS_TOOL));
    }

    #[test]
    fn test_names_are_unique() {
        let tools = agent_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}
