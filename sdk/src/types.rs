//! Conversation and actuation types
//!
//! `ContentBlock` is the unit of conversational payload stored in the message
//! log and exchanged with every capability provider. `ComputerAction` is the
//! tagged payload accepted by the actuation endpoint.

use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "ASSISTANT" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One typed unit of conversational payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64 encoded image bytes
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a PNG image block from base64 data
    pub fn png(data: impl Into<String>) -> Self {
        Self::Image {
            media_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    /// Create a tool result carrying a single text block
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: vec![Self::text(text)],
            is_error,
        }
    }

    /// Returns the text if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// Concatenate the text blocks of a turn with newline separators.
///
/// Non-text blocks are skipped.
pub fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Payload accepted by the actuation endpoint, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ComputerAction {
    MoveMouse {
        coordinates: Coordinates,
    },
    TraceMouse {
        path: Vec<Coordinates>,
        #[serde(rename = "holdKeys", default, skip_serializing_if = "Option::is_none")]
        hold_keys: Option<Vec<String>>,
    },
    ClickMouse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Coordinates>,
        button: Button,
        #[serde(rename = "holdKeys", default, skip_serializing_if = "Option::is_none")]
        hold_keys: Option<Vec<String>>,
        #[serde(rename = "clickCount", default = "default_click_count")]
        click_count: u32,
    },
    PressMouse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Coordinates>,
        button: Button,
        press: PressDirection,
    },
    DragMouse {
        path: Vec<Coordinates>,
        button: Button,
        #[serde(rename = "holdKeys", default, skip_serializing_if = "Option::is_none")]
        hold_keys: Option<Vec<String>>,
    },
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Coordinates>,
        direction: ScrollDirection,
        #[serde(rename = "scrollCount")]
        scroll_count: u32,
        #[serde(rename = "holdKeys", default, skip_serializing_if = "Option::is_none")]
        hold_keys: Option<Vec<String>>,
    },
    TypeKeys {
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    PressKeys {
        keys: Vec<String>,
        press: PressDirection,
    },
    TypeText {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    Wait {
        /// Milliseconds
        duration: u64,
    },
    Screenshot,
    CursorPosition,
}

fn default_click_count() -> u32 {
    1
}

impl ComputerAction {
    /// Wire name of the action
    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveMouse { .. } => "move_mouse",
            Self::TraceMouse { .. } => "trace_mouse",
            Self::ClickMouse { .. } => "click_mouse",
            Self::PressMouse { .. } => "press_mouse",
            Self::DragMouse { .. } => "drag_mouse",
            Self::Scroll { .. } => "scroll",
            Self::TypeKeys { .. } => "type_keys",
            Self::PressKeys { .. } => "press_keys",
            Self::TypeText { .. } => "type_text",
            Self::Wait { .. } => "wait",
            Self::Screenshot => "screenshot",
            Self::CursorPosition => "cursor_position",
        }
    }
}
