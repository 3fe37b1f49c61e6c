//! Conductor types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model output read as JSON when possible, raw text otherwise
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput<T> {
    /// The whole text parsed strictly as `T`
    Structured(T),
    /// Anything else, kept verbatim
    Freeform(String),
}

impl<T: DeserializeOwned> ParsedOutput<T> {
    /// Strictly parse `text` as `T`.
    ///
    /// No fence stripping or substring extraction: text that is not exactly a
    /// JSON document of the expected shape is freeform.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<T>(text) {
            Ok(value) => ParsedOutput::Structured(value),
            Err(_) => ParsedOutput::Freeform(text.to_string()),
        }
    }
}

impl<T> ParsedOutput<T> {
    pub fn structured(self) -> Option<T> {
        match self {
            ParsedOutput::Structured(value) => Some(value),
            ParsedOutput::Freeform(_) => None,
        }
    }
}

/// Verdict on one executed plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionStatus {
    /// Advance to the next step
    Success,
    /// Stop and ask a human
    Failure,
    /// Repeat the same step
    Retry,
}

impl ReflectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionStatus::Success => "success",
            ReflectionStatus::Failure => "failure",
            ReflectionStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for ReflectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub status: ReflectionStatus,
    pub reason: String,
}

impl Reflection {
    pub fn new(status: ReflectionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// Audit text stored in the message log
    pub fn audit_text(&self) -> String {
        format!("Reflection: {} - {}", self.status, self.reason)
    }
}
