//! Actuation endpoint client
//!
//! Forwards computer actions to the desktop daemon, which performs the real
//! mouse, keyboard and screen operations. The endpoint accepts one tagged
//! JSON payload per request at `POST {base_url}/computer-use`.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::ComputerAction;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ActuationConfig;

/// What the endpoint sent back for an action
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationResponse {
    Ack,
    /// Base64 encoded PNG
    Screenshot(String),
    CursorPosition { x: i64, y: i64 },
}

/// Anything that can perform computer actions
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Perform one action.
    ///
    /// Fails with `EngineError::Transport` when the endpoint is unreachable
    /// or answers with a non-success status, and with
    /// `EngineError::Interrupted` when `cancel` fires first.
    async fn execute(
        &self,
        action: &ComputerAction,
        cancel: Option<&CancellationToken>,
    ) -> Result<ActuationResponse, EngineError>;
}

/// HTTP client for the desktop daemon
pub struct ActuationClient {
    base_url: String,
    client: reqwest::Client,
}

impl ActuationClient {
    pub fn new(config: &ActuationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post(&self, action: &ComputerAction) -> Result<ActuationResponse, EngineError> {
        let url = format!("{}/computer-use", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(action)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let body = response.text().await.map_err(|e| EngineError::Transport(e.to_string()))?;
        decode_response(action, &body)
    }
}

#[async_trait]
impl Actuator for ActuationClient {
    async fn execute(
        &self,
        action: &ComputerAction,
        cancel: Option<&CancellationToken>,
    ) -> Result<ActuationResponse, EngineError> {
        debug!("Actuation request: {}", action.name());

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(EngineError::Interrupted),
                    result = self.post(action) => result,
                }
            }
            None => self.post(action).await,
        }
    }
}

/// Interpret a response body according to the action that produced it.
fn decode_response(action: &ComputerAction, body: &str) -> Result<ActuationResponse, EngineError> {
    match action {
        ComputerAction::Screenshot => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| EngineError::Transport(format!("Invalid screenshot response: {}", e)))?;
            value
                .get("image")
                .and_then(|i| i.as_str())
                .map(|image| ActuationResponse::Screenshot(image.to_string()))
                .ok_or_else(|| EngineError::Transport("Screenshot response has no image".into()))
        }
        ComputerAction::CursorPosition => {
            let value: Value = serde_json::from_str(body).map_err(|e| {
                EngineError::Transport(format!("Invalid cursor position response: {}", e))
            })?;
            match (
                value.get("x").and_then(|x| x.as_i64()),
                value.get("y").and_then(|y| y.as_i64()),
            ) {
                (Some(x), Some(y)) => Ok(ActuationResponse::CursorPosition { x, y }),
                _ => Err(EngineError::Transport(
                    "Cursor position response has no coordinates".into(),
                )),
            }
        }
        _ => {
            if !body.trim().is_empty() && serde_json::from_str::<Value>(body).is_err() {
                warn!("Non-JSON acknowledgment for {}", action.name());
            }
            Ok(ActuationResponse::Ack)
        }
    }
}
