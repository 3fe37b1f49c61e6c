//! Scripted provider for tests and offline runs
//!
//! Replays queued responses in order and records every call it receives.
//! An exhausted script fails the call, so a runaway loop shows up as a
//! failed task instead of a hang.

use super::{LLMError, LLMProvider, LLMResponse, Message, TokenUsage};
use async_trait::async_trait;
use sdk::types::ContentBlock;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One scripted reply
#[derive(Debug)]
pub enum Scripted {
    Respond(LLMResponse),
    Fail(String),
    /// Block until the call's cancellation token fires
    Hang,
}

/// A call as the provider saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub tools_enabled: bool,
}

pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
    started: watch::Sender<usize>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::named("anthropic")
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider registered under `name`
    pub fn named(name: impl Into<String>) -> Self {
        let (started, _) = watch::channel(0);
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            started,
        }
    }

    pub fn push(&self, reply: Scripted) -> &Self {
        lock(&self.script).push_back(reply);
        self
    }

    /// Queue a reply of one text block
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push_blocks(vec![ContentBlock::text(text)], 0)
    }

    /// Queue a reply with the given blocks and total token count
    pub fn push_blocks(&self, content_blocks: Vec<ContentBlock>, total_tokens: u64) -> &Self {
        self.push(Scripted::Respond(LLMResponse {
            content_blocks,
            token_usage: TokenUsage {
                input_tokens: total_tokens,
                output_tokens: 0,
                total_tokens,
            },
        }))
    }

    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.push(Scripted::Fail(message.into()))
    }

    pub fn push_hang(&self) -> &Self {
        self.push(Scripted::Hang)
    }

    /// Replies not yet consumed
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Wait until at least `n` calls have started
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.started.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_message(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        tools_enabled: bool,
        cancel: Option<&CancellationToken>,
    ) -> super::Result<LLMResponse> {
        lock(&self.calls).push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
            model: model.to_string(),
            tools_enabled,
        });
        let next = lock(&self.script).pop_front();
        self.started.send_modify(|count| *count += 1);

        if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(LLMError::Interrupted);
        }

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(LLMError::ProviderUnavailable(message)),
            Some(Scripted::Hang) => match cancel {
                Some(token) => {
                    token.cancelled().await;
                    Err(LLMError::Interrupted)
                }
                None => std::future::pending().await,
            },
            None => Err(LLMError::ProviderUnavailable(
                "scripted provider exhausted".to_string(),
            )),
        }
    }
}
