//! Conductor Reflector
//!
//! Grades one executed plan step. The verdict decides whether the plan
//! cursor advances, stays put, or the task is handed to a human.

use crate::agent::prompts::REFLECTION_SYSTEM_PROMPT;
use crate::conductor::types::{ParsedOutput, Reflection, ReflectionStatus};
use crate::db::Task;
use crate::llm::{LLMError, Message, ProviderRegistry};
use sdk::types::collect_text;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MALFORMED_REASON: &str = "Reflection output was malformed.";
const UNPARSEABLE_REASON: &str = "Failed to parse reflection JSON.";
const INTERRUPTED_REASON: &str = "Reflection interrupted";
const GENERIC_FAILURE_REASON: &str = "An unexpected error occurred during reflection.";

pub struct Reflector {
    providers: Arc<ProviderRegistry>,
}

impl Reflector {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Judge the latest step over the full `history`. Never fails.
    pub async fn reflect_on_outcome(
        &self,
        task: &Task,
        history: &[Message],
        cancel: Option<&CancellationToken>,
    ) -> Reflection {
        let provider = match self.providers.resolve(&task.model.provider) {
            Ok(provider) => provider,
            Err(e) => {
                error!("{}", e);
                return Reflection::new(ReflectionStatus::Failure, e.to_string());
            }
        };

        debug!(
            "Reflecting on task ID {} over {} messages",
            task.id,
            history.len()
        );

        let response = match provider
            .generate_message(
                REFLECTION_SYSTEM_PROMPT,
                history,
                &task.model.name,
                false,
                cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(LLMError::Interrupted) => {
                return Reflection::new(ReflectionStatus::Retry, INTERRUPTED_REASON);
            }
            Err(e) => {
                error!("Reflection failed for task ID {}: {}", task.id, e);
                return Reflection::new(ReflectionStatus::Failure, GENERIC_FAILURE_REASON);
            }
        };

        let text = collect_text(&response.content_blocks);
        match ParsedOutput::<Reflection>::parse(&text) {
            ParsedOutput::Structured(reflection) => reflection,
            ParsedOutput::Freeform(raw) => {
                let reason = if serde_json::from_str::<serde_json::Value>(&raw).is_ok() {
                    MALFORMED_REASON
                } else {
                    UNPARSEABLE_REASON
                };
                warn!("{} Task ID {}: {}", reason, task.id, raw);
                Reflection::new(ReflectionStatus::Retry, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Control, ModelDescriptor, TaskPriority, TaskStatus, TaskType};
    use crate::llm::mock::ScriptedProvider;
    use sdk::types::Role;

    fn task(provider: &str) -> Task {
        Task {
            id: "task-1".into(),
            description: "open the browser".into(),
            task_type: TaskType::Immediate,
            status: TaskStatus::Running,
            priority: TaskPriority::Medium,
            control: Control::Assistant,
            created_by: Role::User,
            model: ModelDescriptor::new(provider, "test-model"),
            plan: Some(vec!["Open Firefox".into()]),
            plan_step: 0,
            scheduled_for: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    fn reflector_with(provider: ScriptedProvider) -> (Reflector, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        (Reflector::new(Arc::new(registry)), provider)
    }

    #[tokio::test]
    async fn test_structured_verdict() {
        let provider = ScriptedProvider::new();
        provider.push_text(r#"{"status":"success","reason":"Firefox is open"}"#);
        let (reflector, provider) = reflector_with(provider);

        let history = vec![Message::user("go"), Message::assistant("clicked")];
        let reflection = reflector
            .reflect_on_outcome(&task("anthropic"), &history, None)
            .await;
        assert_eq!(
            reflection,
            Reflection::new(ReflectionStatus::Success, "Firefox is open")
        );

        let calls = provider.calls();
        assert!(!calls[0].tools_enabled);
        assert_eq!(calls[0].messages, history);
        assert_eq!(calls[0].system_prompt, REFLECTION_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_not_json_is_retry() {
        let provider = ScriptedProvider::new();
        provider.push_text("not json");
        let (reflector, _) = reflector_with(provider);

        let reflection = reflector
            .reflect_on_outcome(&task("anthropic"), &[Message::user("go")], None)
            .await;
        assert_eq!(reflection.status, ReflectionStatus::Retry);
        assert!(!reflection.reason.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_retry() {
        let provider = ScriptedProvider::new();
        provider.push_text(r#"{"status":"done","reason":"?"}"#);
        let (reflector, _) = reflector_with(provider);

        let reflection = reflector
            .reflect_on_outcome(&task("anthropic"), &[Message::user("go")], None)
            .await;
        assert_eq!(
            reflection,
            Reflection::new(ReflectionStatus::Retry, MALFORMED_REASON)
        );
    }

    #[tokio::test]
    async fn test_missing_provider_is_failure_without_call() {
        let (reflector, provider) = reflector_with(ScriptedProvider::new());

        let reflection = reflector
            .reflect_on_outcome(&task("mistral"), &[Message::user("go")], None)
            .await;
        assert_eq!(reflection.status, ReflectionStatus::Failure);
        assert!(reflection.reason.contains("mistral"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_is_failure() {
        let provider = ScriptedProvider::new();
        provider.push_error("overloaded");
        let (reflector, _) = reflector_with(provider);

        let reflection = reflector
            .reflect_on_outcome(&task("anthropic"), &[Message::user("go")], None)
            .await;
        assert_eq!(
            reflection,
            Reflection::new(ReflectionStatus::Failure, GENERIC_FAILURE_REASON)
        );
    }

    #[tokio::test]
    async fn test_interrupted_is_retry() {
        let provider = ScriptedProvider::new();
        provider.push_hang();
        let (reflector, _) = reflector_with(provider);
        let token = CancellationToken::new();
        token.cancel();

        let reflection = reflector
            .reflect_on_outcome(&task("anthropic"), &[Message::user("go")], Some(&token))
            .await;
        assert_eq!(reflection.status, ReflectionStatus::Retry);
    }
}
