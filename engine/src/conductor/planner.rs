//! Conductor Planner
//!
//! Turns a task's first instruction into an ordered list of plan steps with
//! a single tools-disabled LLM call. Planning never fails its caller: any
//! problem degrades to an empty plan, which routes the task to reactive mode.

use crate::agent::prompts::PLANNING_SYSTEM_PROMPT;
use crate::conductor::types::ParsedOutput;
use crate::db::Task;
use crate::llm::{Message, ProviderRegistry};
use sdk::types::collect_text;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Planner {
    providers: Arc<ProviderRegistry>,
}

impl Planner {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Generate the plan for `task` from its initial user message.
    ///
    /// - empty model text: `[]`
    /// - a JSON array of strings: the array, order preserved
    /// - anything else: one step holding the raw text
    /// - missing provider or failed call: `[]`
    pub async fn generate_plan(
        &self,
        task: &Task,
        initial_message: &Message,
        cancel: Option<&CancellationToken>,
    ) -> Vec<String> {
        info!("Generating plan for task ID: {}", task.id);

        let provider = match self.providers.resolve(&task.model.provider) {
            Ok(provider) => provider,
            Err(e) => {
                error!("{}", e);
                return Vec::new();
            }
        };

        let response = match provider
            .generate_message(
                PLANNING_SYSTEM_PROMPT,
                std::slice::from_ref(initial_message),
                &task.model.name,
                false,
                cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to generate plan for task ID {}: {}", task.id, e);
                return Vec::new();
            }
        };

        let plan_text = collect_text(&response.content_blocks);
        if plan_text.is_empty() {
            return Vec::new();
        }

        match ParsedOutput::<Vec<String>>::parse(&plan_text) {
            ParsedOutput::Structured(plan) => {
                info!(
                    "Generated plan with {} steps for task ID: {}",
                    plan.len(),
                    task.id
                );
                plan
            }
            ParsedOutput::Freeform(raw) => {
                warn!(
                    "Plan for task ID {} is not a JSON array of strings, using raw text as a single step",
                    task.id
                );
                vec![raw]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Control, ModelDescriptor, TaskPriority, TaskStatus, TaskType};
    use crate::llm::mock::ScriptedProvider;
    use sdk::types::{ContentBlock, Role};

    fn task(provider: &str) -> Task {
        Task {
            id: "task-1".into(),
            description: "download the report".into(),
            task_type: TaskType::Immediate,
            status: TaskStatus::Running,
            priority: TaskPriority::Medium,
            control: Control::Assistant,
            created_by: Role::User,
            model: ModelDescriptor::new(provider, "test-model"),
            plan: None,
            plan_step: 0,
            scheduled_for: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    fn planner_with(provider: ScriptedProvider) -> (Planner, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        (Planner::new(Arc::new(registry)), provider)
    }

    #[tokio::test]
    async fn test_json_array_returned_verbatim() {
        let provider = ScriptedProvider::new();
        provider.push_text(r#"["a","b"]"#);
        let (planner, provider) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert_eq!(plan, vec!["a", "b"]);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].tools_enabled);
        assert_eq!(calls[0].system_prompt, PLANNING_SYSTEM_PROMPT);
        assert_eq!(calls[0].messages, vec![Message::user("go")]);
        assert_eq!(calls[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_plain_text_becomes_single_step() {
        let provider = ScriptedProvider::new();
        provider.push_text("Step one only");
        let (planner, _) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert_eq!(plan, vec!["Step one only"]);
    }

    #[tokio::test]
    async fn test_empty_text_gives_empty_plan() {
        let provider = ScriptedProvider::new();
        provider.push_blocks(vec![], 0);
        let (planner, _) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_text_blocks_joined_before_parsing() {
        let provider = ScriptedProvider::new();
        provider.push_blocks(
            vec![ContentBlock::text("[\"a\","), ContentBlock::text("\"b\"]")],
            0,
        );
        let (planner, _) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert_eq!(plan, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_non_string_elements_fall_back_to_raw() {
        let provider = ScriptedProvider::new();
        provider.push_text(r#"["a", {"b": 1}]"#);
        let (planner, _) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert_eq!(plan, vec![r#"["a", {"b": 1}]"#]);
    }

    #[tokio::test]
    async fn test_provider_error_gives_empty_plan() {
        let provider = ScriptedProvider::new();
        provider.push_error("boom");
        let (planner, _) = planner_with(provider);

        let plan = planner
            .generate_plan(&task("anthropic"), &Message::user("go"), None)
            .await;
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_gives_empty_plan_without_call() {
        let (planner, provider) = planner_with(ScriptedProvider::new());

        let plan = planner
            .generate_plan(&task("mistral"), &Message::user("go"), None)
            .await;
        assert!(plan.is_empty());
        assert_eq!(provider.call_count(), 0);
    }
}
