//! Command handlers for CLI operations
//!
//! - run: create a task and drive it to completion
//! - history: show the last N tasks
//! - replay: show a task's plan and message log
//! - providers: show which LLM providers are usable

use anyhow::{Context, Result};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

use crate::actuation::ActuationClient;
use crate::agent::{AgentProcessor, BusInputCapture, ProcessorSettings, StartOutcome};
use crate::config::{Config, PROVIDER_KEYS};
use crate::db::{Database, ModelDescriptor, NewTask, StoredMessage, TaskPriority, TaskStatus};
use crate::llm::ProviderRegistry;
use crate::message_bus::{Event, MessageBus};
use sdk::types::{collect_text, ContentBlock, Role};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Options of `pilot run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub description: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub priority: String,
    pub context_window: Option<u64>,
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Create a task from the description and process it until the processor
/// goes idle. Ctrl-C cancels the task.
pub async fn handle_run(options: RunOptions, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;

    let provider_key = options
        .provider
        .unwrap_or_else(|| config.agent.default_provider.clone());
    let model_name = options
        .model
        .unwrap_or_else(|| config.agent.default_model.clone());
    let priority = TaskPriority::from_str(&options.priority.to_uppercase())?;

    let registry = Arc::new(ProviderRegistry::from_config(config));
    let provider = registry.resolve(&provider_key)?;
    if !provider.is_configured() {
        tracing::warn!(
            "Provider {} has no API key set, requests will likely be rejected",
            provider_key
        );
    }

    let mut model = ModelDescriptor::new(provider_key, model_name);
    if let Some(context_window) = options.context_window {
        model = model.with_context_window(context_window);
    }

    let task = database
        .tasks()
        .create(
            NewTask::new(options.description.clone(), model)
                .with_status(TaskStatus::Running)
                .with_priority(priority),
        )
        .await?;
    database
        .messages()
        .create(
            &task.id,
            Role::User,
            vec![ContentBlock::text(options.description.clone())],
        )
        .await?;

    match format {
        OutputFormat::Text => {
            println!("Executing task: {}", options.description);
            println!("  Task ID: {}", task.id);
            println!();
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "running",
                "task_id": task.id,
                "task": options.description
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    let bus = MessageBus::new();
    let processor = AgentProcessor::new(
        &database,
        registry,
        Arc::new(ActuationClient::new(&config.actuation)),
        Arc::new(BusInputCapture::new(bus.clone())),
        bus.clone(),
        ProcessorSettings::from(&config.agent),
    );
    let listener = processor.listen(&bus).await;

    let interrupt = {
        let bus = bus.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling task {}", task_id);
                bus.publish(Event::TaskCancel { task_id }).await;
            }
        })
    };

    let outcome = processor.start(&task.id).await;
    if matches!(outcome, Ok(StartOutcome::Started)) {
        processor.wait_until_idle().await;
    }
    interrupt.abort();
    listener.abort();

    let finished = database.tasks().find_by_id(&task.id).await?;
    let last_text = database
        .messages()
        .find_every(&task.id)
        .await?
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| collect_text(&m.content))
        .find(|text| !text.is_empty());

    match format {
        OutputFormat::Text => {
            let mark = if finished.status == TaskStatus::Completed {
                "✓"
            } else {
                "✗"
            };
            println!("{} Task {}", mark, finished.status);
            if let Some(plan) = &finished.plan {
                println!("  Plan steps: {}/{}", finished.plan_step, plan.len());
            }
            if let Some(text) = &last_text {
                println!();
                println!("{}", text);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "status": finished.status.as_str(),
                "task_id": finished.id,
                "plan": finished.plan,
                "plan_step": finished.plan_step,
                "last_message": last_text
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await?;
    outcome.map(|_| ())
}

/// Show the last `limit` tasks
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;

    let tasks = database
        .tasks()
        .list_recent(limit as i64)
        .await
        .context("Failed to fetch task history")?;

    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks in history");
                return Ok(());
            }

            println!("Task History (last {} tasks):", limit);
            println!();

            for task in &tasks {
                println!("Task ID: {}", task.id);
                println!("  Description: {}", task.description);
                println!("  Status: {}", task.status);
                println!("  Model: {}/{}", task.model.provider, task.model.name);
                if let Some(plan) = &task.plan {
                    println!("  Plan: step {} of {}", task.plan_step, plan.len());
                }

                let created = chrono::DateTime::from_timestamp(task.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                println!("  Created: {}", created);
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "tasks": tasks,
                "count": tasks.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// One line per content block
fn describe_message(message: &StoredMessage) -> Vec<String> {
    message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { media_type, .. } => format!("[image {}]", media_type),
            ContentBlock::ToolUse { name, input, .. } => format!("-> {} {}", name, input),
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                let text = collect_text(content);
                let body = if text.is_empty() {
                    "[image]".to_string()
                } else {
                    text
                };
                if *is_error {
                    format!("<- error: {}", body)
                } else {
                    format!("<- {}", body)
                }
            }
        })
        .collect()
}

/// Show a task's plan and every message in order
pub async fn handle_replay(task_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;

    let task = database.tasks().find_by_id(&task_id).await?;
    let messages = database
        .messages()
        .find_every(&task_id)
        .await
        .context("Failed to fetch task messages")?;

    match format {
        OutputFormat::Text => {
            println!("Task Replay: {}", task_id);
            println!();
            println!("Description: {}", task.description);
            println!("Status: {}", task.status);

            if let Some(plan) = &task.plan {
                println!();
                println!("Plan (current step {}):", task.plan_step + 1);
                for (i, step) in plan.iter().enumerate() {
                    let marker = if i < task.plan_step { "x" } else { " " };
                    println!("  [{}] {}. {}", marker, i + 1, step);
                }
            }

            println!();
            println!("Messages ({} total):", messages.len());
            println!();

            for message in &messages {
                let summarized = if message.summary_id.is_some() {
                    " (summarized)"
                } else {
                    ""
                };
                println!("{}{}:", message.role.as_str(), summarized);
                for line in describe_message(message) {
                    println!("  {}", line);
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "task": task,
                "messages": messages,
                "message_count": messages.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List providers with their endpoint and key status
pub fn handle_providers(config: &Config, format: OutputFormat) -> Result<()> {
    let rows: Vec<_> = PROVIDER_KEYS
        .iter()
        .filter_map(|key| config.provider(key).map(|provider| (*key, provider)))
        .map(|(key, provider)| {
            (
                key,
                provider.base_url.clone(),
                provider.api_key_env.clone(),
                provider.api_key().is_some(),
            )
        })
        .collect();

    match format {
        OutputFormat::Text => {
            for (key, base_url, api_key_env, configured) in &rows {
                let mark = if *configured { "✓" } else { "✗" };
                let default = if *key == config.agent.default_provider {
                    " (default)"
                } else {
                    ""
                };
                println!("{} {}{}", mark, key, default);
                println!("    {} via ${}", base_url, api_key_env);
            }
        }
        OutputFormat::Json => {
            let providers: Vec<_> = rows
                .iter()
                .map(|(key, base_url, api_key_env, configured)| {
                    json!({
                        "name": key,
                        "base_url": base_url,
                        "api_key_env": api_key_env,
                        "configured": configured
                    })
                })
                .collect();
            let output = json!({
                "providers": providers,
                "default": config.agent.default_provider
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
