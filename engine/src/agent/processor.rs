//! Agent Processor
//!
//! Drives one task at a time from RUNNING to a terminal status:
//!
//! 1. `start` claims the single in-flight slot, plans once, posts the first
//!    iteration and returns without waiting for it
//! 2. Each iteration reloads the task, plans it if planning was interrupted
//!    earlier, and runs one plan-driven or reactive step: LLM call, tool
//!    dispatch, reflection or summarization
//! 3. While the task stays RUNNING the next iteration is posted to the work
//!    queue, so interrupts interleave between iterations
//!
//! `takeover`, `resume` and `cancel` may fire at any point. Every outbound
//! call of an iteration carries that iteration's cancellation token; a fired
//! token stops the iteration quietly and leaves the task RUNNING.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuation::Actuator;
use crate::agent::context::{self, LlmContext};
use crate::agent::dispatcher::{StatusDirective, ToolDispatcher};
use crate::agent::input_capture::InputCapture;
use crate::agent::prompts::{
    AGENT_SYSTEM_PROMPT, SUMMARIZATION_INSTRUCTION, SUMMARIZATION_SYSTEM_PROMPT,
};
use crate::agent::state::{Lease, OrchestratorState, Ticket};
use crate::conductor::{Planner, ReflectionStatus, Reflector};
use crate::config::AgentConfig;
use crate::db::{
    now_secs, Database, MessageRepository, StoredMessage, SummaryRepository, Task, TaskRepository,
    TaskStatus, TaskUpdate,
};
use crate::llm::{LLMError, LLMProvider, LLMResponse, Message, ProviderRegistry};
use crate::message_bus::{Event, EventType, MessageBus};
use sdk::errors::EngineError;
use sdk::types::{collect_text, ContentBlock, Role};

/// Tunables of the iteration loop
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Used when a task's model does not declare a context window
    pub default_context_window: u64,
    pub summarization_ratio: f64,
    /// Unsummarized messages sent after the plan narrative
    pub plan_context_messages: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            default_context_window: 200_000,
            summarization_ratio: 0.75,
            plan_context_messages: 10,
        }
    }
}

impl From<&AgentConfig> for ProcessorSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            default_context_window: config.default_context_window,
            summarization_ratio: config.summarization_ratio,
            plan_context_messages: config.plan_context_messages,
        }
    }
}

/// What the processor is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorStatus {
    Idle,
    Processing { task_id: String },
    /// A human holds control; iterations wait for `resume`
    Suspended { task_id: String },
}

/// Result of `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Another task is in flight; nothing was queued
    Busy,
    /// The task was already in a terminal status
    Finished(TaskStatus),
}

enum Work {
    Iterate { task_id: String, lease: Lease },
}

enum Flow {
    Continue,
    Halt,
}

pub struct AgentProcessor {
    tasks: TaskRepository,
    messages: MessageRepository,
    summaries: SummaryRepository,
    providers: Arc<ProviderRegistry>,
    planner: Planner,
    reflector: Reflector,
    dispatcher: ToolDispatcher,
    input_capture: Arc<dyn InputCapture>,
    bus: MessageBus,
    settings: ProcessorSettings,
    state: OrchestratorState,
    work_tx: mpsc::UnboundedSender<Work>,
    status_tx: watch::Sender<ProcessorStatus>,
}

impl AgentProcessor {
    /// Build the processor and spawn its iteration worker.
    ///
    /// Must be called inside a tokio runtime. The worker stops once the
    /// last `Arc` is dropped.
    pub fn new(
        db: &Database,
        providers: Arc<ProviderRegistry>,
        actuator: Arc<dyn Actuator>,
        input_capture: Arc<dyn InputCapture>,
        bus: MessageBus,
        settings: ProcessorSettings,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ProcessorStatus::Idle);

        let processor = Arc::new(Self {
            tasks: db.tasks(),
            messages: db.messages(),
            summaries: db.summaries(),
            planner: Planner::new(Arc::clone(&providers)),
            reflector: Reflector::new(Arc::clone(&providers)),
            dispatcher: ToolDispatcher::new(actuator, db.tasks()),
            providers,
            input_capture,
            bus,
            settings,
            state: OrchestratorState::new(),
            work_tx,
            status_tx,
        });

        tokio::spawn(Self::run_worker(Arc::downgrade(&processor), work_rx));
        info!("AgentProcessor initialized");
        processor
    }

    async fn run_worker(processor: Weak<Self>, mut work_rx: mpsc::UnboundedReceiver<Work>) {
        while let Some(work) = work_rx.recv().await {
            let Some(processor) = processor.upgrade() else {
                break;
            };
            match work {
                Work::Iterate { task_id, lease } => processor.run_iteration(&task_id, lease).await,
            }
        }
        debug!("Processor worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.state.current_task_id()
    }

    pub fn status(&self) -> ProcessorStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ProcessorStatus> {
        self.status_tx.subscribe()
    }

    /// Resolve once no task is in flight
    pub async fn wait_until_idle(&self) {
        let mut rx = self.status_tx.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|status| *status == ProcessorStatus::Idle).await;
    }

    /// Begin processing `task_id` unless another task is in flight.
    ///
    /// Plans the task first if it has no plan yet, then posts the first
    /// iteration. Fails when the task cannot be loaded or its provider is
    /// unknown; the task is marked FAILED in the latter case.
    pub async fn start(&self, task_id: &str) -> Result<StartOutcome> {
        info!("Starting processing for task ID: {}", task_id);

        let Some(ticket) = self.state.try_enter(task_id) else {
            warn!("AgentProcessor is already processing another task");
            return Ok(StartOutcome::Busy);
        };
        self.status_tx.send_replace(ProcessorStatus::Processing {
            task_id: task_id.to_string(),
        });

        let generation = ticket.lease.generation;
        match self.prepare(task_id, &ticket).await {
            Ok(None) => {
                self.post(task_id, ticket.lease);
                Ok(StartOutcome::Started)
            }
            Ok(Some(status)) => {
                info!("Task {} is already {}, nothing to do", task_id, status);
                self.release(task_id, generation);
                Ok(StartOutcome::Finished(status))
            }
            Err(e) => {
                self.fail_task(task_id, generation, &e).await;
                Err(e)
            }
        }
    }

    /// Load the task, move it to RUNNING and plan it.
    ///
    /// Returns the status of a task that is already terminal.
    async fn prepare(&self, task_id: &str, ticket: &Ticket) -> Result<Option<TaskStatus>> {
        let mut task = self.tasks.find_by_id(task_id).await?;
        if task.status.is_terminal() {
            return Ok(Some(task.status));
        }
        self.providers.resolve(&task.model.provider)?;

        if task.status != TaskStatus::Running {
            task = self
                .tasks
                .update(task_id, TaskUpdate::status(TaskStatus::Running))
                .await?;
        }
        self.ensure_plan(&task, &ticket.token).await?;

        self.bus
            .publish(Event::TaskStarted {
                task_id: task_id.to_string(),
            })
            .await;
        Ok(None)
    }

    /// Plan a task that has never been planned.
    ///
    /// An interrupted planning call saves nothing, so the next iteration
    /// plans again. A task without a user message gets an empty plan and
    /// runs reactively.
    async fn ensure_plan(&self, task: &Task, token: &CancellationToken) -> Result<()> {
        if task.plan.is_some() {
            return Ok(());
        }

        info!("No plan found for task {}. Generating one...", task.id);
        let plan = match self.messages.find_first_user(&task.id).await? {
            Some(initial) => {
                self.planner
                    .generate_plan(task, &Message::from(initial), Some(token))
                    .await
            }
            None => {
                warn!("{}", EngineError::MissingInitialMessage(task.id.clone()));
                Vec::new()
            }
        };
        if token.is_cancelled() {
            warn!("Planning interrupted for task {}, plan not saved", task.id);
            return Ok(());
        }

        let steps = plan.len();
        self.tasks
            .update(&task.id, TaskUpdate::plan(plan))
            .await
            .context("Failed to save plan")?;
        info!("Plan with {} steps saved for task {}", steps, task.id);
        Ok(())
    }

    fn post(&self, task_id: &str, lease: Lease) {
        let work = Work::Iterate {
            task_id: task_id.to_string(),
            lease,
        };
        if self.work_tx.send(work).is_err() {
            error!("Processor worker is gone, iteration for {} dropped", task_id);
        }
    }

    async fn run_iteration(&self, task_id: &str, lease: Lease) {
        let Some(token) = self.state.begin_iteration(task_id, lease) else {
            debug!("Dropping stale iteration for task ID: {}", task_id);
            return;
        };

        match self.iterate(task_id, &token).await {
            Ok(Flow::Continue) => {
                if self.state.is_current(task_id, lease) {
                    self.post(task_id, lease);
                }
            }
            Ok(Flow::Halt) => self.finish(task_id, lease.generation).await,
            Err(e) if is_interrupted(&e) => {
                warn!("Processing aborted for task ID: {}", task_id);
            }
            Err(e) => self.fail_task(task_id, lease.generation, &e).await,
        }
    }

    async fn iterate(&self, task_id: &str, token: &CancellationToken) -> Result<Flow> {
        let mut task = self.tasks.find_by_id(task_id).await?;
        if task.status == TaskStatus::Running && task.plan.is_none() {
            self.ensure_plan(&task, token).await?;
            if token.is_cancelled() {
                return Err(EngineError::Interrupted.into());
            }
            task = self.tasks.find_by_id(task_id).await?;
        }
        if task.status != TaskStatus::Running {
            info!(
                "Task processing completed for task ID: {} with status: {}",
                task_id, task.status
            );
            return Ok(Flow::Halt);
        }

        let provider = self.providers.resolve(&task.model.provider)?;
        info!("Processing iteration for task ID: {}", task_id);

        if task.plan_steps().is_empty() {
            self.reactive_step(&task, provider.as_ref(), token).await
        } else {
            self.plan_step(&task, provider.as_ref(), token).await
        }
    }

    async fn plan_step(
        &self,
        task: &Task,
        provider: &dyn LLMProvider,
        token: &CancellationToken,
    ) -> Result<Flow> {
        let plan_len = task.plan_steps().len();
        if task.plan_step >= plan_len {
            info!("Plan complete for task {}. Marking as completed.", task.id);
            self.transition(&task.id, TaskStatus::Completed, "plan complete")
                .await?;
            return Ok(Flow::Halt);
        }

        let unsummarized = self.messages.find_unsummarized(&task.id).await?;
        let context = context::plan_context(task, &unsummarized, self.settings.plan_context_messages);
        let response = self.call_llm(task, provider, &context.messages, token).await?;

        self.record(&task.id, Role::Assistant, response.content_blocks.clone())
            .await?;
        let dispatch = self
            .dispatcher
            .dispatch(task, &response.content_blocks, Some(token))
            .await;
        if !dispatch.tool_results.is_empty() {
            self.record(&task.id, Role::User, dispatch.tool_results.clone())
                .await?;
        }
        if dispatch.interrupted {
            return Err(EngineError::Interrupted.into());
        }

        let mut history = context.messages;
        history.push(Message::new(Role::Assistant, response.content_blocks));
        if !dispatch.tool_results.is_empty() {
            history.push(Message::new(Role::User, dispatch.tool_results));
        }

        let reflection = self
            .reflector
            .reflect_on_outcome(task, &history, Some(token))
            .await;
        if token.is_cancelled() {
            return Err(EngineError::Interrupted.into());
        }
        self.record(
            &task.id,
            Role::Assistant,
            vec![ContentBlock::text(reflection.audit_text())],
        )
        .await?;

        let step = task.plan_step + 1;
        let mut flow = Flow::Continue;
        match reflection.status {
            ReflectionStatus::Success => {
                info!(
                    "Step {} of plan for task {} was successful. Advancing to next step.",
                    step, task.id
                );
                self.tasks
                    .update(&task.id, TaskUpdate::plan_step(task.plan_step + 1))
                    .await?;
            }
            ReflectionStatus::Failure => {
                warn!(
                    "Step {} of plan for task {} failed. Reason: {}. Marking task as needs help.",
                    step, task.id, reflection.reason
                );
                self.transition(&task.id, TaskStatus::NeedsHelp, &reflection.reason)
                    .await?;
                flow = Flow::Halt;
            }
            ReflectionStatus::Retry => {
                info!(
                    "Step {} of plan for task {} needs a retry. Reason: {}",
                    step, task.id, reflection.reason
                );
            }
        }

        if let Some(directive) = dispatch.directive {
            self.apply_directive(&task.id, &directive).await?;
            flow = Flow::Halt;
        }
        Ok(flow)
    }

    async fn reactive_step(
        &self,
        task: &Task,
        provider: &dyn LLMProvider,
        token: &CancellationToken,
    ) -> Result<Flow> {
        let summary = self.summaries.find_latest(&task.id).await?;
        let unsummarized = self.messages.find_unsummarized(&task.id).await?;
        let context = context::reactive_context(summary.as_ref(), &unsummarized);
        debug!(
            "Sending {} messages to LLM for processing",
            context.messages.len()
        );

        let response = self.call_llm(task, provider, &context.messages, token).await?;
        if response.content_blocks.is_empty() {
            warn!(
                "Task ID: {} received no content blocks from LLM, marking as failed",
                task.id
            );
            self.transition(&task.id, TaskStatus::Failed, "empty model response")
                .await?;
            return Ok(Flow::Halt);
        }

        self.record(&task.id, Role::Assistant, response.content_blocks.clone())
            .await?;
        self.summarize_if_needed(task, provider, &context, &response, token)
            .await;

        let dispatch = self
            .dispatcher
            .dispatch(task, &response.content_blocks, Some(token))
            .await;
        if !dispatch.tool_results.is_empty() {
            self.record(&task.id, Role::User, dispatch.tool_results)
                .await?;
        }
        if dispatch.interrupted {
            return Err(EngineError::Interrupted.into());
        }

        match dispatch.directive {
            Some(directive) => {
                self.apply_directive(&task.id, &directive).await?;
                Ok(Flow::Halt)
            }
            None => Ok(Flow::Continue),
        }
    }

    async fn call_llm(
        &self,
        task: &Task,
        provider: &dyn LLMProvider,
        messages: &[Message],
        token: &CancellationToken,
    ) -> Result<LLMResponse> {
        let response = provider
            .generate_message(
                AGENT_SYSTEM_PROMPT,
                messages,
                &task.model.name,
                true,
                Some(token),
            )
            .await
            .with_context(|| format!("{} call failed for task {}", provider.name(), task.id))?;
        debug!(
            "Task {} used {} tokens",
            task.id, response.token_usage.total_tokens
        );
        Ok(response)
    }

    /// Summarize once the turn used enough of the context window.
    ///
    /// Failures are logged and never affect the task.
    async fn summarize_if_needed(
        &self,
        task: &Task,
        provider: &dyn LLMProvider,
        context: &LlmContext,
        response: &LLMResponse,
        token: &CancellationToken,
    ) {
        let context_window = task
            .model
            .context_window
            .unwrap_or(self.settings.default_context_window);
        let total_tokens = response.token_usage.total_tokens;
        let usage = total_tokens as f64 / context_window as f64;

        debug!(
            "Token usage for task {}: {}/{} ({:.0}%)",
            task.id,
            total_tokens,
            context_window,
            usage * 100.0
        );

        if usage < self.settings.summarization_ratio {
            return;
        }

        match self.summarize(task, provider, context, token).await {
            Ok(absorbed) => info!(
                "Generated summary for task {} due to token usage ({}/{}), {} messages absorbed",
                task.id, total_tokens, context_window, absorbed
            ),
            Err(e) => error!("Error summarizing messages for task ID: {}: {:#}", task.id, e),
        }
    }

    async fn summarize(
        &self,
        task: &Task,
        provider: &dyn LLMProvider,
        context: &LlmContext,
        token: &CancellationToken,
    ) -> Result<u64> {
        let mut messages = context.messages.clone();
        messages.push(Message::user(SUMMARIZATION_INSTRUCTION));

        let response = provider
            .generate_message(
                SUMMARIZATION_SYSTEM_PROMPT,
                &messages,
                &task.model.name,
                false,
                Some(token),
            )
            .await?;

        let content = collect_text(&response.content_blocks);
        let summary = self.summaries.create(&task.id, &content).await?;
        self.messages
            .attach_summary(&summary.id, &context.source_ids)
            .await
    }

    async fn apply_directive(&self, task_id: &str, directive: &StatusDirective) -> Result<()> {
        let status = directive.status.task_status();
        info!(
            "Task {} requested status {}: {}",
            task_id, status, directive.description
        );
        self.transition(task_id, status, &directive.description).await
    }

    /// Persist a status change and announce it
    async fn transition(&self, task_id: &str, status: TaskStatus, detail: &str) -> Result<()> {
        let mut update = TaskUpdate::status(status);
        if status == TaskStatus::Completed {
            update = update.completed_at(now_secs()?);
        }
        self.tasks.update(task_id, update).await?;

        let task_id = task_id.to_string();
        let event = match status {
            TaskStatus::Completed => Event::TaskCompleted { task_id },
            TaskStatus::Failed => Event::TaskFailed {
                task_id,
                error: detail.to_string(),
            },
            TaskStatus::NeedsHelp => Event::TaskNeedsHelp {
                task_id,
                reason: detail.to_string(),
            },
            _ => return Ok(()),
        };
        self.bus.publish(event).await;
        Ok(())
    }

    async fn record(
        &self,
        task_id: &str,
        role: Role,
        content: Vec<ContentBlock>,
    ) -> Result<StoredMessage> {
        let message = self.messages.create(task_id, role, content).await?;
        self.bus
            .publish(Event::MessageCreated {
                task_id: task_id.to_string(),
                message_id: message.id.clone(),
                role: role.as_str().to_string(),
            })
            .await;
        Ok(message)
    }

    /// The task left RUNNING on its own
    async fn finish(&self, task_id: &str, generation: u64) {
        if self.state.holds(task_id, generation) {
            self.input_capture.stop().await;
        }
        self.release(task_id, generation);
    }

    /// Mark the task FAILED after an unrecoverable error
    async fn fail_task(&self, task_id: &str, generation: u64, err: &anyhow::Error) {
        error!(
            "Error during task processing iteration for task ID: {} - {:#}",
            task_id, err
        );
        if let Err(e) = self
            .transition(task_id, TaskStatus::Failed, &format!("{:#}", err))
            .await
        {
            error!("Failed to mark task {} as failed: {:#}", task_id, e);
        }
        self.release(task_id, generation);
    }

    fn release(&self, task_id: &str, generation: u64) {
        if self.state.exit(task_id, generation) {
            self.status_tx.send_replace(ProcessorStatus::Idle);
        }
    }

    /// A human takes control of the desktop.
    ///
    /// Aborts the outbound call of `task_id` if it is in flight and holds
    /// further iterations until `resume`. Input capture starts either way.
    pub async fn takeover(&self, task_id: &str) {
        info!("Task takeover event received for task ID: {}", task_id);

        if self.state.suspend(task_id) {
            self.status_tx.send_replace(ProcessorStatus::Suspended {
                task_id: task_id.to_string(),
            });
        }
        self.input_capture.start(task_id).await;
    }

    /// Control returns to the agent; iterate again right away
    pub async fn resume(&self, task_id: &str) {
        let Some(ticket) = self.state.resume(task_id) else {
            debug!("Ignoring resume for task {} that is not in flight", task_id);
            return;
        };
        info!("Task resume event received for task ID: {}", task_id);

        self.input_capture.stop().await;
        self.status_tx.send_replace(ProcessorStatus::Processing {
            task_id: task_id.to_string(),
        });
        self.post(task_id, ticket.lease);
    }

    /// Stop processing `task_id` if it is the task in flight.
    ///
    /// The task's status is left as it is.
    pub async fn cancel(&self, task_id: &str) {
        info!("Task cancel event received for task ID: {}", task_id);

        if self.state.current_task_id().as_deref() == Some(task_id) {
            self.stop().await;
        } else {
            debug!("Task {} is not in flight, nothing to cancel", task_id);
        }
    }

    /// Abort the in-flight call and release the slot
    pub async fn stop(&self) {
        let Some(task_id) = self.state.abort() else {
            return;
        };
        info!("Stopping execution of task {}", task_id);

        self.input_capture.stop().await;
        self.status_tx.send_replace(ProcessorStatus::Idle);
    }

    /// Route interrupt events from `bus` to this processor
    pub async fn listen(self: &Arc<Self>, bus: &MessageBus) -> JoinHandle<()> {
        let mut rx = bus
            .subscribe_many(&[
                EventType::TaskTakeover,
                EventType::TaskResume,
                EventType::TaskCancel,
            ])
            .await;
        let processor = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(processor) = processor.upgrade() else {
                    break;
                };
                match event {
                    Event::TaskTakeover { task_id } => processor.takeover(&task_id).await,
                    Event::TaskResume { task_id } => processor.resume(&task_id).await,
                    Event::TaskCancel { task_id } => processor.cancel(&task_id).await,
                    other => debug!("Processor ignoring {:?}", other.event_type()),
                }
            }
        })
    }
}

/// True when the error only reports a fired cancellation token
fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<LLMError>(), Some(LLMError::Interrupted))
            || cause
                .downcast_ref::<EngineError>()
                .map(EngineError::is_interrupted)
                .unwrap_or(false)
    })
}
