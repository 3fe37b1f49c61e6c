//! Context assembly for task-driving LLM calls
//!
//! Both modes produce the message list sent to the provider together with
//! the ids of the stored messages it was built from, so a summary can later
//! absorb exactly what was sent.

use crate::db::{StoredMessage, Summary, Task};
use crate::llm::Message;

/// Messages for one provider call
#[derive(Debug, Clone, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    /// Stored messages included, in order
    pub source_ids: Vec<String>,
}

impl LlmContext {
    fn push_stored(&mut self, stored: &[StoredMessage]) {
        for message in stored {
            self.messages.push(Message::from(message));
            self.source_ids.push(message.id.clone());
        }
    }
}

/// The synthesized narrative that frames the current plan step
pub fn plan_narrative(task: &Task) -> String {
    let plan = task.plan_steps();
    let steps = plan
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "The overall goal is: \"{}\"\n\n\
         Here is the plan:\n{}\n\n\
         You are currently on step {}: \"{}\"\n\
         Please perform the action(s) required to complete this step. Focus only on this step.",
        task.description,
        steps,
        task.plan_step + 1,
        task.current_step().unwrap_or_default(),
    )
}

/// Narrative followed by the last `window` unsummarized messages
pub fn plan_context(task: &Task, unsummarized: &[StoredMessage], window: usize) -> LlmContext {
    let mut context = LlmContext::default();
    context.messages.push(Message::user(plan_narrative(task)));

    let start = unsummarized.len().saturating_sub(window);
    context.push_stored(&unsummarized[start..]);
    context
}

/// Latest summary, if any, followed by every unsummarized message
pub fn reactive_context(summary: Option<&Summary>, unsummarized: &[StoredMessage]) -> LlmContext {
    let mut context = LlmContext::default();
    if let Some(summary) = summary {
        context.messages.push(Message::user(summary.content.clone()));
    }
    context.push_stored(unsummarized);
    context
}
