use proptest::prelude::*;
use pilot_engine::agent::context::plan_narrative;
use pilot_engine::agent::OrchestratorState;
use pilot_engine::conductor::{ParsedOutput, Reflection, ReflectionStatus};
use pilot_engine::config::Config;
use pilot_engine::db::{Control, ModelDescriptor, Task, TaskPriority, TaskStatus, TaskType};
use sdk::types::Role;

fn task_with_plan(plan: Vec<String>, plan_step: usize) -> Task {
    Task {
        id: "t".into(),
        description: "goal".into(),
        task_type: TaskType::Immediate,
        status: TaskStatus::Running,
        priority: TaskPriority::Medium,
        control: Control::Assistant,
        created_by: Role::User,
        model: ModelDescriptor::new("anthropic", "m"),
        plan: Some(plan),
        plan_step,
        scheduled_for: None,
        created_at: 0,
        updated_at: 0,
        completed_at: None,
    }
}

// A JSON array of strings is always taken verbatim as the plan
proptest! {
    #[test]
    fn test_plan_array_parses_verbatim(steps in prop::collection::vec(".*", 0..8)) {
        let text = serde_json::to_string(&steps).unwrap();
        prop_assert_eq!(
            ParsedOutput::<Vec<String>>::parse(&text),
            ParsedOutput::Structured(steps)
        );
    }
}

// Text that does not start like JSON is never structured
proptest! {
    #[test]
    fn test_prose_is_freeform(text in "[A-Za-z][A-Za-z0-9 ,.]*") {
        prop_assert_eq!(
            ParsedOutput::<Vec<String>>::parse(&text),
            ParsedOutput::Freeform(text.clone())
        );
        prop_assert!(ParsedOutput::<Reflection>::parse(&text).structured().is_none());
    }
}

// Only the three known verdicts are accepted
proptest! {
    #[test]
    fn test_reflection_status_closed_set(status in "[a-z]{1,10}", reason in ".*") {
        let text = serde_json::json!({"status": status, "reason": reason}).to_string();
        let parsed = ParsedOutput::<Reflection>::parse(&text).structured();

        let expected = match status.as_str() {
            "success" => Some(ReflectionStatus::Success),
            "failure" => Some(ReflectionStatus::Failure),
            "retry" => Some(ReflectionStatus::Retry),
            _ => None,
        };
        prop_assert_eq!(parsed.map(|r| r.status), expected);
    }
}

// The narrative lists every step and names the current one, 1-based
proptest! {
    #[test]
    fn test_plan_narrative_names_current_step(
        steps in prop::collection::vec("[a-z ]{1,20}", 1..6),
        cursor in 0usize..6,
    ) {
        let cursor = cursor % steps.len();
        let narrative = plan_narrative(&task_with_plan(steps.clone(), cursor));

        for (i, step) in steps.iter().enumerate() {
            let line = format!("{}. {}", i + 1, step);
            prop_assert!(narrative.contains(&line));
        }
        let current = format!("You are currently on step {}: \"{}\"", cursor + 1, steps[cursor]);
        prop_assert!(narrative.contains(&current));
    }
}

// However entries, exits and aborts interleave, at most one run holds the
// slot, and only the run that entered can release it
proptest! {
    #[test]
    fn test_single_flight_under_any_sequence(ops in prop::collection::vec((0u8..3, 0u8..3), 0..40)) {
        let state = OrchestratorState::new();
        let mut holder: Option<(String, u64)> = None;
        let mut last_generation = 0u64;

        for (op, task) in ops {
            let task_id = format!("task-{}", task);
            match op {
                0 => {
                    let ticket = state.try_enter(&task_id);
                    prop_assert_eq!(ticket.is_some(), holder.is_none());
                    if let Some(ticket) = ticket {
                        prop_assert!(ticket.lease.generation > last_generation);
                        last_generation = ticket.lease.generation;
                        holder = Some((task_id, ticket.lease.generation));
                    }
                }
                1 => {
                    // a run of this task id from any generation so far
                    let generation = last_generation.saturating_sub(u64::from(task % 2));
                    let exited = state.exit(&task_id, generation);
                    let expected = holder.as_ref() == Some(&(task_id.clone(), generation));
                    prop_assert_eq!(exited, expected);
                    if exited {
                        holder = None;
                    }
                }
                _ => {
                    prop_assert_eq!(state.abort(), holder.take().map(|(id, _)| id));
                }
            }
            prop_assert_eq!(state.current_task_id(), holder.as_ref().map(|(id, _)| id.clone()));
        }
    }
}

// Any ratio in (0, 1] with a non-zero window validates
proptest! {
    #[test]
    fn test_agent_config_bounds(ratio in 0.01..=1.0f64, window in 1u64..2_000_000) {
        let mut config = Config::default();
        config.agent.summarization_ratio = ratio;
        config.agent.default_context_window = window;
        prop_assert!(config.validate().is_ok());

        config.agent.default_context_window = 0;
        prop_assert!(config.validate().is_err());
    }
}
