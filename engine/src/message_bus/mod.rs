//! Message Bus for inter-component communication
//!
//! The MessageBus carries the interrupt surface of the orchestrator
//! (`TaskTakeover`, `TaskResume`, `TaskCancel`) and the lifecycle events it
//! announces. Channels are bounded; a subscriber that falls behind loses
//! events rather than stalling the publisher.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be published on the message bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A human wants control of the desktop
    TaskTakeover,
    /// Control returns to the agent
    TaskResume,
    /// Stop working on a task
    TaskCancel,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskNeedsHelp,
    MessageCreated,
    InputCaptureStarted,
    InputCaptureStopped,
    /// Subscribe to all event types
    All,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TaskTakeover { task_id: String },
    TaskResume { task_id: String },
    TaskCancel { task_id: String },
    TaskStarted { task_id: String },
    TaskCompleted { task_id: String },
    TaskFailed { task_id: String, error: String },
    TaskNeedsHelp { task_id: String, reason: String },
    MessageCreated {
        task_id: String,
        message_id: String,
        role: String,
    },
    InputCaptureStarted { task_id: String },
    InputCaptureStopped,
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TaskTakeover { .. } => EventType::TaskTakeover,
            Event::TaskResume { .. } => EventType::TaskResume,
            Event::TaskCancel { .. } => EventType::TaskCancel,
            Event::TaskStarted { .. } => EventType::TaskStarted,
            Event::TaskCompleted { .. } => EventType::TaskCompleted,
            Event::TaskFailed { .. } => EventType::TaskFailed,
            Event::TaskNeedsHelp { .. } => EventType::TaskNeedsHelp,
            Event::MessageCreated { .. } => EventType::MessageCreated,
            Event::InputCaptureStarted { .. } => EventType::InputCaptureStarted,
            Event::InputCaptureStopped => EventType::InputCaptureStopped,
        }
    }
}

/// Message bus for pub/sub communication between components
#[derive(Clone)]
pub struct MessageBus {
    /// Map of event types to their subscribers' senders
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        self.subscribe_many(&[event_type]).await
    }

    /// Subscribe to several event types through one receiver
    pub async fn subscribe_many(&self, event_types: &[EventType]) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        for event_type in event_types {
            channels.entry(*event_type).or_default().push(tx.clone());
        }
        rx
    }

    /// Publish an event to all subscribers
    ///
    /// Delivered to subscribers of the event's type and to `All` subscribers.
    /// Never waits for a slow subscriber: a full channel drops the event for
    /// that subscriber, a closed one is pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!("Subscriber channel full, dropping {:?}", event_type);
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::TaskTakeover).await;

        bus.publish(Event::TaskTakeover {
            task_id: "task-1".to_string(),
        })
        .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received,
            Event::TaskTakeover {
                task_id: "task-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_all_event_type() {
        let bus = MessageBus::new();
        let mut rx_all = bus.subscribe(EventType::All).await;
        let mut rx_specific = bus.subscribe(EventType::TaskStarted).await;

        bus.publish(Event::TaskStarted {
            task_id: "task-3".to_string(),
        })
        .await;

        assert_eq!(rx_all.recv().await.unwrap().event_type(), EventType::TaskStarted);
        assert_eq!(
            rx_specific.recv().await.unwrap().event_type(),
            EventType::TaskStarted
        );
    }

    #[tokio::test]
    async fn test_subscribe_many_filters_types() {
        let bus = MessageBus::new();
        let mut rx = bus
            .subscribe_many(&[EventType::TaskResume, EventType::TaskCancel])
            .await;

        bus.publish(Event::TaskCompleted {
            task_id: "x".into(),
        })
        .await;
        bus.publish(Event::TaskCancel {
            task_id: "y".into(),
        })
        .await;
        bus.publish(Event::TaskResume {
            task_id: "z".into(),
        })
        .await;

        assert_eq!(rx.recv().await.unwrap().event_type(), EventType::TaskCancel);
        assert_eq!(rx.recv().await.unwrap().event_type(), EventType::TaskResume);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block_publisher() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::InputCaptureStopped).await;

        for _ in 0..CHANNEL_BUFFER_SIZE + 10 {
            bus.publish(Event::InputCaptureStopped).await;
        }

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = MessageBus::new();
        let rx = bus.subscribe(EventType::TaskFailed).await;
        drop(rx);

        bus.publish(Event::TaskFailed {
            task_id: "t".into(),
            error: "e".into(),
        })
        .await;

        let channels = bus.channels.lock().await;
        assert!(channels
            .get(&EventType::TaskFailed)
            .map(|s| s.is_empty())
            .unwrap_or(true));
    }
}
