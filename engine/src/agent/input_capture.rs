//! Live input forwarding during a human takeover

use crate::message_bus::{Event, MessageBus};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

/// Forwards a human's live input for a task while they hold control
#[async_trait]
pub trait InputCapture: Send + Sync {
    async fn start(&self, task_id: &str);
    async fn stop(&self);
}

/// Announces capture on the message bus and tracks the captured task
pub struct BusInputCapture {
    bus: MessageBus,
    active: Mutex<Option<String>>,
}

impl BusInputCapture {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            active: Mutex::new(None),
        }
    }

    pub async fn active_task(&self) -> Option<String> {
        self.active.lock().await.clone()
    }
}

#[async_trait]
impl InputCapture for BusInputCapture {
    async fn start(&self, task_id: &str) {
        let mut active = self.active.lock().await;
        if active.as_deref() == Some(task_id) {
            return;
        }
        info!("Capturing user input for task ID: {}", task_id);
        *active = Some(task_id.to_string());
        self.bus
            .publish(Event::InputCaptureStarted {
                task_id: task_id.to_string(),
            })
            .await;
    }

    async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(task_id) = active.take() {
            info!("Stopped capturing user input for task ID: {}", task_id);
            self.bus.publish(Event::InputCaptureStopped).await;
        }
    }
}
