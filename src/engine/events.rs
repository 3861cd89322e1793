// src/engine/events.rs

//! In-process lifecycle notifications.
//!
//! Events are published only after the corresponding store transaction has
//! committed. They are best-effort: a subscriber that lags behind the channel
//! capacity misses events, and publishing with no subscribers is a no-op.

use tokio::sync::broadcast;
use tracing::trace;

use crate::state::WorkflowStatus;
use crate::types::{TaskId, TenantId, WorkerId, WorkflowId};

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    CoordinatorStarted {
        tenant: TenantId,
    },
    CoordinatorStopped {
        tenant: TenantId,
    },
    WorkflowStarted {
        workflow_id: WorkflowId,
        workflow_type: String,
        tenant: TenantId,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        workflow_type: String,
        status: WorkflowStatus,
        tenant: TenantId,
    },
    /// A dispatched task was force-failed because its execution could not
    /// be started or crashed before recording an outcome.
    TaskDispatchFailed {
        task_id: TaskId,
        workflow_id: WorkflowId,
        worker_id: WorkerId,
        error: String,
    },
    /// One coordination iteration failed; the loop keeps going.
    LoopError {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: CoordinatorEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_published_after_subscribing() {
        let bus = EventBus::new(8);
        bus.publish(CoordinatorEvent::LoopError {
            message: "nobody listening".into(),
        });

        let mut rx = bus.subscribe();
        bus.publish(CoordinatorEvent::CoordinatorStarted {
            tenant: "t".into(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            CoordinatorEvent::CoordinatorStarted {
                tenant: "t".into()
            }
        );
    }
}
