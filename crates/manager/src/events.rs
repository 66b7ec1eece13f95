//! Lifecycle event payloads and the in-process bus.
//!
//! Fan-out is synchronous, listeners run in registration order, and a
//! panicking listener never aborts the emitting run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use serde::Serialize;

// ── Event payloads ───────────────────────────────────────────────────

/// Everything the control plane announces about a task's life.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TaskScheduled { task_id: String, name: String },
    TaskUpdated { task_id: String },
    TaskDeleted { task_id: String },
    TaskTriggered { task_id: String, trigger: &'static str },
    DataFetched { task_id: String, raw_count: usize },
    DataTransformed { task_id: String, record_count: usize },
    DataProcessed { task_id: String, delivered: usize, message: String },
    TaskCompleted { task_id: String, items_processed: u64, duration_ms: u64 },
    TaskFailed { task_id: String, code: u16, error: String },
}

impl LifecycleEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskScheduled { task_id, .. }
            | Self::TaskUpdated { task_id }
            | Self::TaskDeleted { task_id }
            | Self::TaskTriggered { task_id, .. }
            | Self::DataFetched { task_id, .. }
            | Self::DataTransformed { task_id, .. }
            | Self::DataProcessed { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskScheduled { .. } => "task_scheduled",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::TaskTriggered { .. } => "task_triggered",
            Self::DataFetched { .. } => "data_fetched",
            Self::DataTransformed { .. } => "data_transformed",
            Self::DataProcessed { .. } => "data_processed",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
        }
    }
}

// ── Bus ──────────────────────────────────────────────────────────────

type Listener = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Synchronous in-process pub/sub. Append-only from the manager's side.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.listeners.write().unwrap().push(Box::new(listener));
    }

    /// Deliver to every listener in registration order. Panics are logged
    /// and swallowed.
    pub fn emit(&self, event: LifecycleEvent) {
        tracing::debug!(
            event = event.name(),
            task_id = %event.task_id(),
            "lifecycle event"
        );
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(
                    event = event.name(),
                    task_id = %event.task_id(),
                    "event listener panicked"
                );
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
