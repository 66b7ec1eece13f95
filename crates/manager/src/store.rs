//! In-memory store for tasks and webhook subscriptions.
//!
//! Uses `IndexMap` to preserve insertion order (newest last) while allowing
//! O(1) lookups by key. All writes for one key happen inside a single lock
//! acquisition: the closure-based `update_*` methods span the whole
//! read-modify-write, so `registered_tasks` merges are transactional and a
//! persistent replacement must keep those semantics (last-writer-wins is
//! not acceptable for set fields).

use std::sync::RwLock;

use indexmap::IndexMap;

use foerderband_core::PipelineError;

use crate::types::{Task, WebhookSubscription};

/// Shared store behind the lifecycle manager. Safe under concurrent
/// callers; reads return clones.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<IndexMap<String, Task>>,
    subscriptions: RwLock<IndexMap<String, WebhookSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.read().unwrap().get(id).cloned()
    }

    /// Insert a new task. Fails with `Conflict` if the id exists.
    pub fn save_task(&self, task: Task) -> Result<(), PipelineError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(PipelineError::Conflict(format!(
                "task '{}' already exists",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Atomic read-modify-write on one task. The closure may fail, in which
    /// case nothing is persisted.
    pub fn update_task<T, F>(&self, id: &str, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut Task) -> Result<T, PipelineError>,
    {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(format!("task '{}'", id)))?;
        let mut draft = task.clone();
        let out = f(&mut draft)?;
        *task = draft;
        Ok(out)
    }

    pub fn delete_task(&self, id: &str) -> Result<(), PipelineError> {
        self.tasks
            .write()
            .unwrap()
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::NotFound(format!("task '{}'", id)))
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.read().unwrap().values().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    // ── Webhook subscriptions ────────────────────────────────────────

    pub fn get_subscription(&self, source_identifier: &str) -> Option<WebhookSubscription> {
        self.subscriptions
            .read()
            .unwrap()
            .get(source_identifier)
            .cloned()
    }

    /// Insert or replace a subscription, keyed by its source identifier.
    pub fn save_subscription(&self, subscription: WebhookSubscription) {
        self.subscriptions
            .write()
            .unwrap()
            .insert(subscription.source_identifier.clone(), subscription);
    }

    /// Atomic read-modify-write on one subscription.
    pub fn update_subscription<T, F>(
        &self,
        source_identifier: &str,
        f: F,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut WebhookSubscription) -> Result<T, PipelineError>,
    {
        let mut subscriptions = self.subscriptions.write().unwrap();
        let entry = subscriptions.get_mut(source_identifier).ok_or_else(|| {
            PipelineError::NotFound(format!("webhook registration '{}'", source_identifier))
        })?;
        let mut draft = entry.clone();
        let out = f(&mut draft)?;
        *entry = draft;
        Ok(out)
    }

    pub fn delete_subscription(&self, source_identifier: &str) -> Result<(), PipelineError> {
        self.subscriptions
            .write()
            .unwrap()
            .shift_remove(source_identifier)
            .map(|_| ())
            .ok_or_else(|| {
                PipelineError::NotFound(format!("webhook registration '{}'", source_identifier))
            })
    }

    pub fn list_subscriptions(&self) -> Vec<WebhookSubscription> {
        self.subscriptions
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
