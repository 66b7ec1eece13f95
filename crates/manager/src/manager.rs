//! The lifecycle manager: process-wide control plane over the task set.
//!
//! Owns the store, plugin registry, webhook provider, and event bus. Every
//! mutation of the webhook registry happens here: tasks join and leave
//! shared subscriptions through the register/deregister flows, and cursors
//! returned by source runs are merged back under the store's per-key
//! critical section.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexSet;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use foerderband_core::record::payload_keys;
use foerderband_core::{Config, PipelineError};

use crate::cron;
use crate::events::{EventBus, LifecycleEvent};
use crate::orchestrator::{CursorUpdate, Orchestrator, RunReport};
use crate::plugins::PluginRegistry;
use crate::provider::WebhookProvider;
use crate::store::MemoryStore;
use crate::types::{
    RunSummary, Task, TaskDefinition, TaskPatch, TaskStatus, TaskTrigger, WebhookSubscription,
};
use crate::verify::{self, WebhookService};

/// Singleton control plane. Constructed once at startup; all methods are
/// safe from any caller.
pub struct LifecycleManager {
    config: Config,
    store: Arc<MemoryStore>,
    registry: Arc<PluginRegistry>,
    provider: Arc<dyn WebhookProvider>,
    bus: Arc<EventBus>,
}

impl LifecycleManager {
    pub fn new(
        config: Config,
        store: Arc<MemoryStore>,
        registry: Arc<PluginRegistry>,
        provider: Arc<dyn WebhookProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            provider,
            bus,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ── Task CRUD ────────────────────────────────────────────────────

    /// Persist a new task. Webhook-triggered tasks are linked into the
    /// registry immediately; a failed external registration marks the
    /// task `Failed` and surfaces the error.
    pub async fn schedule_task(&self, def: TaskDefinition) -> Result<Task, PipelineError> {
        if !self.registry.has_source(&def.source.plugin_type) {
            return Err(PipelineError::UnsupportedSource(format!(
                "unknown source plugin type '{}'",
                def.source.plugin_type
            )));
        }

        let id = def
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let task = Task {
            id: id.clone(),
            name: def.name,
            enabled: def.enabled,
            source: def.source,
            destination: def.destination,
            trigger: def.trigger,
            current_status: TaskStatus::Scheduled,
            last_run: None,
            last_run_status: None,
        };
        self.store.save_task(task.clone())?;
        self.bus.emit(LifecycleEvent::TaskScheduled {
            task_id: id.clone(),
            name: task.name.clone(),
        });
        tracing::info!(task_id = %id, name = %task.name, trigger = task.trigger.kind(), "task scheduled");

        if task.enabled && task.trigger.is_webhook() {
            if let Err(e) = self.register_webhook(&task).await {
                let _ = self.store.update_task(&id, |t| {
                    t.current_status = TaskStatus::Failed;
                    Ok(())
                });
                return Err(e);
            }
        }

        Ok(self.store.get_task(&id).unwrap_or(task))
    }

    pub fn get_task(&self, id: &str) -> Result<Task, PipelineError> {
        self.store
            .get_task(id)
            .ok_or_else(|| PipelineError::NotFound(format!("task '{}'", id)))
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.store.list_tasks()
    }

    /// Partial update. Webhook registry links are mirrored when the
    /// trigger kind, the enabled flag, or the derived source identifier
    /// moved.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, PipelineError> {
        let before = self.get_task(id)?;
        if let Some(spec) = &patch.source {
            if !self.registry.has_source(&spec.plugin_type) {
                return Err(PipelineError::UnsupportedSource(format!(
                    "unknown source plugin type '{}'",
                    spec.plugin_type
                )));
            }
        }

        let trigger_replaced = patch.trigger.is_some();
        let after = self.store.update_task(id, |t| {
            if let Some(name) = patch.name {
                t.name = name;
            }
            if let Some(enabled) = patch.enabled {
                t.enabled = enabled;
            }
            if let Some(source) = patch.source {
                t.source = source;
            }
            if let Some(destination) = patch.destination {
                t.destination = Some(destination);
            }
            if let Some(trigger) = patch.trigger {
                t.trigger = trigger;
            }
            Ok(t.clone())
        })?;

        let sid_changed = before.source_identifier() != after.source_identifier();
        let was_active = before.enabled && before.trigger.is_webhook();
        let now_active = after.enabled && after.trigger.is_webhook();

        if was_active && (!now_active || sid_changed) {
            self.deregister_webhook(&before).await?;
        }
        if now_active && (!was_active || sid_changed) {
            if let Err(e) = self.register_webhook(&after).await {
                let _ = self.store.update_task(id, |t| {
                    t.current_status = TaskStatus::Failed;
                    Ok(())
                });
                return Err(e);
            }
        } else if now_active && trigger_replaced {
            // The patch rewrote the trigger value: restore the populated
            // subscription identity it dropped.
            if let Some(entry) = after
                .source_identifier()
                .and_then(|sid| self.store.get_subscription(&sid))
            {
                self.write_trigger_identity(id, &entry.external_webhook_id, &entry.secret)?;
            }
        }

        self.bus.emit(LifecycleEvent::TaskUpdated {
            task_id: id.to_string(),
        });
        Ok(self.store.get_task(id).unwrap_or(after))
    }

    /// No-op if already enabled.
    pub async fn enable_task(&self, id: &str) -> Result<Task, PipelineError> {
        let task = self.get_task(id)?;
        if task.enabled {
            return Ok(task);
        }
        self.update_task(
            id,
            TaskPatch {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    /// No-op if already disabled.
    pub async fn disable_task(&self, id: &str) -> Result<Task, PipelineError> {
        let task = self.get_task(id)?;
        if !task.enabled {
            return Ok(task);
        }
        self.update_task(
            id,
            TaskPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete a task. A webhook-triggered task is unlinked first; if the
    /// external deregistration fails the delete is aborted and the task
    /// retained.
    pub async fn delete_task(&self, id: &str) -> Result<(), PipelineError> {
        let task = self.get_task(id)?;
        if task.trigger.is_webhook() {
            self.deregister_webhook(&task).await?;
        }
        self.store.delete_task(id)?;
        self.bus.emit(LifecycleEvent::TaskDeleted {
            task_id: id.to_string(),
        });
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    // ── Webhook register / deregister flows ──────────────────────────

    /// Link a task into the shared subscription for its source
    /// identifier, registering externally only for the first task.
    async fn register_webhook(&self, task: &Task) -> Result<(), PipelineError> {
        let sid = task.source_identifier().ok_or_else(|| {
            PipelineError::UnsupportedSource(format!(
                "no source identifier for plugin type '{}'",
                task.source.plugin_type
            ))
        })?;
        let (endpoint_id, callback_url, credentials) = match &task.trigger {
            TaskTrigger::Webhook {
                endpoint_id,
                callback_url,
                credentials,
                ..
            } => (endpoint_id.clone(), callback_url.clone(), credentials.clone()),
            _ => {
                return Err(PipelineError::Internal(
                    "webhook registration on a non-webhook trigger".to_string(),
                ))
            }
        };

        if let Some(existing) = self.store.get_subscription(&sid) {
            // Shared subscription: join the fan-out set, no external call.
            self.store.update_subscription(&sid, |s| {
                s.registered_tasks.insert(task.id.clone());
                Ok(())
            })?;
            self.write_trigger_identity(&task.id, &existing.external_webhook_id, &existing.secret)?;
            tracing::info!(task_id = %task.id, resource = %sid, "joined existing webhook subscription");
            return Ok(());
        }

        if !self
            .provider
            .verify_credentials(&task.source.plugin_type, &credentials)
            .await?
        {
            return Err(PipelineError::Unauthorized(
                "webhook provider rejected the credentials".to_string(),
            ));
        }

        let secret = generate_secret();
        let callback = callback_url.unwrap_or_else(|| {
            format!(
                "{}/{}",
                self.config.webhook.callback_base.trim_end_matches('/'),
                endpoint_id.trim_start_matches('/')
            )
        });
        let registration = self
            .provider
            .register(
                &task.source.plugin_type,
                &sid,
                &callback,
                &secret,
                &credentials,
            )
            .await?;

        let mut registered_tasks = IndexSet::new();
        registered_tasks.insert(task.id.clone());
        self.store.save_subscription(WebhookSubscription {
            source_identifier: sid.clone(),
            endpoint_id: endpoint_id.trim_start_matches('/').to_string(),
            secret: secret.clone(),
            external_webhook_id: registration.external_id.clone(),
            registered_tasks,
            start_page_token: registration.start_page_token,
            next_page_token: None,
            other_crawler_specific_tokens: Map::new(),
            webhook_flag: true,
        });
        self.write_trigger_identity(&task.id, &registration.external_id, &secret)?;
        tracing::info!(task_id = %task.id, resource = %sid, webhook_id = %registration.external_id, "webhook registered");
        Ok(())
    }

    /// Remove a task from its subscription; the last task out deregisters
    /// externally and deletes the entry. On external failure the task is
    /// restored into the set and the error surfaced.
    async fn deregister_webhook(&self, task: &Task) -> Result<(), PipelineError> {
        let Some(sid) = task.source_identifier() else {
            return Ok(());
        };
        if self.store.get_subscription(&sid).is_none() {
            return Ok(());
        }

        let remaining = self.store.update_subscription(&sid, |s| {
            s.registered_tasks.shift_remove(&task.id);
            Ok(s.registered_tasks.len())
        })?;
        if remaining > 0 {
            tracing::info!(task_id = %task.id, resource = %sid, remaining, "left shared webhook subscription");
            return Ok(());
        }

        let Some(entry) = self.store.get_subscription(&sid) else {
            return Ok(());
        };
        let credentials = match &task.trigger {
            TaskTrigger::Webhook { credentials, .. } => credentials.clone(),
            _ => Map::new(),
        };
        match self
            .provider
            .deregister(
                &task.source.plugin_type,
                &entry.external_webhook_id,
                &sid,
                &credentials,
            )
            .await
        {
            Ok(()) => {
                let _ = self.store.delete_subscription(&sid);
                tracing::info!(resource = %sid, webhook_id = %entry.external_webhook_id, "webhook deregistered");
                Ok(())
            }
            Err(e) => {
                let _ = self.store.update_subscription(&sid, |s| {
                    s.registered_tasks.insert(task.id.clone());
                    Ok(())
                });
                Err(e)
            }
        }
    }

    fn write_trigger_identity(
        &self,
        task_id: &str,
        external_id: &str,
        secret: &str,
    ) -> Result<(), PipelineError> {
        self.store.update_task(task_id, |t| {
            if let TaskTrigger::Webhook {
                external_webhook_id,
                secret: trigger_secret,
                ..
            } = &mut t.trigger
            {
                *external_webhook_id = Some(external_id.to_string());
                *trigger_secret = Some(secret.to_string());
            }
            Ok(())
        })
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Explicit API trigger. Disabled tasks are rejected with 403.
    pub async fn trigger_manual(
        &self,
        id: &str,
        payload: Option<Value>,
    ) -> Result<RunSummary, PipelineError> {
        let task = self.get_task(id)?;
        if !task.enabled {
            return Err(PipelineError::Forbidden(format!(
                "task '{}' is disabled",
                id
            )));
        }
        let initial = self.build_payload(&task, payload);
        let report = self.run_task(&task, initial, "manual", None).await?;
        Ok(report.summary)
    }

    /// Webhook ingress dispatch. Returns the first surviving task's run
    /// summary; the rest still fire in receipt order.
    pub async fn trigger_webhook(
        &self,
        endpoint_id: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<RunSummary, PipelineError> {
        let endpoint = endpoint_id.trim_start_matches('/');
        let matching: Vec<Task> = self
            .store
            .list_tasks()
            .into_iter()
            .filter(|t| t.enabled)
            .filter(|t| {
                matches!(&t.trigger, TaskTrigger::Webhook { endpoint_id: e, .. }
                    if e.trim_start_matches('/') == endpoint)
            })
            .collect();
        if matching.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no enabled task for endpoint '{}'",
                endpoint
            )));
        }

        let plugin_type = matching[0].source.plugin_type.clone();
        let service = WebhookService::from_plugin_type(&plugin_type).ok_or_else(|| {
            PipelineError::UnsupportedSource(format!(
                "plugin type '{}' does not accept webhooks",
                plugin_type
            ))
        })?;

        // Preliminary parse: extract the resource id, no secret checking.
        let preliminary = verify::verify(service, headers, body, None)?;

        let Some(entry) = self
            .store
            .get_subscription(&preliminary.external_resource_id)
        else {
            tracing::info!(
                resource = %preliminary.external_resource_id,
                "webhook for resource without subscription"
            );
            return Ok(RunSummary::noop("no subscription for resource"));
        };

        // Authenticated pass with the subscription's shared secret.
        let verified = verify::verify(service, headers, body, Some(&entry.secret))?;
        if !verified.is_valid {
            return Err(PipelineError::Unauthorized(
                "missing webhook signature".to_string(),
            ));
        }

        let survivors: Vec<Task> = matching
            .into_iter()
            .filter(|t| entry.registered_tasks.contains(&t.id))
            .collect();
        if survivors.is_empty() {
            return Ok(RunSummary::noop("no registered task for subscription"));
        }

        let mut first: Option<RunSummary> = None;
        for task in &survivors {
            // Re-read the entry so later tasks see cursors written back by
            // earlier runs.
            let entry = self
                .store
                .get_subscription(&preliminary.external_resource_id)
                .unwrap_or_else(|| entry.clone());

            let mut map = Map::new();
            map.insert(
                payload_keys::TASK_DEFINITION.to_string(),
                serde_json::to_value(task).unwrap_or(Value::Null),
            );
            map.insert(
                payload_keys::WEBHOOK_PAYLOAD.to_string(),
                verified.payload.clone(),
            );
            map.insert(
                payload_keys::EXTERNAL_RESOURCE_ID.to_string(),
                Value::String(entry.source_identifier.clone()),
            );
            map.insert(
                payload_keys::CHANGE_TYPE.to_string(),
                serde_json::to_value(verified.change_type).unwrap_or(Value::Null),
            );
            insert_cursors(&mut map, &entry);

            let summary = match self.run_task(task, Value::Object(map), "webhook", None).await {
                Ok(report) => report.summary,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "webhook fan-out run rejected");
                    RunSummary {
                        success: false,
                        code: e.status_code(),
                        message: e.to_string(),
                        items_processed: 0,
                        finished_at: Utc::now(),
                    }
                }
            };
            if first.is_none() {
                first = Some(summary);
            }
        }
        Ok(first.unwrap_or_else(|| RunSummary::noop("no registered task for subscription")))
    }

    /// Cron dispatch entry point, invoked by an external tick source. The
    /// process owns no timer.
    pub async fn trigger_all_enabled_cron_tasks(
        &self,
        event_time: Option<DateTime<Utc>>,
    ) -> Vec<(String, RunSummary)> {
        let now = event_time.unwrap_or_else(Utc::now);
        let window = Duration::seconds(self.config.cron.window_secs as i64);

        let mut results = Vec::new();
        for task in self.store.list_tasks() {
            if !task.enabled {
                continue;
            }
            let TaskTrigger::Cron { expression } = &task.trigger else {
                continue;
            };
            let schedule = match cron::parse_cron(expression) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        cron = %expression,
                        error = %e,
                        "invalid cron expression — skipping"
                    );
                    continue;
                }
            };
            let Some(moment) = cron::due_at(&schedule, now, window, task.last_run) else {
                continue;
            };

            tracing::info!(task_id = %task.id, moment = %moment, "cron task due");
            let payload = self.build_payload(&task, None);
            let summary = match self.run_task(&task, payload, "cron", Some(moment)).await {
                Ok(report) => report.summary,
                Err(e) => RunSummary {
                    success: false,
                    code: e.status_code(),
                    message: e.to_string(),
                    items_processed: 0,
                    finished_at: Utc::now(),
                },
            };
            results.push((task.id.clone(), summary));
        }
        results
    }

    // ── Run plumbing ─────────────────────────────────────────────────

    /// Execute one orchestrator run under the per-task run lock, then
    /// persist status, last-run bookkeeping, and returned cursors.
    async fn run_task(
        &self,
        task: &Task,
        payload: Value,
        kind: &'static str,
        consumed_moment: Option<DateTime<Utc>>,
    ) -> Result<RunReport, PipelineError> {
        // `Running` doubles as the lock: at most one active run per id.
        self.store.update_task(&task.id, |t| {
            if t.current_status == TaskStatus::Running {
                return Err(PipelineError::Conflict(format!(
                    "task '{}' is already running",
                    t.id
                )));
            }
            t.current_status = TaskStatus::Running;
            Ok(())
        })?;
        self.bus.emit(LifecycleEvent::TaskTriggered {
            task_id: task.id.clone(),
            trigger: kind,
        });

        let orchestrator = Orchestrator::new(self.registry.clone(), self.bus.clone());
        let report = orchestrator
            .run(task, payload, CancellationToken::new())
            .await;

        let summary = report.summary.clone();
        // Cron runs record the consumed scheduled moment so a slot never
        // fires twice; other runs record wall clock.
        let last_run = consumed_moment.unwrap_or_else(Utc::now);
        let _ = self.store.update_task(&task.id, |t| {
            t.current_status = if summary.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            t.last_run = Some(last_run);
            t.last_run_status = Some(summary.clone());
            Ok(())
        });

        self.write_back_cursors(task, &report.cursors);
        Ok(report)
    }

    /// Payload for manual/cron runs: the caller's payload (if any) plus
    /// the task definition and any stored cursors for its resource.
    fn build_payload(&self, task: &Task, base: Option<Value>) -> Value {
        let mut map = match base {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };
        map.insert(
            payload_keys::TASK_DEFINITION.to_string(),
            serde_json::to_value(task).unwrap_or(Value::Null),
        );
        if let Some(entry) = task
            .source_identifier()
            .and_then(|sid| self.store.get_subscription(&sid))
        {
            insert_cursors(&mut map, &entry);
        }
        Value::Object(map)
    }

    /// Merge cursors a run produced into the registry entry. Webhook
    /// tasks without an entry get a minimal one to hold the tokens.
    fn write_back_cursors(&self, task: &Task, cursors: &CursorUpdate) {
        if cursors.is_empty() {
            return;
        }
        let Some(sid) = task.source_identifier() else {
            return;
        };

        let merged = self.store.update_subscription(&sid, |s| {
            if let Some(token) = &cursors.start_page_token {
                s.start_page_token = Some(token.clone());
            }
            if let Some(token) = &cursors.next_page_token {
                s.next_page_token = Some(token.clone());
            }
            for (key, value) in &cursors.other_crawler_specific_tokens {
                s.other_crawler_specific_tokens
                    .insert(key.clone(), value.clone());
            }
            Ok(())
        });
        if merged.is_ok() {
            return;
        }

        // No entry yet: only webhook-triggered tasks get a minimal one.
        if let TaskTrigger::Webhook {
            endpoint_id,
            external_webhook_id,
            secret,
            ..
        } = &task.trigger
        {
            let mut registered_tasks = IndexSet::new();
            registered_tasks.insert(task.id.clone());
            self.store.save_subscription(WebhookSubscription {
                source_identifier: sid,
                endpoint_id: endpoint_id.trim_start_matches('/').to_string(),
                secret: secret.clone().unwrap_or_default(),
                external_webhook_id: external_webhook_id.clone().unwrap_or_default(),
                registered_tasks,
                start_page_token: cursors.start_page_token.clone(),
                next_page_token: cursors.next_page_token.clone(),
                other_crawler_specific_tokens: cursors.other_crawler_specific_tokens.clone(),
                webhook_flag: external_webhook_id.is_some(),
            });
        }
    }
}

/// Copy a subscription's cursors into a run payload.
fn insert_cursors(map: &mut Map<String, Value>, entry: &WebhookSubscription) {
    if let Some(token) = &entry.start_page_token {
        map.insert(
            payload_keys::START_PAGE_TOKEN.to_string(),
            Value::String(token.clone()),
        );
    }
    if let Some(token) = &entry.next_page_token {
        map.insert(
            payload_keys::NEXT_PAGE_TOKEN.to_string(),
            Value::String(token.clone()),
        );
    }
    if !entry.other_crawler_specific_tokens.is_empty() {
        map.insert(
            payload_keys::OTHER_CRAWLER_TOKENS.to_string(),
            Value::Object(entry.other_crawler_specific_tokens.clone()),
        );
    }
}

/// 20 random bytes, hex-encoded. One secret per subscription, generated at
/// first registration and never rotated implicitly.
fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Tests ────────────────────────────────────────────────────────────
