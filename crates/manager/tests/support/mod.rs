//! Shared fixtures for manager integration tests: a scripted source
//! plugin, a recording webhook provider, and task definition builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use foerderband_core::{Config, PipelineError, Source, SourceData, SourceOutcome};
use foerderband_manager::sources::DefaultTransformer;
use foerderband_manager::{
    EventBus, LifecycleManager, MemoryStore, PluginRegistry, PluginSpec, ProviderRegistration,
    TaskDefinition, TaskTrigger, WebhookProvider,
};

// ── Recording provider ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegisterCall {
    pub plugin_type: String,
    pub source_identifier: String,
    pub callback_url: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct DeregisterCall {
    pub plugin_type: String,
    pub external_id: String,
    pub resource_id: String,
}

/// Provider double that records every call and can be scripted to fail.
#[derive(Default)]
pub struct RecordingProvider {
    pub registers: Mutex<Vec<RegisterCall>>,
    pub deregisters: Mutex<Vec<DeregisterCall>>,
    pub fail_register: AtomicBool,
    pub fail_deregister: AtomicBool,
    /// Preset identity for the next registration; falls back to "wh-{n}".
    pub next_external_id: Mutex<Option<String>>,
    pub next_start_page_token: Mutex<Option<String>>,
    counter: AtomicU64,
}

impl RecordingProvider {
    pub fn register_count(&self) -> usize {
        self.registers.lock().unwrap().len()
    }

    pub fn deregister_count(&self) -> usize {
        self.deregisters.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookProvider for RecordingProvider {
    async fn register(
        &self,
        plugin_type: &str,
        source_identifier: &str,
        callback_url: &str,
        secret: &str,
        _credentials: &Map<String, Value>,
    ) -> Result<ProviderRegistration, PipelineError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(PipelineError::Upstream("register refused".to_string()));
        }
        self.registers.lock().unwrap().push(RegisterCall {
            plugin_type: plugin_type.to_string(),
            source_identifier: source_identifier.to_string(),
            callback_url: callback_url.to_string(),
            secret: secret.to_string(),
        });
        let external_id = self
            .next_external_id
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| format!("wh-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1));
        Ok(ProviderRegistration {
            external_id,
            start_page_token: self.next_start_page_token.lock().unwrap().take(),
        })
    }

    async fn deregister(
        &self,
        plugin_type: &str,
        external_id: &str,
        resource_id: &str,
        _credentials: &Map<String, Value>,
    ) -> Result<(), PipelineError> {
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(PipelineError::Upstream("deregister refused".to_string()));
        }
        self.deregisters.lock().unwrap().push(DeregisterCall {
            plugin_type: plugin_type.to_string(),
            external_id: external_id.to_string(),
            resource_id: resource_id.to_string(),
        });
        Ok(())
    }

    async fn verify_credentials(
        &self,
        _plugin_type: &str,
        _credentials: &Map<String, Value>,
    ) -> Result<bool, PipelineError> {
        Ok(true)
    }
}

// ── Scripted source ──────────────────────────────────────────────────

/// Source double: returns the harness-scripted outcome and records every
/// payload it was executed with.
struct ScriptedSource {
    outcome: Arc<Mutex<SourceOutcome>>,
    payloads: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Source for ScriptedSource {
    async fn init(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn execute(
        &mut self,
        _cancel: CancellationToken,
        payload: &Value,
    ) -> Result<SourceOutcome, PipelineError> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(self.outcome.lock().unwrap().clone())
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub manager: LifecycleManager,
    pub provider: Arc<RecordingProvider>,
    /// Every payload any scripted source saw, in execution order.
    pub payloads: Arc<Mutex<Vec<Value>>>,
    /// The outcome the next source execution returns.
    pub outcome: Arc<Mutex<SourceOutcome>>,
    /// Lifecycle event names, in emission order.
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn payload_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn last_payload(&self) -> Value {
        self.payloads.lock().unwrap().last().cloned().expect("no source run recorded")
    }

    pub fn set_outcome(&self, outcome: SourceOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

/// One raw item so a default run processes a single record.
pub fn single_item_outcome() -> SourceOutcome {
    SourceOutcome::ok(SourceData {
        data: Some(json!([{"id": "item-1", "content": "payload"}])),
        ..Default::default()
    })
}

pub fn harness() -> Harness {
    let provider = Arc::new(RecordingProvider::default());
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let outcome = Arc::new(Mutex::new(single_item_outcome()));

    let registry = Arc::new(PluginRegistry::new());
    for plugin_type in ["git-crawler", "googledrive-crawler", "http-crawler"] {
        let outcome = outcome.clone();
        let payloads = payloads.clone();
        registry.register_source(
            plugin_type,
            Arc::new(move |_config: &Map<String, Value>| {
                Ok(Box::new(ScriptedSource {
                    outcome: outcome.clone(),
                    payloads: payloads.clone(),
                }) as Box<dyn Source>)
            }),
            Arc::new(DefaultTransformer),
        );
    }

    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe(move |e| events.lock().unwrap().push(e.name().to_string()));
    }

    let manager = LifecycleManager::new(
        Config::from_env(),
        Arc::new(MemoryStore::new()),
        registry,
        provider.clone(),
        bus,
    );

    Harness {
        manager,
        provider,
        payloads,
        outcome,
        events,
    }
}

// ── Task definition builders ─────────────────────────────────────────

fn string_config(key: &str, value: &str) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert(key.to_string(), Value::String(value.to_string()));
    config
}

pub fn git_task(id: &str, endpoint: &str, repo_url: &str) -> TaskDefinition {
    TaskDefinition {
        id: Some(id.to_string()),
        name: format!("git sync {}", id),
        enabled: true,
        source: PluginSpec {
            plugin_type: "git-crawler".to_string(),
            config: string_config("repo_url", repo_url),
        },
        destination: None,
        trigger: TaskTrigger::Webhook {
            endpoint_id: endpoint.to_string(),
            callback_url: None,
            credentials: Map::new(),
            external_webhook_id: None,
            secret: None,
        },
    }
}

pub fn drive_task(id: &str, endpoint: &str, folder_id: &str) -> TaskDefinition {
    TaskDefinition {
        id: Some(id.to_string()),
        name: format!("drive sync {}", id),
        enabled: true,
        source: PluginSpec {
            plugin_type: "googledrive-crawler".to_string(),
            config: string_config("folder_id", folder_id),
        },
        destination: None,
        trigger: TaskTrigger::Webhook {
            endpoint_id: endpoint.to_string(),
            callback_url: None,
            credentials: Map::new(),
            external_webhook_id: None,
            secret: None,
        },
    }
}

pub fn manual_task(id: &str) -> TaskDefinition {
    TaskDefinition {
        id: Some(id.to_string()),
        name: format!("manual {}", id),
        enabled: true,
        source: PluginSpec {
            plugin_type: "http-crawler".to_string(),
            config: string_config("url", "https://example.com/feed"),
        },
        destination: None,
        trigger: TaskTrigger::Manual,
    }
}

pub fn cron_task(id: &str, expression: &str) -> TaskDefinition {
    TaskDefinition {
        id: Some(id.to_string()),
        name: format!("cron {}", id),
        enabled: true,
        source: PluginSpec {
            plugin_type: "http-crawler".to_string(),
            config: string_config("url", "https://example.com/feed"),
        },
        destination: None,
        trigger: TaskTrigger::Cron {
            expression: expression.to_string(),
        },
    }
}

// ── Header builders ──────────────────────────────────────────────────

pub fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
