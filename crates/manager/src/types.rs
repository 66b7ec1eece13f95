//! Type definitions for the lifecycle manager.
//!
//! Covers the task model (trigger tagged union, machine-owned status), the
//! shared webhook subscription record, and source-identifier derivation.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Plugin spec ──────────────────────────────────────────────────────

/// A plugin reference: the registered type plus its open config map.
///
/// Config keys are known per plugin type; the core only inspects them in
/// [`source_identifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub plugin_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

// ── Trigger (tagged union) ───────────────────────────────────────────

/// When a task fires. Dispatch switches on the tag, never on the presence
/// of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskTrigger {
    /// Fires only from an explicit API call.
    Manual,
    /// Evaluated against recent ticks by the cron evaluator.
    Cron { expression: String },
    /// Fires on external webhook callbacks hitting `endpoint_id`.
    Webhook {
        endpoint_id: String,
        /// Absolute callback URL handed to the provider. Falls back to the
        /// configured callback base + endpoint id when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback_url: Option<String>,
        /// Provider credentials (token, access_token, ...).
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        credentials: Map<String, Value>,
        /// Populated after first registration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_webhook_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
}

impl TaskTrigger {
    pub fn is_webhook(&self) -> bool {
        matches!(self, Self::Webhook { .. })
    }

    pub fn is_cron(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }

    /// Short tag for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cron { .. } => "cron",
            Self::Webhook { .. } => "webhook",
        }
    }
}

// ── Task status ──────────────────────────────────────────────────────

/// Machine-owned task state, never user-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Embedded result of the most recent orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    /// HTTP-style status for the run as a whole.
    pub code: u16,
    pub message: String,
    pub items_processed: u64,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn noop(message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: 200,
            message: message.into(),
            items_processed: 0,
            finished_at: Utc::now(),
        }
    }
}

// ── Task ─────────────────────────────────────────────────────────────

/// One persisted ingestion job definition plus its live status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub source: PluginSpec,
    /// Absent means results are emitted as events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PluginSpec>,
    pub trigger: TaskTrigger,
    pub current_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunSummary>,
}

impl Task {
    /// The string naming the external resource behind this task's source,
    /// if the plugin type supports one.
    pub fn source_identifier(&self) -> Option<String> {
        source_identifier(&self.source.plugin_type, &self.source.config)
    }
}

/// Creation payload: machine-owned fields are absent and assigned by the
/// manager.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: PluginSpec,
    #[serde(default)]
    pub destination: Option<PluginSpec>,
    pub trigger: TaskTrigger,
}

fn default_true() -> bool {
    true
}

/// Partial update: only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub source: Option<PluginSpec>,
    pub destination: Option<PluginSpec>,
    pub trigger: Option<TaskTrigger>,
}

// ── Webhook subscription (shared registry record) ────────────────────

/// One external subscription (a repo, a folder) and every task fanned out
/// from it. Keyed by source identifier; tasks are referenced by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub source_identifier: String,
    /// Local HTTP path segment that receives callbacks.
    pub endpoint_id: String,
    /// 20 random bytes, hex. Generated once per entry, never rotated
    /// implicitly. HMAC key for Git-style, channel token for Drive-style.
    pub secret: String,
    /// Provider-side identity, required to deregister.
    pub external_webhook_id: String,
    #[serde(default)]
    pub registered_tasks: IndexSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub other_crawler_specific_tokens: Map<String, Value>,
    /// Whether the subscription is live on the provider side.
    pub webhook_flag: bool,
}

// ── Source identifier derivation ─────────────────────────────────────

/// Derive the external-resource key from a plugin type and its config.
///
/// This is the only place that inspects plugin-specific config keys.
/// Unknown plugin types yield `None`; webhook operations then fail as
/// unsupported.
pub fn source_identifier(plugin_type: &str, config: &Map<String, Value>) -> Option<String> {
    let value = match plugin_type {
        "git-crawler" => config.get("repo_url"),
        "googledrive-crawler" => config.get("folder_id"),
        "http-crawler" => config.get("url").or_else(|| config.get("start_url")),
        _ => None,
    };
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Tests ────────────────────────────────────────────────────────────
