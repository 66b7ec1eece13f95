//! Built-in plugins: a single-URL HTTP source, the default transformer,
//! and an event-log destination.
//!
//! Real crawlers live outside the control plane; these give the registry a
//! working plugin set out of the box and double as the reference
//! implementations of the pipeline contracts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use foerderband_core::record::payload_keys;
use foerderband_core::{
    content_id, DeliveryReport, Destination, IngestionRecord, PipelineError, PluginConfig, Source,
    SourceData, SourceOutcome, Transformer,
};

use crate::plugins::PluginRegistry;

// ── HTTP source ──────────────────────────────────────────────────────

/// Fetches one URL per run. Config: `url` (or `start_url`), optional
/// `timeout_secs`.
pub struct HttpCrawlerSource {
    config: PluginConfig,
    client: Option<reqwest::Client>,
}

impl HttpCrawlerSource {
    pub fn new(config: &PluginConfig) -> Self {
        Self {
            config: config.clone(),
            client: None,
        }
    }

    fn url(&self) -> Result<&str, PipelineError> {
        self.config
            .get("url")
            .or_else(|| self.config.get("start_url"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::MissingConfig("url".to_string()))
    }
}

#[async_trait]
impl Source for HttpCrawlerSource {
    async fn init(&mut self) -> Result<(), PipelineError> {
        let timeout = self
            .config
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(30);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent("foerderband")
            .build()
            .map_err(|e| PipelineError::Internal(format!("http client: {}", e)))?;
        self.client = Some(client);
        Ok(())
    }

    async fn execute(
        &mut self,
        cancel: CancellationToken,
        payload: &Value,
    ) -> Result<SourceOutcome, PipelineError> {
        // Config is validated at execute time, never at construction.
        let url = self.url()?.to_string();
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PipelineError::Internal("source not initialized".to_string()))?;

        let delta = payload.get(payload_keys::WEBHOOK_PAYLOAD).is_some();
        tracing::debug!(url = %url, delta, "http source fetching");

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(PipelineError::Internal("fetch cancelled".to_string()));
            }
            response = client.get(&url).send() => response,
        };

        // A failed fetch is a 500-status record, not a run failure.
        let item = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => json!({
                        "id": url,
                        "url": url,
                        "status_code": status,
                        "content": body,
                    }),
                    Err(e) => json!({
                        "id": url,
                        "url": url,
                        "status_code": 500,
                        "content": format!("failed to read body: {}", e),
                    }),
                }
            }
            Err(e) => json!({
                "id": url,
                "url": url,
                "status_code": 500,
                "content": format!("fetch failed: {}", e),
            }),
        };

        Ok(SourceOutcome::ok(SourceData {
            data: Some(Value::Array(vec![item])),
            ..Default::default()
        }))
    }
}

// ── Default transformer ──────────────────────────────────────────────

/// Total mapping from raw source values to [`IngestionRecord`]s.
///
/// Objects map field-for-field (`id`, `content`, `url`, `status_code`,
/// anything else lands in metadata); strings become 200-records keyed by a
/// content hash; anything else is serialized and likewise hashed.
pub struct DefaultTransformer;

impl Transformer for DefaultTransformer {
    fn transform(&self, raw: Vec<Value>, payload: &Value) -> Vec<IngestionRecord> {
        let fetched_at = payload
            .get(payload_keys::FETCHED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        raw.into_iter()
            .map(|item| transform_item(item, fetched_at))
            .collect()
    }
}

fn transform_item(item: Value, fetched_at: DateTime<Utc>) -> IngestionRecord {
    match item {
        Value::Object(mut fields) => {
            let content = match fields.remove("content") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let id = fields
                .remove("id")
                .and_then(|v| v.as_str().map(str::to_string))
                .or_else(|| {
                    fields
                        .get("url")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| content_id(&content));
            let url = fields
                .remove("url")
                .and_then(|v| v.as_str().map(str::to_string));
            let status_code = fields
                .remove("status_code")
                .and_then(|v| v.as_u64())
                .map(|c| c as u16)
                .unwrap_or(200);

            IngestionRecord {
                id,
                content,
                url,
                status_code,
                fetched_at,
                metadata: fields,
            }
        }
        Value::String(s) => IngestionRecord::ok(content_id(&s), s, fetched_at),
        other => {
            let content = other.to_string();
            IngestionRecord::ok(content_id(&content), content, fetched_at)
        }
    }
}

// ── Event-log destination ────────────────────────────────────────────

/// Logs delivered batches; the reference sink for demos and tests.
pub struct LogDestination {
    label: String,
}

impl LogDestination {
    pub fn new(config: &PluginConfig) -> Self {
        let label = config
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("event-log")
            .to_string();
        Self { label }
    }
}

#[async_trait]
impl Destination for LogDestination {
    async fn process_data(
        &mut self,
        records: Vec<IngestionRecord>,
    ) -> Result<DeliveryReport, PipelineError> {
        let errors = records.iter().filter(|r| r.is_error()).count();
        tracing::info!(
            destination = %self.label,
            records = records.len(),
            errors,
            "batch delivered"
        );
        Ok(DeliveryReport {
            success: true,
            message: format!("{} records logged", records.len()),
            processed: records.len(),
        })
    }
}

// ── Registry wiring ──────────────────────────────────────────────────

/// Register the built-in plugins on a registry.
pub fn register_builtin_plugins(registry: &PluginRegistry) {
    registry.register_source(
        "http-crawler",
        Arc::new(|config: &PluginConfig| {
            Ok(Box::new(HttpCrawlerSource::new(config)) as Box<dyn Source>)
        }),
        Arc::new(DefaultTransformer),
    );
    registry.register_destination(
        "event-log",
        Arc::new(|config: &PluginConfig| {
            Ok(Box::new(LogDestination::new(config)) as Box<dyn Destination>)
        }),
    );
}

// ── Tests ────────────────────────────────────────────────────────────
