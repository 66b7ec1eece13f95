//! One-shot pipeline execution for a single task invocation.
//!
//! Drives source init → execute → flatten → transform → deliver, emitting
//! stage events along the way. Every failure from a pipeline role is
//! caught and converted into a failed [`RunSummary`] plus a `TaskFailed`
//! event; the orchestrator itself never propagates stage errors.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use foerderband_core::record::payload_keys;
use foerderband_core::{PipelineError, SourceData};

use crate::events::{EventBus, LifecycleEvent};
use crate::plugins::PluginRegistry;
use crate::types::{RunSummary, Task};

/// Continuation cursors a run produced, for registry write-back.
#[derive(Debug, Clone, Default)]
pub struct CursorUpdate {
    pub start_page_token: Option<String>,
    pub next_page_token: Option<String>,
    pub other_crawler_specific_tokens: Map<String, Value>,
}

impl CursorUpdate {
    pub fn is_empty(&self) -> bool {
        self.start_page_token.is_none()
            && self.next_page_token.is_none()
            && self.other_crawler_specific_tokens.is_empty()
    }

    fn from_data(data: &SourceData) -> Self {
        Self {
            start_page_token: data.start_page_token.clone(),
            next_page_token: data.next_page_token.clone(),
            other_crawler_specific_tokens: data.other_crawler_specific_tokens.clone(),
        }
    }
}

/// What one pipeline run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub cursors: CursorUpdate,
}

/// One instance per task invocation.
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    /// Execute the pipeline for `task`. Cancellation aborts the source
    /// call and short-circuits the remaining stages into a failure.
    pub async fn run(
        &self,
        task: &Task,
        initial_payload: Value,
        cancel: CancellationToken,
    ) -> RunReport {
        let start = Instant::now();
        let report = match self.run_stages(task, initial_payload, cancel).await {
            Ok(report) => report,
            Err(e) => RunReport {
                summary: RunSummary {
                    success: false,
                    code: e.status_code(),
                    message: e.to_string(),
                    items_processed: 0,
                    finished_at: Utc::now(),
                },
                cursors: CursorUpdate::default(),
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if report.summary.success {
            self.bus.emit(LifecycleEvent::TaskCompleted {
                task_id: task.id.clone(),
                items_processed: report.summary.items_processed,
                duration_ms,
            });
            tracing::info!(
                task_id = %task.id,
                items = report.summary.items_processed,
                duration_ms,
                "task run completed"
            );
        } else {
            self.bus.emit(LifecycleEvent::TaskFailed {
                task_id: task.id.clone(),
                code: report.summary.code,
                error: report.summary.message.clone(),
            });
            tracing::error!(
                task_id = %task.id,
                code = report.summary.code,
                error = %report.summary.message,
                "task run failed"
            );
        }
        report
    }

    async fn run_stages(
        &self,
        task: &Task,
        initial_payload: Value,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let (source_factory, transformer) = self
            .registry
            .lookup_source(&task.source.plugin_type)
            .ok_or_else(|| {
                PipelineError::UnsupportedSource(task.source.plugin_type.clone())
            })?;

        let mut source = source_factory(&task.source.config)?;
        source.init().await?;

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(PipelineError::Internal("run cancelled".to_string()));
            }
            outcome = source.execute(cancel.clone(), &initial_payload) => outcome?,
        };

        if !outcome.success {
            return Err(PipelineError::Upstream(format!(
                "source returned {}: {}",
                outcome.code, outcome.message
            )));
        }

        let cursors = outcome
            .data
            .as_ref()
            .map(CursorUpdate::from_data)
            .unwrap_or_default();

        let raw = flatten_source_data(&task.id, outcome.data.as_ref());
        self.bus.emit(LifecycleEvent::DataFetched {
            task_id: task.id.clone(),
            raw_count: raw.len(),
        });

        // The transformer gets the payload augmented with the fetch
        // timestamp, stamped after the source finished so every record of
        // one run shares it.
        let payload = with_fetched_at(initial_payload);
        let records = transformer.transform(raw, &payload);
        self.bus.emit(LifecycleEvent::DataTransformed {
            task_id: task.id.clone(),
            record_count: records.len(),
        });

        let record_count = records.len();
        let (delivered, message) = match &task.destination {
            Some(spec) => {
                let destination_factory =
                    self.registry.lookup_destination(&spec.plugin_type).ok_or_else(|| {
                        PipelineError::UnsupportedSource(format!(
                            "no destination plugin '{}'",
                            spec.plugin_type
                        ))
                    })?;
                let mut destination = destination_factory(&spec.config)?;
                let report = destination.process_data(records).await?;
                if !report.success {
                    // Records accepted before the error still count; the
                    // cursors the source produced still get written back.
                    return Ok(RunReport {
                        summary: RunSummary {
                            success: false,
                            code: 502,
                            message: format!("destination rejected batch: {}", report.message),
                            items_processed: report.processed as u64,
                            finished_at: Utc::now(),
                        },
                        cursors,
                    });
                }
                (report.processed, report.message)
            }
            None => (
                record_count,
                "no destination configured; records emitted as events".to_string(),
            ),
        };

        self.bus.emit(LifecycleEvent::DataProcessed {
            task_id: task.id.clone(),
            delivered,
            message: message.clone(),
        });

        Ok(RunReport {
            summary: RunSummary {
                success: true,
                code: 200,
                message,
                items_processed: delivered as u64,
                finished_at: Utc::now(),
            },
            cursors,
        })
    }
}

/// Augment the run payload with the wall-clock fetch timestamp.
fn with_fetched_at(payload: Value) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    map.insert(
        payload_keys::FETCHED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    Value::Object(map)
}

/// The lenient flattening rule: a list under `data.data` is used directly,
/// a scalar is wrapped into a singleton, absent data yields the empty list
/// with a warning.
fn flatten_source_data(task_id: &str, data: Option<&SourceData>) -> Vec<Value> {
    match data.and_then(|d| d.data.clone()) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => {
            tracing::warn!(task_id = %task_id, "source returned no data");
            Vec::new()
        }
        Some(scalar) => vec![scalar],
    }
}

// ── Tests ────────────────────────────────────────────────────────────
