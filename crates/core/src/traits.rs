//! Contracts for the three pipeline roles.
//!
//! Factories in the plugin registry construct per-run instances bound to a
//! task's source/destination config; the orchestrator drives them through
//! one init → execute → transform → deliver cycle and drops them.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::record::{IngestionRecord, SourceOutcome};

/// Open config map whose keys are known per plugin type.
pub type PluginConfig = Map<String, Value>;

/// A source crawler. Full scan when the payload carries no
/// `webhook_payload`, delta sync otherwise.
#[async_trait]
pub trait Source: Send {
    /// Acquire per-run resources. Failure short-circuits the run.
    async fn init(&mut self) -> Result<(), PipelineError>;

    /// Fetch data. Missing required config keys surface here as
    /// `MissingConfig`, never at construction. Implementations must
    /// release their resources on every exit path.
    async fn execute(
        &mut self,
        cancel: CancellationToken,
        payload: &Value,
    ) -> Result<SourceOutcome, PipelineError>;
}

/// Converts raw source values into the uniform record shape.
///
/// Must be total: per-item failures are encoded as records with a non-200
/// `status_code`, never raised.
pub trait Transformer: Send + Sync {
    fn transform(&self, raw: Vec<Value>, payload: &Value) -> Vec<IngestionRecord>;
}

/// Result of a destination delivery. `processed` counts records accepted
/// before any later error, surfacing partial success.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub message: String,
    pub processed: usize,
}

/// A delivery sink for transformed records.
#[async_trait]
pub trait Destination: Send {
    async fn process_data(
        &mut self,
        records: Vec<IngestionRecord>,
    ) -> Result<DeliveryReport, PipelineError>;
}
