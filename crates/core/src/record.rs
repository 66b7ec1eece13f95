//! Interchange types flowing between sources, transformers, and destinations.
//!
//! A source run produces a [`SourceOutcome`]; the orchestrator flattens its
//! payload into raw values, the transformer turns those into
//! [`IngestionRecord`]s, and the destination consumes the records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ── Payload keys ─────────────────────────────────────────────────────

/// Keys a source recognizes in the run payload. A payload without
/// [`WEBHOOK_PAYLOAD`] means full scan; with it, delta sync.
pub mod payload_keys {
    pub const TASK_DEFINITION: &str = "task_definition";
    pub const WEBHOOK_PAYLOAD: &str = "webhook_payload";
    pub const EXTERNAL_RESOURCE_ID: &str = "external_resource_id";
    pub const CHANGE_TYPE: &str = "change_type";
    pub const START_PAGE_TOKEN: &str = "start_page_token";
    pub const NEXT_PAGE_TOKEN: &str = "next_page_token";
    pub const OTHER_CRAWLER_TOKENS: &str = "other_crawler_specific_tokens";
    /// Added to the payload handed to transformers only, stamped after
    /// the source run completes. Sources never see it.
    pub const FETCHED_AT: &str = "fetched_at";
}

// ── IngestionRecord ──────────────────────────────────────────────────

/// One item of source data in the uniform transformer/destination shape.
///
/// A `status_code` other than 200 marks a per-item fetch failure; `content`
/// then holds the error description rather than source data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    /// Stable per source item.
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status_code: u16,
    pub fetched_at: DateTime<Utc>,
    /// Open map: file_path, change_type, mime_type, commit_sha, ...
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl IngestionRecord {
    /// A successfully fetched record.
    pub fn ok(id: impl Into<String>, content: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            url: None,
            status_code: 200,
            fetched_at,
            metadata: Map::new(),
        }
    }

    /// A per-item fetch failure, encoded instead of failing the run.
    pub fn fetch_error(
        id: impl Into<String>,
        message: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: message.into(),
            url: None,
            status_code: 500,
            fetched_at,
            metadata: Map::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status_code != 200
    }
}

/// Stable content-derived id for items that carry no natural identifier.
pub fn content_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

// ── Source outcome ───────────────────────────────────────────────────

/// Inner payload of a source run: the raw data plus any continuation
/// cursors the next run should resume from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceData {
    /// Raw records. A list is used as-is; a scalar is wrapped into a
    /// singleton by the orchestrator; absent yields the empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub other_crawler_specific_tokens: Map<String, Value>,
}

impl SourceData {
    pub fn has_cursors(&self) -> bool {
        self.start_page_token.is_some()
            || self.next_page_token.is_some()
            || !self.other_crawler_specific_tokens.is_empty()
    }
}

/// What a source run returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub success: bool,
    /// HTTP-style status for the run as a whole.
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SourceData>,
}

impl SourceOutcome {
    pub fn ok(data: SourceData) -> Self {
        Self {
            success: true,
            code: 200,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn failed(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
            data: None,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let mut record = IngestionRecord::ok("item-1", "hello", Utc::now());
        record.url = Some("https://example.com/a".to_string());
        record.metadata.insert("mime_type".into(), Value::String("text/plain".into()));

        let json = serde_json::to_string(&record).unwrap();
        let parsed: IngestionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(!parsed.is_error());
    }

    #[test]
    fn test_fetch_error_record() {
        let record = IngestionRecord::fetch_error("item-2", "connection refused", Utc::now());
        assert!(record.is_error());
        assert_eq!(record.status_code, 500);
        assert_eq!(record.content, "connection refused");
    }

    #[test]
    fn test_content_id_stable() {
        assert_eq!(content_id("same input"), content_id("same input"));
        assert_ne!(content_id("a"), content_id("b"));
        // 16 bytes hex-encoded
        assert_eq!(content_id("x").len(), 32);
    }

    #[test]
    fn test_source_data_cursors() {
        let mut data = SourceData::default();
        assert!(!data.has_cursors());
        data.next_page_token = Some("n9".to_string());
        assert!(data.has_cursors());
    }

    #[test]
    fn test_source_data_empty_serializes_compact() {
        let data = SourceData::default();
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_outcome_failed() {
        let outcome = SourceOutcome::failed(502, "remote listing failed");
        assert!(!outcome.success);
        assert_eq!(outcome.code, 502);
        assert!(outcome.data.is_none());
    }
}
