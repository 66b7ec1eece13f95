//! Webhook verification: pure functions, no I/O.
//!
//! Git-style callbacks authenticate with an HMAC-SHA256 body signature;
//! Drive-style callbacks carry a channel token header and an empty body.
//! Both paths classify the change type and extract the external resource
//! id the registry is keyed by.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use foerderband_core::PipelineError;

type HmacSha256 = Hmac<Sha256>;

// ── Service + result types ───────────────────────────────────────────

/// Which verification style a plugin type's webhooks use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookService {
    GitHub,
    GoogleDrive,
}

impl WebhookService {
    pub fn from_plugin_type(plugin_type: &str) -> Option<Self> {
        match plugin_type {
            "git-crawler" => Some(Self::GitHub),
            "googledrive-crawler" => Some(Self::GoogleDrive),
            _ => None,
        }
    }
}

/// The classified intent of a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upsert,
    Delete,
    Unknown,
}

/// Outcome of a verification pass.
///
/// `is_valid` is false when a secret was expected but the request carried
/// no signature; field extraction still succeeds so dispatch can decide.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    pub is_valid: bool,
    pub payload: Value,
    pub external_resource_id: String,
    pub change_type: ChangeType,
}

// ── Entry point ──────────────────────────────────────────────────────

/// Verify a webhook request. With `expected_secret = None` this is a
/// preliminary parse: fields are extracted, no authentication happens.
pub fn verify(
    service: WebhookService,
    headers: &HashMap<String, String>,
    body: &[u8],
    expected_secret: Option<&str>,
) -> Result<VerifiedEvent, PipelineError> {
    match service {
        WebhookService::GitHub => verify_github(headers, body, expected_secret),
        WebhookService::GoogleDrive => verify_drive(headers, expected_secret),
    }
}

/// Case-insensitive header lookup over a small map.
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ── Git-style (HMAC-SHA256) ──────────────────────────────────────────

fn verify_github(
    headers: &HashMap<String, String>,
    body: &[u8],
    expected_secret: Option<&str>,
) -> Result<VerifiedEvent, PipelineError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| PipelineError::InvalidPayload(format!("invalid JSON body: {}", e)))?;

    let mut is_valid = true;
    if let Some(secret) = expected_secret {
        let signature = header(headers, "x-hub-signature-256")
            .or_else(|| header(headers, "x-hub-signature"));
        match signature {
            // Missing signature: mark invalid but keep extracting fields.
            None => is_valid = false,
            Some(sig) => {
                let hex_digest = sig.strip_prefix("sha256=").ok_or_else(|| {
                    PipelineError::Unauthorized("unsupported signature algorithm".to_string())
                })?;
                let expected = hex::decode(hex_digest).map_err(|_| {
                    PipelineError::Unauthorized("malformed webhook signature".to_string())
                })?;
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|e| PipelineError::Internal(format!("hmac init: {}", e)))?;
                mac.update(body);
                // Constant-time comparison.
                mac.verify_slice(&expected).map_err(|_| {
                    PipelineError::Unauthorized("invalid webhook signature".to_string())
                })?;
            }
        }
    }

    let change_type = match header(headers, "x-github-event") {
        Some("push") => {
            if payload.get("deleted").and_then(Value::as_bool) == Some(true) {
                ChangeType::Delete
            } else {
                ChangeType::Upsert
            }
        }
        Some("pull_request") => ChangeType::Upsert,
        _ => ChangeType::Unknown,
    };

    let full_name = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PipelineError::InvalidPayload("missing repository.full_name".to_string())
        })?;

    Ok(VerifiedEvent {
        is_valid,
        external_resource_id: format!("https://github.com/{}", full_name),
        change_type,
        payload,
    })
}

/// Compute the `X-Hub-Signature-256` value for a body and secret.
pub fn github_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ── Drive-style (channel token) ──────────────────────────────────────

fn verify_drive(
    headers: &HashMap<String, String>,
    expected_secret: Option<&str>,
) -> Result<VerifiedEvent, PipelineError> {
    if let Some(secret) = expected_secret {
        let channel_id = header(headers, "x-goog-channel-id").unwrap_or_default();
        if channel_id != secret {
            return Err(PipelineError::Unauthorized(
                "channel token mismatch".to_string(),
            ));
        }
    }

    let resource_uri = header(headers, "x-goog-resource-uri").ok_or_else(|| {
        PipelineError::InvalidPayload("missing X-Goog-Resource-Uri header".to_string())
    })?;
    let folder_id = last_path_segment(resource_uri).ok_or_else(|| {
        PipelineError::InvalidPayload(format!(
            "no folder id in resource URI '{}'",
            resource_uri
        ))
    })?;

    let change_type = match header(headers, "x-goog-resource-state") {
        Some("exists") | Some("add") | Some("update") => ChangeType::Upsert,
        Some("not_exists") | Some("trash") => ChangeType::Delete,
        _ => ChangeType::Unknown,
    };

    // Drive notifications have an empty body; synthesize a payload from
    // the X-Goog-* headers instead.
    let mut payload = Map::new();
    for (key, value) in headers {
        if key.to_ascii_lowercase().starts_with("x-goog-") {
            payload.insert(key.to_ascii_lowercase(), Value::String(value.clone()));
        }
    }

    Ok(VerifiedEvent {
        is_valid: true,
        external_resource_id: folder_id.to_string(),
        change_type,
        payload: Value::Object(payload),
    })
}

/// Last non-empty path segment of a URI, query string stripped.
fn last_path_segment(uri: &str) -> Option<&str> {
    let path = uri.split('?').next().unwrap_or(uri);
    path.split('/').rev().find(|segment| !segment.is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────
