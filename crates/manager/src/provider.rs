//! External webhook subscription management.
//!
//! [`WebhookProvider`] is the contract the lifecycle manager consumes;
//! [`HttpWebhookProvider`] is the reqwest-backed adapter speaking the
//! GitHub hooks API and the Drive changes API. The manager guarantees it
//! never registers the same source identifier twice, so adapters need not
//! be idempotent themselves.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use foerderband_core::PipelineError;

// ── Contract ─────────────────────────────────────────────────────────

/// What a successful registration hands back.
#[derive(Debug, Clone)]
pub struct ProviderRegistration {
    /// Provider-side identity, required to deregister later.
    pub external_id: String,
    /// Drive-style continuation cursor captured at subscription time.
    pub start_page_token: Option<String>,
}

/// Adapter to the external services that deliver webhooks.
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn register(
        &self,
        plugin_type: &str,
        source_identifier: &str,
        callback_url: &str,
        secret: &str,
        credentials: &Map<String, Value>,
    ) -> Result<ProviderRegistration, PipelineError>;

    /// `external_id` is always the provider webhook identity and
    /// `resource_id` the source identifier, on every path.
    async fn deregister(
        &self,
        plugin_type: &str,
        external_id: &str,
        resource_id: &str,
        credentials: &Map<String, Value>,
    ) -> Result<(), PipelineError>;

    async fn verify_credentials(
        &self,
        plugin_type: &str,
        credentials: &Map<String, Value>,
    ) -> Result<bool, PipelineError>;
}

// ── HTTP adapter ─────────────────────────────────────────────────────

const GITHUB_API: &str = "https://api.github.com";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

/// reqwest-backed provider adapter with a bounded request timeout.
pub struct HttpWebhookProvider {
    client: reqwest::Client,
}

impl HttpWebhookProvider {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("foerderband")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn credential<'a>(
        credentials: &'a Map<String, Value>,
        key: &str,
    ) -> Result<&'a str, PipelineError> {
        credentials
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Unauthorized(format!("missing credential '{}'", key)))
    }

    /// "https://github.com/owner/repo" → "owner/repo".
    fn github_repo_path(source_identifier: &str) -> Result<&str, PipelineError> {
        source_identifier
            .strip_prefix("https://github.com/")
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                PipelineError::UnsupportedSource(format!(
                    "not a GitHub repository URL: {}",
                    source_identifier
                ))
            })
    }

    async fn register_github(
        &self,
        source_identifier: &str,
        callback_url: &str,
        secret: &str,
        credentials: &Map<String, Value>,
    ) -> Result<ProviderRegistration, PipelineError> {
        let token = Self::credential(credentials, "token")?;
        let repo = Self::github_repo_path(source_identifier)?;

        let response = self
            .client
            .post(format!("{}/repos/{}/hooks", GITHUB_API, repo))
            .bearer_auth(token)
            .json(&json!({
                "name": "web",
                "active": true,
                "events": ["push", "pull_request"],
                "config": {
                    "url": callback_url,
                    "content_type": "json",
                    "secret": secret,
                },
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("github hook create: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "github hook create returned {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Upstream(format!("github hook response: {}", e)))?;
        let hook_id = body
            .get("id")
            .map(|id| id.to_string())
            .ok_or_else(|| PipelineError::Upstream("github hook response missing id".into()))?;

        Ok(ProviderRegistration {
            external_id: hook_id,
            start_page_token: None,
        })
    }

    async fn register_drive(
        &self,
        source_identifier: &str,
        callback_url: &str,
        secret: &str,
        credentials: &Map<String, Value>,
    ) -> Result<ProviderRegistration, PipelineError> {
        let token = Self::credential(credentials, "access_token")?;

        // Capture the change cursor first so the first delta sync starts
        // from subscription time.
        let response = self
            .client
            .get(format!("{}/changes/startPageToken", DRIVE_API))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("drive startPageToken: {}", e)))?;
        if !response.status().is_success() {
            return Err(PipelineError::Upstream(format!(
                "drive startPageToken returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Upstream(format!("drive startPageToken body: {}", e)))?;
        let start_page_token = body
            .get("startPageToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        let page_token = start_page_token.clone().unwrap_or_else(|| "1".to_string());
        let response = self
            .client
            .post(format!("{}/changes/watch?pageToken={}", DRIVE_API, page_token))
            .bearer_auth(token)
            .json(&json!({
                // The channel id doubles as the shared token the verifier
                // compares against X-Goog-Channel-Id.
                "id": secret,
                "type": "web_hook",
                "address": callback_url,
                "token": source_identifier,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("drive watch: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "drive watch returned {}: {}",
                status, body
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Upstream(format!("drive watch body: {}", e)))?;
        let resource_id = body
            .get("resourceId")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::Upstream("drive watch missing resourceId".into()))?;

        Ok(ProviderRegistration {
            external_id: resource_id.to_string(),
            start_page_token,
        })
    }
}

#[async_trait]
impl WebhookProvider for HttpWebhookProvider {
    async fn register(
        &self,
        plugin_type: &str,
        source_identifier: &str,
        callback_url: &str,
        secret: &str,
        credentials: &Map<String, Value>,
    ) -> Result<ProviderRegistration, PipelineError> {
        match plugin_type {
            "git-crawler" => {
                self.register_github(source_identifier, callback_url, secret, credentials)
                    .await
            }
            "googledrive-crawler" => {
                self.register_drive(source_identifier, callback_url, secret, credentials)
                    .await
            }
            other => Err(PipelineError::UnsupportedSource(format!(
                "no webhook provider for plugin type '{}'",
                other
            ))),
        }
    }

    async fn deregister(
        &self,
        plugin_type: &str,
        external_id: &str,
        resource_id: &str,
        credentials: &Map<String, Value>,
    ) -> Result<(), PipelineError> {
        match plugin_type {
            "git-crawler" => {
                let token = Self::credential(credentials, "token")?;
                let repo = Self::github_repo_path(resource_id)?;
                let response = self
                    .client
                    .delete(format!("{}/repos/{}/hooks/{}", GITHUB_API, repo, external_id))
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(|e| PipelineError::Upstream(format!("github hook delete: {}", e)))?;
                // 404 means the hook is already gone; deletion converges.
                if !response.status().is_success() && response.status().as_u16() != 404 {
                    return Err(PipelineError::Upstream(format!(
                        "github hook delete returned {}",
                        response.status()
                    )));
                }
                Ok(())
            }
            "googledrive-crawler" => {
                let token = Self::credential(credentials, "access_token")?;
                let response = self
                    .client
                    .post(format!("{}/channels/stop", DRIVE_API))
                    .bearer_auth(token)
                    .json(&json!({
                        "id": external_id,
                        "resourceId": resource_id,
                    }))
                    .send()
                    .await
                    .map_err(|e| PipelineError::Upstream(format!("drive channel stop: {}", e)))?;
                if !response.status().is_success() && response.status().as_u16() != 404 {
                    return Err(PipelineError::Upstream(format!(
                        "drive channel stop returned {}",
                        response.status()
                    )));
                }
                Ok(())
            }
            other => Err(PipelineError::UnsupportedSource(format!(
                "no webhook provider for plugin type '{}'",
                other
            ))),
        }
    }

    async fn verify_credentials(
        &self,
        plugin_type: &str,
        credentials: &Map<String, Value>,
    ) -> Result<bool, PipelineError> {
        let (url, token) = match plugin_type {
            "git-crawler" => (
                format!("{}/user", GITHUB_API),
                Self::credential(credentials, "token")?,
            ),
            "googledrive-crawler" => (
                format!("{}/about?fields=user", DRIVE_API),
                Self::credential(credentials, "access_token")?,
            ),
            other => {
                return Err(PipelineError::UnsupportedSource(format!(
                    "no webhook provider for plugin type '{}'",
                    other
                )))
            }
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("credential check: {}", e)))?;
        Ok(response.status().is_success())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_repo_path() {
        assert_eq!(
            HttpWebhookProvider::github_repo_path("https://github.com/ex/r").unwrap(),
            "ex/r"
        );
        assert!(HttpWebhookProvider::github_repo_path("https://gitlab.com/ex/r").is_err());
        assert!(HttpWebhookProvider::github_repo_path("https://github.com/").is_err());
    }

    #[test]
    fn test_credential_lookup() {
        let mut credentials = Map::new();
        credentials.insert("token".into(), Value::String("t0k".into()));
        assert_eq!(
            HttpWebhookProvider::credential(&credentials, "token").unwrap(),
            "t0k"
        );
        let err = HttpWebhookProvider::credential(&credentials, "access_token").unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_unknown_plugin_type_rejected() {
        let provider = HttpWebhookProvider::new(1);
        let err = provider
            .register("ftp-crawler", "sid", "http://cb", "secret", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
