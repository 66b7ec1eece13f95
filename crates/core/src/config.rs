use std::env;

use serde::{Deserialize, Serialize};

/// Best-effort .env loading; a missing file is not an error.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub provider: ProviderConfig,
    pub cron: CronConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            webhook: WebhookConfig::from_env(),
            provider: ProviderConfig::from_env(),
            cron: CronConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!("  webhook:  callback_base={}", self.webhook.callback_base);
        tracing::info!("  provider: timeout={}s", self.provider.timeout_secs);
        tracing::info!("  cron:     window={}s", self.cron.window_secs);
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("FOERDERBAND_HOST", "0.0.0.0"),
            port: env_u16("FOERDERBAND_PORT", 8080),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Webhook ingress ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Externally reachable base URL prepended to endpoint ids when a
    /// task does not carry an absolute callback URL of its own.
    pub callback_base: String,
}

impl WebhookConfig {
    fn from_env() -> Self {
        Self {
            callback_base: env_or("FOERDERBAND_CALLBACK_BASE", "http://localhost:8080/webhooks"),
        }
    }
}

// ── Webhook provider ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Bound on every external register/deregister call.
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn from_env() -> Self {
        Self {
            timeout_secs: env_u64("FOERDERBAND_PROVIDER_TIMEOUT_SECS", 15),
        }
    }
}

// ── Cron evaluation ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Tolerance for tick jitter: a scheduled moment older than this many
    /// seconds is considered stale and never fires.
    pub window_secs: u64,
}

impl CronConfig {
    fn from_env() -> Self {
        Self {
            window_secs: env_u64("FOERDERBAND_CRON_WINDOW_SECS", 65),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
