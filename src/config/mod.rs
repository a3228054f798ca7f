// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Pipeline configuration
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. TOML file named by `PIPELINE_CONFIG`
//! 3. Environment variables (a `.env` file is loaded first when present)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::artifacts::{ArtifactConfig, Corner};
use crate::errors::ConfigError;
use crate::idempotency::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::lock::LockConfig;
use crate::orchestrator::CostPolicy;
use crate::provider::ProviderConfig;
use crate::queue::{QueueConfig, QueueMode};
use crate::safety::SafetyConfig;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Mount the public bucket at `/media`
    pub serve_media: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            serve_media: false,
        }
    }
}

/// The wallet store is process-local, so balances are seeded from config at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// User id -> credits granted as a gift on startup
    pub opening_balances: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pricing: CostPolicy,
    pub provider: ProviderConfig,
    pub queue: QueueConfig,
    pub lock: LockConfig,
    pub idempotency: IdempotencyConfig,
    pub artifacts: ArtifactConfig,
    pub safety: SafetyConfig,
    /// Prompt templates by id
    pub templates: HashMap<String, String>,
    pub api: ApiConfig,
    pub wallets: WalletConfig,
}

impl PipelineConfig {
    /// Defaults, then the optional TOML file, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("PIPELINE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loading pipeline config from {}", path.display());
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PROVIDER_NAME") {
            self.provider.name = v;
        }
        if let Some(v) = get("PROVIDER_ENDPOINT") {
            self.provider.endpoint = v;
        }
        if let Some(v) = get("PROVIDER_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = get("PROVIDER_MODEL") {
            self.provider.model = Some(v);
        }
        if let Some(v) = get("PROVIDER_TIMEOUT_MS") {
            self.provider.timeout_ms = parse("PROVIDER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("REDIS_URL") {
            self.queue.redis_url = Some(v.clone());
            self.lock.redis_url = Some(v);
        }
        if let Some(v) = get("QUEUE_MODE") {
            self.queue.mode = match v.to_ascii_lowercase().as_str() {
                "auto" => QueueMode::Auto,
                "memory" => QueueMode::Memory,
                "inline" => QueueMode::Inline,
                other => {
                    return Err(ConfigError::Invalid {
                        field: "QUEUE_MODE".to_string(),
                        message: format!("expected auto, memory or inline, got '{}'", other),
                    })
                }
            };
        }
        if let Some(v) = get("QUEUE_KEY_PREFIX") {
            self.queue.key_prefix = v;
        }
        if let Some(v) = get("WORKER_CONCURRENCY") {
            self.queue.worker_concurrency = parse("WORKER_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("ARTIFACTS_PRIVATE_ROOT") {
            self.artifacts.private_root = PathBuf::from(v);
        }
        if let Some(v) = get("ARTIFACTS_PUBLIC_ROOT") {
            self.artifacts.public_root = PathBuf::from(v);
        }
        if let Some(v) = get("PUBLIC_BASE_URL") {
            self.artifacts.public_base_url = v;
        }
        if let Some(v) = get("WATERMARK_LOGO") {
            self.artifacts.logo_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WATERMARK_OPACITY") {
            self.artifacts.watermark.opacity = parse("WATERMARK_OPACITY", &v)?;
        }
        if let Some(v) = get("WATERMARK_CORNER") {
            self.artifacts.watermark.corner = parse_corner(&v)?;
        }
        if let Some(v) = get("SAFETY_BLOCKED_TERMS") {
            self.safety.custom_blocked_terms = v
                .split(',')
                .map(|term| term.trim().to_string())
                .filter(|term| !term.is_empty())
                .collect();
        }
        if let Some(v) = get("API_BIND") {
            self.api.bind = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                message: message.to_string(),
            })
        };
        if self.pricing.base <= 0 || self.pricing.step < 0 || self.pricing.cap < self.pricing.base {
            return invalid("pricing", "base must be positive and cap at least base");
        }
        if self.provider.max_attempts == 0 {
            return invalid("provider.max_attempts", "must be at least 1");
        }
        if self.queue.max_attempts == 0 {
            return invalid("queue.max_attempts", "must be at least 1");
        }
        if self.queue.key_prefix.trim().is_empty() {
            return invalid("queue.key_prefix", "must not be empty");
        }
        if self.queue.worker_concurrency == 0 {
            return invalid("queue.worker_concurrency", "must be at least 1");
        }
        if self.lock.ttl_ms == 0 {
            return invalid("lock.ttl_ms", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.artifacts.watermark.opacity) {
            return invalid("artifacts.watermark.opacity", "must be between 0 and 1");
        }
        for (user, amount) in &self.wallets.opening_balances {
            if user.parse::<UserId>().is_err() || *amount <= 0 {
                return invalid(
                    "wallets.opening_balances",
                    "keys must be user ids and amounts positive",
                );
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field: field.to_string(),
        message: format!("cannot parse '{}'", value),
    })
}

fn parse_corner(value: &str) -> Result<Corner, ConfigError> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "top_left" => Ok(Corner::TopLeft),
        "top_right" => Ok(Corner::TopRight),
        "bottom_left" => Ok(Corner::BottomLeft),
        "bottom_right" => Ok(Corner::BottomRight),
        other => Err(ConfigError::Invalid {
            field: "WATERMARK_CORNER".to_string(),
            message: format!("unknown corner '{}'", other),
        }),
    }
}
