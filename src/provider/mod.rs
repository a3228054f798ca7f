// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image provider adapter

pub mod http;
pub mod multipart;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::types::GenerationParams;

pub use http::HttpImageProvider;

/// Provider request for one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateImages {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub samples: u32,
}

impl From<&GenerationParams> for GenerateImages {
    fn from(params: &GenerationParams) -> Self {
        Self {
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            width: params.width,
            height: params.height,
            steps: params.steps,
            guidance: params.guidance,
            model: params.model.clone(),
            samples: params.count,
        }
    }
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Render the requested images; at least one on success
    async fn generate(&self, request: &GenerateImages) -> Result<Vec<Bytes>, ProviderError>;

    async fn health_check(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_step_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "stability".to_string(),
            endpoint: "https://api.stability.ai/v2beta/stable-image/generate/core".to_string(),
            api_key: None,
            model: None,
            timeout_ms: 60_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_step_ms: 1000,
        }
    }
}

impl ProviderConfig {
    /// Longest one `generate` call can take: every attempt timing out plus
    /// the backoff between attempts
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1) as u64;
        let timeouts = self.timeout_ms.saturating_mul(attempts);
        let backoff: u64 = (0..attempts - 1)
            .map(|a| self.backoff_base_ms + self.backoff_step_ms * a)
            .sum();
        Duration::from_millis(timeouts.saturating_add(backoff))
    }
}
