// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP client for the hosted image-generation endpoint

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::multipart::parse_response;
use super::{GenerateImages, ImageProvider, ProviderConfig};
use crate::errors::ProviderError;
use crate::metrics::PipelineMetrics;

/// Bearer-authenticated POST with a fixed attempt budget and linear backoff
pub struct HttpImageProvider {
    client: Client,
    name: String,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_step: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl HttpImageProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        info!(
            "Image provider configured: name={}, endpoint={}, credential={}",
            config.name,
            config.endpoint,
            if config.api_key.is_some() { "set" } else { "missing" }
        );

        Ok(Self {
            client,
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            timeout,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_step: Duration::from_millis(config.backoff_step_ms),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wait after failed attempt `attempt` (0-indexed): base + attempt * step
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base + self.backoff_step * attempt
    }

    fn request_body(&self, request: &GenerateImages) -> serde_json::Value {
        let mut body = serde_json::json!({
            "prompt": request.prompt,
            "width": request.width,
            "height": request.height,
            "steps": request.steps,
            "guidance": request.guidance,
            "samples": request.samples,
        });
        if let Some(ref negative) = request.negative_prompt {
            body["negative_prompt"] = serde_json::json!(negative);
        }
        if let Some(model) = request.model.as_ref().or(self.model.as_ref()) {
            body["model"] = serde_json::json!(model);
        }
        body
    }

    async fn attempt(
        &self,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<Bytes>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("accept", "image/*, multipart/*")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            // body is not surfaced; it may echo the prompt or credentials
            return Err(ProviderError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        let images = parse_response(content_type.as_deref(), bytes);
        if images.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(images)
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Transport(e.without_url().to_string())
        }
    }
}

#[async_trait]
impl ImageProvider for HttpImageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = %self.name, samples = request.samples)
    )]
    async fn generate(&self, request: &GenerateImages) -> Result<Vec<Bytes>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;
        let body = self.request_body(request);

        let mut last_error = ProviderError::EmptyResponse;
        for attempt in 0..self.max_attempts {
            match self.attempt(api_key, &body).await {
                Ok(images) => {
                    debug!(
                        "Provider returned {} image(s) on attempt {}",
                        images.len(),
                        attempt + 1
                    );
                    return Ok(images);
                }
                Err(e) => {
                    warn!(
                        "Provider attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_error = e;
                }
            }
            if attempt + 1 < self.max_attempts {
                if let Some(metrics) = &self.metrics {
                    metrics.provider_retries.inc();
                }
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }
        }

        Err(ProviderError::Exhausted {
            attempts: self.max_attempts,
            last_error: last_error.to_string(),
        })
    }

    async fn health_check(&self) -> bool {
        if self.api_key.is_none() {
            return false;
        }
        match self.client.get(&self.endpoint).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(e) => {
                debug!("Provider health check failed: {}", e);
                false
            }
        }
    }
}
