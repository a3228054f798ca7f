// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request handlers for the generation endpoints

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::errors::ApiError;
use crate::metrics::PipelineMetrics;
use crate::orchestrator::{
    GenerationOrchestrator, JobWithImages, PromptSource, RenderSettings, SubmitGeneration,
    Submission,
};
use crate::types::{DraftId, ImageId, UserId};
use crate::worker::DispatchMode;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Body of `POST /v1/drafts/:draft_id/generations`. Exactly one of `prompt`
/// and `templateId` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub settings: SettingsRequest,
}

/// Optional render overrides; unset fields keep the defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsRequest {
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance: Option<f32>,
    pub model: Option<String>,
    pub count: Option<u32>,
}

impl SettingsRequest {
    fn into_settings(self) -> RenderSettings {
        let defaults = RenderSettings::default();
        RenderSettings {
            negative_prompt: self.negative_prompt,
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            steps: self.steps.unwrap_or(defaults.steps),
            guidance: self.guidance.unwrap_or(defaults.guidance),
            model: self.model,
            count: self.count.unwrap_or(defaults.count),
        }
    }
}

impl GenerationRequest {
    fn into_parts(self) -> Result<(PromptSource, RenderSettings), ApiError> {
        let prompt = match (self.prompt, self.template_id) {
            (Some(text), None) => PromptSource::Text(text),
            (None, Some(id)) => PromptSource::Template(id),
            (Some(_), Some(_)) => {
                return Err(ApiError::InvalidRequest(
                    "set either prompt or templateId, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(ApiError::InvalidRequest(
                    "prompt or templateId is required".to_string(),
                ))
            }
        };
        Ok((prompt, self.settings.into_settings()))
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<JobWithImages>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectResponse {
    pub public_url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dispatch: DispatchMode,
    pub lock: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
}

fn user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?;
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Unauthorized(format!("malformed {} header", USER_ID_HEADER)))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /v1/drafts/:draft_id/generations
///
/// 202 while the job waits in the queue, 200 when it already finished inline.
pub async fn submit_generation_handler(
    State(state): State<AppState>,
    Path(draft_id): Path<DraftId>,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let user_id = user_id(&headers)?;
    let (prompt, settings) = request.into_parts()?;
    debug!("Generation request for draft {} from user {}", draft_id, user_id);

    let submission = state
        .orchestrator
        .submit_generation(SubmitGeneration {
            user_id,
            draft_id,
            prompt,
            settings,
            idempotency_key: idempotency_key(&headers),
        })
        .await?;

    let status = if submission.status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(submission)))
}

/// GET /v1/drafts/:draft_id/generations
pub async fn list_generations_handler(
    State(state): State<AppState>,
    Path(draft_id): Path<DraftId>,
) -> Result<Json<ListResponse>, ApiError> {
    let items = state.orchestrator.list_results(draft_id).await?;
    Ok(Json(ListResponse { items }))
}

/// POST /v1/drafts/:draft_id/images/:image_id/select
pub async fn select_image_handler(
    State(state): State<AppState>,
    Path((draft_id, image_id)): Path<(DraftId, ImageId)>,
) -> Result<Json<SelectResponse>, ApiError> {
    let public_url = state.orchestrator.select_result(draft_id, image_id).await?;
    Ok(Json(SelectResponse { public_url }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut issues = Vec::new();
    if !state.orchestrator.provider_healthy().await {
        issues.push("image provider unreachable or missing credential".to_string());
    }

    Json(HealthResponse {
        status: if issues.is_empty() { "ok" } else { "degraded" },
        dispatch: state.orchestrator.dispatch_mode(),
        lock: state.orchestrator.lock_backend(),
        issues: (!issues.is_empty()).then_some(issues),
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
