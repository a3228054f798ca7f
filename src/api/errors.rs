// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::error;

use crate::errors::GenerationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    UnsafePrompt(String),
    Unauthorized(String),
    DraftBusy,
    InsufficientFunds { shortfall: i64 },
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::NotFound(msg) => ("not_found", msg.clone(), None),
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), None),
            ApiError::UnsafePrompt(reason) => ("unsafe_prompt", reason.clone(), None),
            ApiError::Unauthorized(msg) => ("unauthorized", msg.clone(), None),
            ApiError::DraftBusy => (
                "draft_busy",
                "A generation is already running for this draft".to_string(),
                None,
            ),
            ApiError::InsufficientFunds { shortfall } => {
                let mut details = HashMap::new();
                details.insert(
                    "shortfall".to_string(),
                    serde_json::Value::Number((*shortfall).into()),
                );
                (
                    "insufficient_funds",
                    "Not enough credits for this generation".to_string(),
                    Some(details),
                )
            }
            ApiError::InternalError(msg) => ("internal_error", msg.clone(), None),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            details,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) | ApiError::UnsafePrompt(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::DraftBusy => StatusCode::CONFLICT,
            ApiError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::UnsafePrompt(reason) => write!(f, "Unsafe prompt: {}", reason),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::DraftBusy => write!(f, "Draft busy"),
            ApiError::InsufficientFunds { shortfall } => {
                write!(f, "Insufficient funds, {} more required", shortfall)
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InsufficientFunds { shortfall } => {
                ApiError::InsufficientFunds { shortfall }
            }
            GenerationError::UnsafePrompt { reason } => ApiError::UnsafePrompt(reason),
            GenerationError::DraftBusy => ApiError::DraftBusy,
            GenerationError::Validation(msg) => ApiError::InvalidRequest(msg),
            GenerationError::NotFound(msg) => ApiError::NotFound(msg),
            other => {
                // backend details stay in the logs
                error!("Generation request failed: {}", other);
                ApiError::InternalError("generation request failed".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_response())).into_response()
    }
}
