// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::broker::BrokerError;
use crate::policy::PolicyError;
use crate::provider::ProviderError;
use crate::retry::RetryError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request timed out")]
    Timeout,
    #[error("internal server error")]
    InternalServerError,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::UnexpectedResult(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient(_) | Self::Timeout | Self::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::ValidationError(msg) | Self::UnexpectedResult(msg) => msg,
            Self::Forbidden(msg) | Self::NotFound(msg) | Self::Conflict(msg) => msg,
            Self::Transient(_) => "Upstream temporarily unavailable".to_string(),
            Self::Timeout => "Request timed out".to_string(),
            Self::InternalServerError => "Internal Server Error".to_string(),
        };

        let body = Json(json!({"code": status.as_u16(), "message": message}));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(source: validator::ValidationErrors) -> Self {
        AppError::ValidationError(source.to_string())
    }
}

impl From<PolicyError> for AppError {
    fn from(source: PolicyError) -> Self {
        tracing::error!("{:?}", source);
        match source {
            PolicyError::InvalidIdentifier(_) | PolicyError::TooLarge { .. } => {
                AppError::ValidationError(source.to_string())
            }
            PolicyError::Serialize(_) | PolicyError::UnknownOperation(_) => {
                AppError::InternalServerError
            }
        }
    }
}

impl From<BrokerError> for AppError {
    fn from(source: BrokerError) -> Self {
        match source {
            BrokerError::Forbidden(msg) => AppError::Forbidden(msg),
            BrokerError::Malformed(msg) => AppError::ValidationError(msg),
            BrokerError::Transient(msg) => AppError::Transient(msg),
            BrokerError::Internal(msg) => {
                tracing::error!("credential broker failure: {}", msg);
                AppError::InternalServerError
            }
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(source: ProviderError) -> Self {
        match source {
            ProviderError::NotFound(msg) => AppError::NotFound(msg),
            ProviderError::AccessDenied(msg) => AppError::Forbidden(msg),
            ProviderError::Malformed(msg) => AppError::ValidationError(msg),
            ProviderError::Conflict(msg) => AppError::Conflict(msg),
            // the session is dropped from the cache, so a retry brokers a new one
            ProviderError::Throttled(msg)
            | ProviderError::Unavailable(msg)
            | ProviderError::Rejected(msg) => AppError::Transient(msg),
            ProviderError::Other(msg) => {
                tracing::error!("provider failure: {}", msg);
                AppError::InternalServerError
            }
        }
    }
}

/// A stopped retry surfaces its own classification; an exhausted one is
/// always internal, whatever the last transient error was.
impl<E> From<RetryError<E>> for AppError
where
    E: Into<AppError> + std::fmt::Display,
{
    fn from(source: RetryError<E>) -> Self {
        match source {
            RetryError::Stop(err) => err.into(),
            RetryError::Transient(err) => {
                tracing::error!("retries exhausted: {}", err);
                AppError::Transient(err.to_string())
            }
        }
    }
}
