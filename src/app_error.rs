use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use std::fmt;

use crate::broker::router::RouterError;

/// HTTP-facing error taxonomy (§7): each variant maps to exactly one
/// domain-level bucket (Validation, Identity, Capacity, Transport,
/// State, Internal).
#[derive(Debug)]
pub enum ServiceError {
    Anyhow(anyhow::Error),

    Validation(String),
    Identity(String),
    AlreadyCreated,
    NoBot,
    NoBalancers,
    NoWorkers,
    PublishError,
}

impl ServiceError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServiceError::Anyhow(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal service error: {err}"),
            ),
            ServiceError::Validation(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ServiceError::Identity(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ServiceError::AlreadyCreated => (
                StatusCode::SEE_OTHER,
                "A bot is already running for this session".to_string(),
            ),
            ServiceError::NoBot => (
                StatusCode::SEE_OTHER,
                "No bot is running for this session".to_string(),
            ),
            ServiceError::NoBalancers => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is currently unavailable".to_string(),
            ),
            ServiceError::NoWorkers => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is currently unavailable".to_string(),
            ),
            ServiceError::PublishError => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Failed to reach the balancer fleet".to_string(),
            ),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::info!(error = %message, status = %status, "request rejected");
        }
        (status, message).into_response()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, message) = self.status_and_message();
        write!(f, "{message}")
    }
}

impl std::error::Error for ServiceError {}

impl From<RouterError> for ServiceError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::AlreadyCreated => ServiceError::AlreadyCreated,
            RouterError::NoBot => ServiceError::NoBot,
            RouterError::NoBalancers => ServiceError::NoBalancers,
            RouterError::NoWorkers => ServiceError::NoWorkers,
            RouterError::PublishError => ServiceError::PublishError,
            RouterError::Failure(reason) => ServiceError::Identity(reason),
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Anyhow(err)
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Anyhow(err.into())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Anyhow(err.into())
    }
}

impl From<crate::chat::error::ChatApiError> for ServiceError {
    fn from(err: crate::chat::error::ChatApiError) -> Self {
        ServiceError::Identity(err.to_string())
    }
}
