use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::telemetry::{CORRELATION_ID_HEADER, CorrelationId};

#[derive(Debug, Error)]
pub enum AppErrorKind {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("unsupported operation")]
    MethodNotAllowed,
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AppError {
    kind: AppErrorKind,
    correlation_id: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: String) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn kind(&self) -> &AppErrorKind {
        &self.kind
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            AppErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            AppErrorKind::Forbidden(_) => StatusCode::FORBIDDEN,
            AppErrorKind::Conflict(_) => StatusCode::CONFLICT,
            AppErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppErrorKind::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::new(AppErrorKind::BadRequest(message.into()))
    }

    /// The single message every failed authentication collapses to.
    pub fn permission_denied() -> Self {
        Self::new(AppErrorKind::Forbidden("permission denied".into()))
    }

    pub fn method_not_allowed() -> Self {
        Self::new(AppErrorKind::MethodNotAllowed)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    errors: [String; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            errors: [self.kind.to_string()],
            correlation_id: self.correlation_id.as_deref(),
        });

        let mut response = (status, body).into_response();
        if let Some(value) = self
            .correlation_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
        response
    }
}

impl From<unseal_core::Error> for AppError {
    fn from(value: unseal_core::Error) -> Self {
        use unseal_core::Error;

        let kind = match value {
            Error::Validation(_) | Error::Compile(_) | Error::AuthenticationFailed => {
                AppErrorKind::BadRequest(value.to_string())
            }
            Error::NotFound { .. } => AppErrorKind::NotFound(value.to_string()),
            Error::PolicyViolation(_) | Error::Expired => {
                AppErrorKind::Forbidden(value.to_string())
            }
            Error::Conflict { .. } => AppErrorKind::Conflict(value.to_string()),
            Error::Unavailable(_) => AppErrorKind::Unavailable(value.to_string()),
        };
        AppError::new(kind)
    }
}

pub fn attach_correlation(err: AppError, correlation: &CorrelationId) -> AppError {
    err.with_correlation(correlation.0.clone())
}
