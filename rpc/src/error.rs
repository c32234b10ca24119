//! HTTP error mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use provote_admission::AdmissionError;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The engine rejected the vote. `retry_after_ms` is resolved against
    /// the engine clock when the rejection is built.
    #[error("{source}")]
    Rejected {
        source: AdmissionError,
        retry_after_ms: Option<u64>,
    },

    /// The request could not be turned into a cast-vote call.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error: {0}")]
    Server(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl RpcError {
    pub fn rejected(source: AdmissionError, now: provote_types::Timestamp) -> Self {
        let retry_after_ms = source.retry_after_ms(now);
        Self::Rejected {
            source,
            retry_after_ms,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected { source, .. } => match source {
                AdmissionError::DuplicateVote { .. } => StatusCode::CONFLICT,
                AdmissionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                AdmissionError::Blocked { .. } | AdmissionError::SuspiciousPattern { .. } => {
                    StatusCode::FORBIDDEN
                }
                AdmissionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                AdmissionError::TransientStorageFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected { source, .. } => source.code(),
            Self::BadRequest(_) => "invalid_request",
            Self::Server(_) => "internal_error",
        }
    }

    /// `Retry-After` in whole seconds, rounded up. Only sent with 429 and 503.
    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Rejected {
                source:
                    AdmissionError::RateLimited { .. }
                    | AdmissionError::TransientStorageFailure { .. },
                retry_after_ms: Some(ms),
            } => Some(ms.div_ceil(1000).max(1)),
            _ => None,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            error: self.to_string(),
            error_code: self.code(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
