use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::query::filter::FilterError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown dataset, table, user or record.
    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Invalid filter: {0}")]
    InvalidFilterSyntax(String),

    /// Column referenced in a projection or ordering does not exist (dedicated tables only).
    #[error("Unknown field '{field}' for table '{table}'")]
    InvalidField { field: String, table: String },

    #[error("Rate limit exceeded. Your limit is {limit} requests per day.")]
    RateLimitExceeded { limit: i64 },

    #[error("Data volume limit exceeded. Your limit is {limit_mb} MB per day.")]
    VolumeLimitExceeded { limit_mb: f64 },

    #[error("Insufficient credits. Required: {required:.2}, Available: {available:.2}")]
    InsufficientCredits { required: f64, available: f64 },

    #[error("Insufficient permissions. Required: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        ApiError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "not_found",
            ApiError::InvalidFilterSyntax(_) => "invalid_filter_syntax",
            ApiError::InvalidField { .. } => "invalid_field",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::VolumeLimitExceeded { .. } => "volume_limit_exceeded",
            ApiError::InsufficientCredits { .. } => "insufficient_credits",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidFilterSyntax(_)
            | ApiError::InvalidField { .. }
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimitExceeded { .. } | ApiError::VolumeLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients; internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::from(e))
    }
}

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        ApiError::InvalidFilterSyntax(e.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => ApiError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::UnknownAccount(user_id) => ApiError::not_found("user", user_id),
            LedgerError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(e) => tracing::error!(error = ?e, "internal error"),
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => {
                tracing::info!(kind = self.kind(), "authorization error: {}", self)
            }
            ApiError::RateLimitExceeded { .. }
            | ApiError::VolumeLimitExceeded { .. }
            | ApiError::InsufficientCredits { .. } => {
                tracing::warn!(kind = self.kind(), "metering rejected request: {}", self)
            }
            _ => tracing::debug!(kind = self.kind(), "client error: {}", self),
        }

        let body = json!({
            "error": self.kind(),
            "message": self.user_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused on 10.0.0.3:5432"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn metering_errors_map_to_expected_statuses() {
        assert_eq!(
            ApiError::RateLimitExceeded { limit: 100 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::VolumeLimitExceeded { limit_mb: 10.0 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let credits = ApiError::InsufficientCredits {
            required: 4.0,
            available: 1.0,
        };
        assert_eq!(credits.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            credits.user_message(),
            "Insufficient credits. Required: 4.00, Available: 1.00"
        );
    }

    #[test]
    fn ledger_errors_convert() {
        let err: ApiError = LedgerError::UnknownAccount(7).into();
        assert_eq!(err.kind(), "not_found");
        let err: ApiError = LedgerError::InsufficientCredits {
            required: 1.0,
            available: 0.5,
        }
        .into();
        assert_eq!(err.kind(), "insufficient_credits");
    }

    #[tokio::test]
    async fn response_body_carries_kind_and_message() {
        let resp = ApiError::not_found("dataset", 42).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        let v: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(v["error"], "not_found");
        assert_eq!(v["message"], "dataset '42' not found");
    }
}
