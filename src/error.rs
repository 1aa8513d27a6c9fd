use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use thiserror::Error;

use crate::{config, database::DatabaseError, model::envelope::ErrorEnvelope};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    Forbidden {
        message: String,
        detail: Option<Value>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    /// A request that failed validation or a domain rule.
    /// Outside development the client only sees `fallback`.
    #[error("{message}: {detail}")]
    Operation {
        message: String,
        fallback: &'static str,
        detail: String,
    },
    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            message: message.into(),
            detail: None,
        }
    }

    pub fn operation(
        message: impl Into<String>,
        fallback: &'static str,
        detail: impl ToString,
    ) -> Self {
        ApiError::Operation {
            message: message.into(),
            fallback,
            detail: detail.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Operation { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The body sent to the client, with details hidden unless `development` is set.
    pub fn envelope(self, development: bool) -> ErrorEnvelope {
        let (message, error) = match self {
            ApiError::Unauthorized(message)
            | ApiError::NotFound(message)
            | ApiError::BadRequest(message) => (message, None),
            ApiError::Forbidden { message, detail } => (message, detail),
            ApiError::Operation {
                message,
                fallback,
                detail,
            } => {
                let shown = if development { detail } else { fallback.into() };
                (message, Some(Value::String(shown)))
            }
            ApiError::Internal(detail) => {
                let error = development.then_some(Value::String(detail));
                ("Internal Server Error".into(), error)
            }
        };

        ErrorEnvelope {
            status: false,
            message,
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        }

        (status, Json(self.envelope(config::is_development()))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// Extractor failures get the same envelope as every other error
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("Database error: {err}"))
    }
}
