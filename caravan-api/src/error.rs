use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use caravan_core::DomainError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Domain(err) => match err {
                DomainError::Conflict(_)
                | DomainError::Duplicate(_)
                | DomainError::Full(_)
                | DomainError::NotAllPaid(_)
                | DomainError::InvalidState(_) => StatusCode::CONFLICT,
                DomainError::Expired(_) => StatusCode::GONE,
                DomainError::TooEarly(_) => too_early(),
                DomainError::NotFound(_) => StatusCode::NOT_FOUND,
                DomainError::Invalid(_) | DomainError::Validation(_) => StatusCode::BAD_REQUEST,
                DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
                DomainError::Upstream(_) => StatusCode::BAD_GATEWAY,
                DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Internal(_) => "internal_error",
            AppError::Domain(err) => err.kind(),
        }
    }
}

// 425
fn too_early() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::CONFLICT)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
