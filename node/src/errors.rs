// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use caseline_kernel::error::SyncError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn invalid_input(code: impl Into<String>) -> Self {
        ApiError::Sync(SyncError::InvalidInput(code.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Sync(e) => match e {
                SyncError::InvalidCursor | SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                SyncError::Forbidden => StatusCode::FORBIDDEN,
                SyncError::CaseNotFound => StatusCode::NOT_FOUND,
                SyncError::CaseClosed => StatusCode::CONFLICT,
                SyncError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine readable code sent to clients.
    pub fn code(&self) -> String {
        match self {
            ApiError::Sync(SyncError::Storage(_)) => "storage_unavailable".to_string(),
            ApiError::Sync(e) => e.to_string(),
            ApiError::Unauthorized => "unauthorized".to_string(),
            ApiError::Internal => "internal_error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = Json(json!({
            "error": self.code()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseline_kernel::error::LogError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(SyncError::InvalidCursor).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(SyncError::Forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(SyncError::CaseNotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(SyncError::CaseClosed).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);

        let storage = ApiError::from(SyncError::Storage(LogError::InvalidHeader));
        assert_eq!(storage.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(storage.code(), "storage_unavailable");
        assert_eq!(ApiError::invalid_input("case_id_required").code(), "case_id_required");
    }
}
