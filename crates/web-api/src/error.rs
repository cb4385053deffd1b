use application::{ApplicationError, IdentityError, JournalError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }

    pub fn into_body(self) -> ErrorBody {
        self.body
    }
}

impl From<IdentityError> for ApiError {
    fn from(error: IdentityError) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, "IDENTITY_FAILED", error.to_string())
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::BlobStoreError;

        match error {
            ApplicationError::Domain(err) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", err.to_string())
            }
            ApplicationError::Identity(err) => err.into(),
            ApplicationError::BlobStore(err @ BlobStoreError::NotFound(_)) => {
                ApiError::new(StatusCode::BAD_REQUEST, "BLOB_STORE_FAILED", err.to_string())
            }
            ApplicationError::BlobStore(err) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "BLOB_STORE_FAILED",
                err.to_string(),
            ),
            ApplicationError::Journal(err) => {
                tracing::error!(error = %err, "消息持久化失败");
                let message = match err {
                    JournalError::Io(_) => "message storage unavailable",
                    JournalError::Corrupted(_) => "message storage corrupted",
                };
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILED", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DomainError;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let error: ApiError =
            ApplicationError::from(DomainError::validation_error("text", "too long")).into();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.body().code, "VALIDATION_FAILED");
    }

    #[test]
    fn storage_errors_hide_details() {
        let error: ApiError =
            ApplicationError::from(JournalError::io("/var/lib/chat: disk full")).into();
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.body().code, "STORAGE_FAILED");
        assert!(!error.body().message.contains("/var/lib"));
    }

    #[test]
    fn identity_errors_are_unauthorized() {
        let error: ApiError = IdentityError::invalid_assertion("bad signature").into();
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.body().code, "IDENTITY_FAILED");
    }
}
