#![cfg(feature = "web")]
//! Errors returned by HTTP handlers.
//!
//! Page handlers show datastore and mail failures inline, the way crews expect
//! to read them. Anything that escapes a handler becomes an [`AppError`],
//! answered as `{"error": {"code": ..., "message": ...}}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::mailer::MailError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("Error generando la página: {0}")]
    Render(#[from] handlebars::RenderError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Mail(_) => StatusCode::BAD_GATEWAY,
            AppError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Mail(_) => "mail_error",
            AppError::Render(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let mail = AppError::from(MailError::NoRecipients);
        assert_eq!(mail.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(mail.code(), "mail_error");
    }

    #[tokio::test]
    async fn test_response_body_carries_code_and_message() {
        let response = AppError::BadRequest("multipart cortado".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
        assert_eq!(json["error"]["message"], "multipart cortado");
    }
}
