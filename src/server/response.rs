//! JSON envelopes returned by the HTTP surface

use crate::{error::InpaintError, tracing_config::events};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Successful `/inpaint` body: `{"success": true, "image": "data:image/png;base64,..."}`
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub image: String,
}

impl ApiResponse {
    #[must_use]
    pub fn image(data_url: String) -> Self {
        Self {
            success: true,
            image: data_url,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Failure body: `{"success": false, "error": "<message>"}`
///
/// Every failure maps to HTTP 500, whatever its cause.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

impl From<InpaintError> for ApiError {
    fn from(err: InpaintError) -> Self {
        events::error_with_context(&err, "inpaint request");
        Self::new(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        events::error_with_context(&err, "inpaint worker task");
        Self::new(format!("Internal error: worker task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// `/health` body
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub initialized: bool,
    pub checkpoint: String,
    pub backend: String,
    pub models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_with_success_false() {
        let err: ApiError = InpaintError::missing_field("mask").into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Missing required field: mask");
    }

    #[test]
    fn test_status_codes() {
        let ok = ApiResponse::image("data:image/png;base64,AA==".to_string()).into_response();
        assert_eq!(ok.status(), StatusCode::OK);

        for err in [
            InpaintError::missing_field("image"),
            InpaintError::decode("bad base64"),
            InpaintError::not_initialized("shutting down"),
        ] {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
