// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::Vendor;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0} API error: {1}")]
    VendorApi(Vendor, String),

    #[error("{0} connection must be re-authorized")]
    ReconnectRequired(Vendor),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker for vendor 401 responses (expired or revoked access token).
    pub const VENDOR_TOKEN_ERROR: &'static str = "Token expired or invalid";
    /// Marker for vendor 429 responses.
    pub const VENDOR_RATE_LIMIT: &'static str = "Rate limit exceeded";

    /// Whether this error means the vendor rejected our access token.
    pub fn is_vendor_token_error(&self) -> bool {
        match self {
            AppError::VendorApi(_, msg) => {
                msg.contains(Self::VENDOR_TOKEN_ERROR)
                    || msg.contains("Token expired")
                    || msg.contains("invalid")
            }
            _ => false,
        }
    }

    /// Whether this error is a vendor rate limit (worth retrying later).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::VendorApi(_, msg) if msg.contains(Self::VENDOR_RATE_LIMIT))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::VendorApi(vendor, msg) => (
                StatusCode::BAD_GATEWAY,
                "vendor_error",
                Some(format!("{}: {}", vendor, msg)),
            ),
            AppError::ReconnectRequired(vendor) => (
                StatusCode::CONFLICT,
                "reconnect_required",
                Some(vendor.to_string()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
