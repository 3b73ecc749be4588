//! Centralized error types for the Voxlink core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::audio::CodecError;
use crate::carrier::{CarrierProtocolError, DialError};
use crate::model::{ConfigError, ModelError};
use crate::recorder::PersistenceError;
use crate::routing::AgentError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses and
    /// persisted failure reasons.
    fn code(&self) -> &'static str;
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::CorruptPcmLength(_) => "corrupt_audio",
        }
    }
}

impl ErrorCode for CarrierProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_frame",
            Self::Payload(_) => "bad_media_payload",
            Self::MissingStreamId => "missing_stream_id",
        }
    }
}

impl ErrorCode for ModelError {
    fn code(&self) -> &'static str {
        self.code()
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownModel(_) => "unknown_model",
            Self::UnknownVoice(_) => "unknown_voice",
            Self::UnknownSensitivity(_) => "unknown_sensitivity",
            Self::EmptyLanguage => "empty_language",
            Self::EmptyPrompt => "empty_prompt",
        }
    }
}

/// Application-wide error type for the Voxlink gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Agent id did not resolve to a configured agent.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Outbound dial failed at the carrier.
    #[error("Dial failed: {0}")]
    Dial(String),

    /// Outbound dialing attempted without dial-out configuration.
    #[error("Dial-out not configured: {0}")]
    DialNotConfigured(String),

    /// Persistence store rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => "agent_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Dial(_) => "dial_failed",
            Self::DialNotConfigured(_) => "dial_not_configured",
            Self::Persistence(_) => "persistence_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AgentNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DialNotConfigured(_) | Self::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Dial(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DialError> for GatewayError {
    fn from(err: DialError) -> Self {
        Self::Dial(err.to_string())
    }
}

impl From<PersistenceError> for GatewayError {
    fn from(err: PersistenceError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<AgentError> for GatewayError {
    fn from(err: AgentError) -> Self {
        Self::Configuration(err.to_string())
    }
}
