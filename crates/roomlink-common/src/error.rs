//! Centralized error types for roomlink.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that can be directly converted to control API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Failure reason reported by the RPC transport.
///
/// Discovery only distinguishes timeouts from everything else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Core error type returned by every gateway operation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // === Discovery ===
    #[error("Timed out locating the controller for room {room}")]
    DiscoveryTimeout { room: String },

    #[error("Controller discovery failed: {0}")]
    DiscoveryFailure(String),

    // === Call admission ===
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    #[error("Inconsistent audio/video in/out requirement")]
    NegotiationMismatch,

    #[error("Duplicated call with peer {0}")]
    DuplicatePeer(String),

    #[error("Call setup failed: {0}")]
    SetupPartialFailure(String),

    #[error("Gateway is recycling, not available")]
    DrainRejected,

    #[error("SIP user agent failed to make a call to {0}")]
    SipCallFailed(String),

    // === Lifecycle ===
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Gateway not initialized")]
    NotInitialized,

    #[error("SIP registration failed")]
    RegistrationFailed,

    #[error("Session {0} not found")]
    SessionNotFound(String),

    // === Infrastructure ===
    #[error("RPC {method} failed: {reason}")]
    Rpc { method: String, reason: RpcError },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to control API callers.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl GatewayError {
    pub fn rpc(method: &str, reason: RpcError) -> Self {
        Self::Rpc {
            method: method.to_string(),
            reason,
        }
    }

    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DiscoveryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::DiscoveryFailure(_) | Self::Rpc { .. } => StatusCode::BAD_GATEWAY,
            Self::JoinRejected(_) | Self::SetupPartialFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NegotiationMismatch | Self::InvalidOptions(_) => StatusCode::BAD_REQUEST,
            Self::DuplicatePeer(_) => StatusCode::CONFLICT,
            Self::DrainRejected | Self::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            Self::SipCallFailed(_) | Self::RegistrationFailed => StatusCode::BAD_GATEWAY,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string for programmatic handling by callers.
    pub fn error_code(&self) -> &str {
        match self {
            Self::DiscoveryTimeout { .. } => "DISCOVERY_TIMEOUT",
            Self::DiscoveryFailure(_) => "DISCOVERY_FAILURE",
            Self::JoinRejected(_) => "JOIN_REJECTED",
            Self::NegotiationMismatch => "NEGOTIATION_MISMATCH",
            Self::DuplicatePeer(_) => "DUPLICATE_PEER",
            Self::SetupPartialFailure(_) => "SETUP_PARTIAL_FAILURE",
            Self::DrainRejected => "DRAIN_REJECTED",
            Self::SipCallFailed(_) => "SIP_CALL_FAILED",
            Self::InvalidOptions(_) => "INVALID_OPTIONS",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::RegistrationFailed => "REGISTRATION_FAILED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Rpc { .. } => "RPC_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to callers
        let message = match &self {
            GatewayError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
