// Error handling module
// Defines the gateway error taxonomy surfaced to API callers

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while sending a request through the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Backend answered with a non-success status; body kept verbatim
    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },

    /// Network failure or timeout before a response was received
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The refresh endpoint rejected or failed the refresh call
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A refresh was needed but no refresh token is stored
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Session ended because refreshing failed; `original` is the 401 that
    /// triggered the refresh
    #[error("Session ended: {cause} (after {original})")]
    SessionEnded {
        original: Box<GatewayError>,
        #[source]
        cause: Box<GatewayError>,
    },

    /// Auth endpoint returned a payload we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential store read/write failure
    #[error("Credential store error: {0}")]
    Store(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// HTTP status carried by this error, if the backend produced one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Status { status, .. } => StatusCode::from_u16(*status).ok(),
            GatewayError::Transport(e) => e.status(),
            GatewayError::SessionEnded { original, .. } => original.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }

    /// Response body of a status error
    pub fn body(&self) -> Option<&str> {
        match self {
            GatewayError::Status { body, .. } => Some(body),
            GatewayError::SessionEnded { original, .. } => original.body(),
            _ => None,
        }
    }

    /// Why the refresh failed, for a session that ended during recovery
    pub fn refresh_cause(&self) -> Option<&GatewayError> {
        match self {
            GatewayError::SessionEnded { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
