//! Shared error type across CAPSEM crates.

use thiserror::Error;

use crate::model::{InterceptionPoint, Reason};

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed body.
    BadRequest,
    /// Required credential header missing.
    Unauthenticated,
    /// Blocked by a security policy.
    PolicyViolation,
    /// Upstream provider answered with a non-success status.
    UpstreamError,
    /// Upstream provider unreachable or returned garbage.
    BadGateway,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::Unauthenticated => "UNAUTHENTICATED",
            ClientCode::PolicyViolation => "POLICY_VIOLATION",
            ClientCode::UpstreamError => "UPSTREAM_ERROR",
            ClientCode::BadGateway => "BAD_GATEWAY",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CapsemError>;

/// Unified error type used by core and proxy.
#[derive(Debug, Error)]
pub enum CapsemError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("blocked at {point}: {details}")]
    PolicyViolation {
        point: InterceptionPoint,
        reason: Reason,
        details: String,
    },
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
    #[error("upstream transport: {0}")]
    UpstreamTransport(String),
    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),
    #[error("config: {0}")]
    Config(String),
    #[error("policy '{policy}' failed: {message}")]
    PolicyFailure { policy: String, message: String },
    #[error("internal: {0}")]
    Internal(String),
}

impl CapsemError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            CapsemError::BadRequest(_) => ClientCode::BadRequest,
            CapsemError::MissingCredential(_) => ClientCode::Unauthenticated,
            CapsemError::PolicyViolation { .. } => ClientCode::PolicyViolation,
            CapsemError::UpstreamStatus(_) => ClientCode::UpstreamError,
            CapsemError::UpstreamTransport(_) | CapsemError::InvalidUpstreamResponse(_) => {
                ClientCode::BadGateway
            }
            CapsemError::Config(_)
            | CapsemError::PolicyFailure { .. }
            | CapsemError::Internal(_) => ClientCode::Internal,
        }
    }
}
