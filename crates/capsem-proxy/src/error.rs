//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use capsem_core::error::{ClientCode, CapsemError};

/// A `CapsemError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CapsemError);

impl From<CapsemError> for ApiError {
    fn from(e: CapsemError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CapsemError::UpstreamStatus(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            other => match other.client_code() {
                ClientCode::BadRequest => StatusCode::BAD_REQUEST,
                ClientCode::Unauthenticated => StatusCode::UNAUTHORIZED,
                ClientCode::PolicyViolation => StatusCode::FORBIDDEN,
                ClientCode::UpstreamError | ClientCode::BadGateway => StatusCode::BAD_GATEWAY,
                ClientCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing message; internal detail never leaks.
    fn message(&self) -> String {
        match &self.0 {
            CapsemError::PolicyViolation { details, .. } => {
                format!("Request blocked by security policy: {details}")
            }
            CapsemError::BadRequest(msg) => msg.clone(),
            CapsemError::MissingCredential(header) => format!("Missing credential: {header}"),
            CapsemError::UpstreamStatus(_) => "Upstream provider error".into(),
            CapsemError::UpstreamTransport(_) | CapsemError::InvalidUpstreamResponse(_) => {
                "Bad gateway".into()
            }
            CapsemError::Config(_) | CapsemError::PolicyFailure { .. } | CapsemError::Internal(_) => {
                "Internal server error".into()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.0.client_code().as_str(),
            "message": self.message(),
        });
        if let CapsemError::PolicyViolation { point, reason, details } = &self.0 {
            error["point"] = json!(point.as_str());
            error["reason"] = json!(reason.as_str());
            error["details"] = json!(details);
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

/// Failures that stop the process before it serves traffic.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Capsem(#[from] CapsemError),
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(std::io::Error),
}
