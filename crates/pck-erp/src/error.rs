//! Error type shared by every remote call.
//!
//! The classification matters to callers: finalize treats [`GatewayError::Timeout`]
//! and, on the situation transition, [`GatewayError::NotFound`] as probable
//! success. Keep the mapping in [`GatewayError::from_status`] and
//! [`GatewayError::from_reqwest`] the single place where it is decided.

/// A failed remote call.
///
/// Payloads are plain strings so the error is `Clone` and can be scripted by
/// test doubles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Client-side timeout, HTTP 408 or HTTP 504.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// HTTP 404 for the addressed resource.
    #[error("remote resource not found: {0}")]
    NotFound(String),
    /// Missing, expired or refused credentials.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// Any other non-success HTTP status.
    #[error("remote rejected {what} with status {status}: {body}")]
    Rejected {
        what: String,
        status: u16,
        body: String,
    },
    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Local token record could not be read or written.
    #[error("token storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, what: &str, body: String) -> Self {
        match status {
            404 => GatewayError::NotFound(what.to_string()),
            408 | 504 => GatewayError::Timeout(format!("{what} answered HTTP {status}")),
            401 | 403 => GatewayError::Unauthorized(format!("{what} answered HTTP {status}: {body}")),
            _ => GatewayError::Rejected {
                what: what.to_string(),
                status,
                body,
            },
        }
    }

    /// Classify a `reqwest` failure (send or body read).
    pub fn from_reqwest(err: reqwest::Error, what: &str) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(format!("{what}: {err}"))
        } else if err.is_decode() {
            GatewayError::Decode(format!("{what}: {err}"))
        } else {
            GatewayError::Transport(format!("{what}: {err}"))
        }
    }
}

/// Pass a successful response through; turn anything else into a [`GatewayError`].
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), what, body))
}
