//! Error taxonomy for queries and streams.
//!
//! Only whole-connection failures are errors. A line that fails to decode
//! travels on the session's diagnostics channel, and cancellation is a
//! [`StopReason`](crate::StopReason).

use thiserror::Error;

use crate::config::ConfigError;

/// Errors from a synchronous query or a streaming session.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request could not be sent or the connection dropped before any
    /// response headers arrived.
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// The HTTP client could not be constructed from the configuration.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The request exceeded its configured timeout.
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body, possibly empty.
        body: String,
    },

    /// The body failed after some records were already delivered.
    ///
    /// Those records stay valid.
    #[error("stream interrupted after {records_received} records: {source}")]
    Stream {
        /// Records delivered before the failure.
        records_received: u64,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The synchronous response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueryError {
    /// Whether issuing the same request again might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) | Self::Stream { .. } => true,
            Self::Status { status, .. } => status.is_server_error(),
            Self::Build(_) | Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }
}

/// Map a [`reqwest::Error`] raised before the response started.
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> QueryError {
    if err.is_timeout() {
        QueryError::Timeout(err)
    } else {
        QueryError::Connect(err)
    }
}

/// Map a non-success status and its body to a [`QueryError`].
pub(crate) fn map_http_status(status: reqwest::StatusCode, body: &str) -> QueryError {
    QueryError::Status {
        status,
        body: body.to_string(),
    }
}
