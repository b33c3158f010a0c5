//! HTTP client for the diagnostic query server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{QueryError, map_http_status, map_reqwest_error};

/// Request body shared by the synchronous and streaming endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Free-text clinical question.
    pub question: String,
}

impl QueryRequest {
    /// Wrap a question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

/// Client for the diagnostic query server.
///
/// Cheap to clone; clones share one connection pool.
///
/// # Example
///
/// ```no_run
/// use pulse_client::{ClientConfig, DiagnosisClient};
///
/// # async fn run() -> Result<(), pulse_client::QueryError> {
/// let client = DiagnosisClient::from_config(ClientConfig::default())?
///     .base_url("http://100.96.0.5:8000");
/// let answer = client.ask("患者发热腹泻，给出中医诊断。").await?;
/// println!("{answer}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiagnosisClient {
    pub(crate) config: ClientConfig,
    pub(crate) client: reqwest::Client,
}

impl DiagnosisClient {
    /// Build a client, applying the configured timeouts.
    pub fn from_config(config: ClientConfig) -> Result<Self, QueryError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(QueryError::Build)?;
        Ok(Self { config, client })
    }

    /// Build a client from `PULSE_*` environment variables.
    pub fn from_env() -> Result<Self, QueryError> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Use an existing [`reqwest::Client`]; its own timeouts apply.
    #[must_use]
    pub fn with_http_client(config: ClientConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Override the server base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask a question and wait for the complete answer.
    ///
    /// The server encodes its answer as a JSON string that itself contains
    /// JSON; such a string is decoded a second time. Any other JSON value is
    /// returned as received.
    pub async fn ask(&self, question: &str) -> Result<Value, QueryError> {
        let url = self.config.query_url();
        tracing::debug!(url = %url, question_len = question.len(), "sending synchronous query");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&QueryRequest::new(question))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        decode_answer(&body)
    }

    /// Send a streaming request and return the response once headers arrive.
    ///
    /// Fails with [`QueryError::Status`] on a non-success status; the body
    /// of a successful response is left unread.
    pub async fn open_stream(&self, question: &str) -> Result<reqwest::Response, QueryError> {
        let url = self.config.stream_url();
        tracing::debug!(url = %url, question_len = question.len(), "sending streaming query");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&QueryRequest::new(question))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response)
    }
}

/// Turn a non-success response into [`QueryError::Status`]. The status wins
/// over a body that fails to arrive.
async fn status_error(response: reqwest::Response) -> QueryError {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(%status, error = %e, "failed to read error response body");
            String::new()
        }
    };
    map_http_status(status, &body)
}

/// Decode a synchronous response body, unwrapping one level of string
/// encoding.
pub(crate) fn decode_answer(body: &str) -> Result<Value, QueryError> {
    let outer: Value = serde_json::from_str(body)
        .map_err(|e| QueryError::InvalidResponse(format!("invalid JSON response: {e}")))?;

    match outer {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|e| {
            QueryError::InvalidResponse(format!("answer string is not JSON: {e}"))
        }),
        other => Ok(other),
    }
}
