//! Error types for the generation backend client.
//!
//! Defines [`BackendError`] with variants for rate limiting, API errors,
//! network failures and malformed payloads. Uses `thiserror` to derive
//! `Display` and `Error` from the `#[error(...)]` attributes.

use thiserror::Error;

/// Errors raised by generation-backend calls.
///
/// The variants cover the failure modes the pipeline has to distinguish:
/// - [`RateLimited`](BackendError::RateLimited) — the server returned HTTP 429
/// - [`ApiError`](BackendError::ApiError) — any other HTTP error (4xx/5xx)
/// - [`NetworkError`](BackendError::NetworkError) — transport-level failure,
///   including the per-call timeout
/// - [`MalformedResponse`](BackendError::MalformedResponse) — a 2xx reply
///   that carries no usable text or image payload
#[derive(Debug, Error)]
pub enum BackendError {
    /// The server returned HTTP 429. `retry_after_ms` is how long the
    /// server asked us to wait before another attempt.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Error returned by the API (e.g. 401 bad key, 500 internal error).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Underlying network failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response parsed as JSON but held no decodable content.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
