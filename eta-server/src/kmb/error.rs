//! KMB client error types.
//!
//! Variants carry strings rather than source errors so a single failure
//! stays `Clone` and can be handed to every caller coalesced onto one
//! in-flight request.

/// Errors from the KMB data client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KmbError {
    /// Could not reach the forwarding proxy (network error, timeout, etc.)
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The proxy or upstream API returned an error status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body was not the expected JSON shape.
    #[error("JSON parse error: {message}")]
    Json {
        message: String,
        body: Option<String>,
    },
}

impl From<reqwest::Error> for KmbError {
    fn from(err: reqwest::Error) -> Self {
        KmbError::Transport {
            message: err.to_string(),
        }
    }
}
