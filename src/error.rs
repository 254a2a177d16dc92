//! Gateway error types.
//!
//! Request-level failures are reported inside a [`GatewayResponse`](crate::models::GatewayResponse)
//! envelope. [`GatewayError`] covers the failures that abort an operation
//! outright: session initialisation, routing to a missing addon or catalog,
//! and the transport errors underneath them.

use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("addon {addon} failed to initialise: {reason}")]
    AddonInit { addon: String, reason: String },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown addon instance: {0}")]
    UnknownAddon(String),

    #[error("unknown catalog: {0}")]
    UnknownCatalog(String),

    #[error("addon {addon} timed out after {timeout_ms}ms")]
    Timeout { addon: String, timeout_ms: u64 },

    #[error("upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("redirect to a different host refused: {0}")]
    CrossHostRedirect(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Returns `true` if retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = GatewayError::Timeout {
            addon: "torrentio".into(),
            timeout_ms: 5000,
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "addon torrentio timed out after 5000ms");
    }

    #[test]
    fn client_errors_are_not_transient() {
        let not_found = GatewayError::Status {
            status: 404,
            url: "https://addon.example/manifest.json".into(),
        };
        assert!(!not_found.is_transient());

        let throttled = GatewayError::Status {
            status: 429,
            url: "https://addon.example/manifest.json".into(),
        };
        assert!(throttled.is_transient());
    }
}
