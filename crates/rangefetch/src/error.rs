use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("invalid byte range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("fetch stalled before covering the requested range")]
    Stalled,
}

impl FetchError {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Whether re-issuing the read may succeed.
    ///
    /// A stalled or transient network failure leaves the cache intact, so
    /// the caller retries by reading again; malformed input does not heal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::InvalidUrl { .. } | Self::InvalidRange { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. } | Self::Io { .. } | Self::Store { .. } | Self::Stalled => true,
        }
    }
}
