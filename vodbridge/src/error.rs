use rangefetch::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("fetch error: {source}")]
    Fetch {
        #[from]
        source: FetchError,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("invalid sources manifest: {source}")]
    Manifest {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
