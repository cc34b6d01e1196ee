use thiserror::Error;

/// Everything that can go wrong while syncing or publishing the feed.
///
/// A missing remote document is not an error, see [`crate::remote::Fetched::NotFound`].
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote answered with HTTP status {0}")]
    Status(u16),

    #[error("Malformed feed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Local storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Entropy source unavailable: {0}")]
    Entropy(#[from] getrandom::Error),

    #[error("Invalid input: {0}")]
    Validation(&'static str),

    #[error("A transmission is already in flight")]
    Busy,

    #[error("Relay has been shut down")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Failures of the remote document that the next poll may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Status(_) | Self::Decode(_))
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
