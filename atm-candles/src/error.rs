use thiserror::Error;

/// Errors loading [`Config`](crate::config::Config) from the environment.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid URL for {var}: {value:?} does not use one of the {expected} schemes")]
    UnsupportedScheme {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Errors generated by the market API collaborators.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ApiError {
    #[error("failed to build request URL: {0}")]
    Url(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP error {status} from {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("upstream reported failure status: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

/// Errors generated by the live feed and engine queue.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FeedError {
    #[error("feed subscription channel closed")]
    SubscriptionsClosed,

    #[error("engine event queue closed")]
    EngineClosed,
}
