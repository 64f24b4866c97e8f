//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating a check configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("malformed argument string: {0}")]
    Arguments(#[from] serde_urlencoded::de::Error),

    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid probe url `{0}`: expected an absolute http or https url")]
    InvalidUrl(String),

    #[error("invalid status pattern: {0}")]
    InvalidStatusPattern(#[from] regex::Error),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}
