//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value (usually from the environment) could not be interpreted.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// Configured signing secret is too short to sign session credentials.
    #[error("signing secret must be at least {min} bytes (got {len})")]
    WeakSigningSecret { len: usize, min: usize },

    /// Other error.
    #[error("{0}")]
    Other(String),
}
