//! Configuration errors.

use thiserror::Error;

/// Failure to read, parse or interpret `linkaudit.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("malformed configuration: {0}")]
    InvalidFormat(String),

    /// A field parsed as TOML but its content is unusable (e.g. a bad `HH:MM`).
    #[error("bad value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment variable {0} is not set")]
    EnvVarNotSet(String),

    #[error("reading configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}
