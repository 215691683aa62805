//! Error types.
//!
//! Numeric problems (bad item parameters, empty pools, non-convergence) are not
//! errors: they resolve to clamped values, `None` or flags. `CatError` covers
//! misuse of the session lifecycle and invalid configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The session already terminated and accepts no more responses.
    #[error("session {0} is complete")]
    SessionComplete(String),

    /// The item was already administered in this session.
    #[error("item {0} was already administered in this session")]
    DuplicateItem(String),
}

pub type Result<T> = std::result::Result<T, CatError>;
