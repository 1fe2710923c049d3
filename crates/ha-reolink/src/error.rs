//! Errors raised while talking to a Reolink device

use thiserror::Error;

/// Failure of the device handshake, from most to least specific
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReolinkError {
    /// Login worked but the account cannot change camera settings
    #[error(
        "User '{username}' has authorization level '{user_level}', only admin users can change camera settings"
    )]
    UserNotAdmin {
        username: String,
        user_level: String,
    },

    #[error("Invalid credentials")]
    CredentialsInvalid,

    /// Error reported by the device API
    #[error("{0}")]
    Api(String),

    /// Network or transport failure
    #[error("{0}")]
    Connection(String),

    /// The device answered but is missing data required for setup
    #[error("{0}")]
    Setup(String),

    #[error("{0}")]
    Unexpected(String),
}

pub type ReolinkResult<T> = Result<T, ReolinkError>;
