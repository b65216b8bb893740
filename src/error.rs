//! Structured error taxonomy for the remote.
//!
//! Mirrors the *Error kinds* in the design: every component returns
//! `Result<T, RemoteError>`, and the command dispatcher is the only place
//! that maps a `RemoteError` down to a protocol reply line.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Auth(String),

    #[error("not found")]
    NotFound,

    #[error("Checksum mismatch")]
    Checksum,

    #[error("{0}")]
    Transport(String),

    #[error("Interrupted by user")]
    Interrupted,

    #[error("host pipe closed")]
    HostPipeClosed,
}

impl RemoteError {
    /// Text suitable for the `<msg>` slot of a `*-FAILURE` reply line.
    pub fn reply_text(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            RemoteError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                404 => RemoteError::NotFound,
                401 => RemoteError::Auth(err.to_string()),
                _ => RemoteError::Transport(err.to_string()),
            }
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
