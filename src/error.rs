//! Error types for membersync.
//!
//! The variants follow the reconciliation taxonomy: transient-auth,
//! conflict, remote-permanent and refresh failures are distinct so the
//! pipeline can route each one differently.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote rejected the call because the bearer token expired.
    #[error("access token expired")]
    AuthExpired,

    /// The entity already exists on the target system.
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },

    /// The authentication exchange itself failed. Fatal to the run.
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// The run stopped accepting work after a refresh failure.
    #[error("run halted: {0}")]
    Halted(String),

    #[error("invalid webhook signature")]
    Signature,

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Errors that end the whole run rather than a single entity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Refresh(_) | Error::Halted(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
