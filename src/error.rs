//! Error taxonomy for the federation engine.
//!
//! Every public operation returns [`Result`] so callers can tell a dropped
//! activity from a store failure. Handlers are free to downgrade most of
//! these to a no-op; `Persistence` is the one kind that always surfaces.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A key outside the declared vocabulary schema was read or written.
    #[error("unknown vocabulary field: {0}")]
    UnknownField(String),

    /// Malformed or incomplete activity. Dropped, never retried.
    #[error("invalid activity: {0}")]
    Validation(String),

    /// A referenced outbox item, follow edge, or actor is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A follower candidate is a tombstone or could not be resolved.
    #[error("invalid follower {iri}: {reason}")]
    InvalidFollower { iri: String, reason: String },

    /// Network or parse failure while fetching a remote actor or object.
    #[error("remote fetch of {iri} failed: {reason}")]
    RemoteFetch { iri: String, reason: String },

    /// A Delete whose target independently still resolves live.
    #[error("delete target {0} still resolves, ignoring as spoofed")]
    TombstoneMismatch(String),

    /// Store write or read failure.
    #[error("persistence failure: {0}")]
    Persistence(#[from] fjall::Error),

    /// Stored record could not be encoded or decoded.
    #[error("storage encoding failure: {0}")]
    Encoding(String),
}

impl Error {
    pub(crate) fn remote_fetch(iri: impl Into<String>, reason: impl ToString) -> Error {
        Error::RemoteFetch {
            iri: iri.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_follower(iri: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::InvalidFollower {
            iri: iri.into(),
            reason: reason.into(),
        }
    }
}

impl From<minicbor::decode::Error> for Error {
    fn from(value: minicbor::decode::Error) -> Self {
        Error::Encoding(value.to_string())
    }
}
