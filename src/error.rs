//! Driver error types.
use std::io;

use crate::{
    config::ParseError,
    postgres::{ProtocolError, ServerError},
    value::DecodeError,
};

/// A specialized [`Result`] type for driver operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from this library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while connecting or talking to the server.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid connection url.
    #[error(transparent)]
    Config(#[from] ParseError),

    /// Malformed or unexpected wire data.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A value failed to decode into a [`Value`][crate::Value].
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The backend reported an error for this request.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// An earlier extended-query error must be cleared with `sync` before
    /// further commands are accepted.
    #[error("sync required after an extended query error")]
    SyncRequired,

    /// The server asked for an authentication method this driver does not
    /// speak.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuth(String),

    /// Password authentication failed (SQLSTATE 28P01).
    #[error("invalid password")]
    InvalidPassword,

    /// The server rejected the authorization (SQLSTATE 28000).
    #[error("invalid authorization specification")]
    InvalidAuthorization,

    /// Ssl was required but the server declined the upgrade.
    #[error("server does not support ssl")]
    SslNotAvailable,

    /// The ssl handshake itself failed.
    #[error("ssl negotiation failed: {0}")]
    SslNegotiationFailed(String),

    /// The connect deadline elapsed.
    #[error("connect timed out")]
    Timeout,

    /// The server closed the connection.
    #[error("connection closed by server")]
    SockClosed,

    /// The connection failed mid-session.
    #[error("socket error: {0}")]
    SockError(String),

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// A transaction body failed and the transaction was rolled back.
    #[error("transaction rolled back: {0}")]
    Rollback(#[source] Box<Error>),
}

impl Error {
    /// Duplicate a teardown error so it can be delivered to every queued
    /// request. Only the error kinds that teardown produces are cloneable;
    /// anything else collapses to [`Error::Closed`].
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::SockClosed => Error::SockClosed,
            Error::SockError(reason) => Error::SockError(reason.clone()),
            Error::Protocol(e) => Error::Protocol(e.clone()),
            Error::Decode(e) => Error::Decode(e.clone()),
            _ => Error::Closed,
        }
    }

    /// Map an authentication-phase backend error onto the credential error
    /// kinds.
    pub(crate) fn from_auth_response(err: ServerError) -> Error {
        match err.code.as_str() {
            "28P01" => Error::InvalidPassword,
            "28000" => Error::InvalidAuthorization,
            _ => Error::Server(err),
        }
    }
}
