//! Protocol error
use bytes::{Buf, Bytes};

use crate::ext::BytesExt;

/// An error when translating buffer from postgres
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown backend message type {found:?}")]
    Unknown { found: char },
    #[error("unexpected {found} message during {phase}")]
    UnexpectedPhase { found: &'static str, phase: &'static str },
    #[error("invalid frame length {len}")]
    Frame { len: i32 },
    #[error("malformed {message} message: {reason}")]
    Malformed { message: &'static str, reason: &'static str },
    #[error("server requires protocol minor version negotiation (minor {minor})")]
    Negotiate { minor: u32 },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found: found as char }
    }

    pub(crate) fn unexpected_phase(found: &'static str, phase: &'static str) -> ProtocolError {
        Self::UnexpectedPhase { found, phase }
    }

    pub(crate) fn frame(len: i32) -> ProtocolError {
        Self::Frame { len }
    }

    pub(crate) fn malformed(message: &'static str, reason: &'static str) -> ProtocolError {
        Self::Malformed { message, reason }
    }
}

/// A parsed `ErrorResponse` or `NoticeResponse` field record.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order, and
/// unrecognized field types are silently ignored.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{severity}: {message} ({code})")]
pub struct ServerError {
    /// `ERROR`, `FATAL`, `PANIC`, or for notices `WARNING`, `NOTICE`, etc.
    pub severity: String,
    /// SQLSTATE code, five characters.
    pub code: String,
    /// The primary human-readable error message.
    pub message: String,
    /// Optional secondary message carrying more detail.
    pub detail: Option<String>,
    /// Optional suggestion what to do about the problem.
    pub hint: Option<String>,
    /// Error cursor position as an index into the original query string,
    /// counted in characters from one.
    pub position: Option<u32>,
}

impl ServerError {
    pub(crate) fn parse(mut body: Bytes) -> Result<ServerError, ProtocolError> {
        let mut severity = String::new();
        let mut code = String::new();
        let mut message = String::new();
        let mut detail = None;
        let mut hint = None;
        let mut position = None;

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::malformed("ErrorResponse", "missing terminator"));
            }
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let Some(value) = body.get_nul_bytestr() else {
                return Err(ProtocolError::malformed("ErrorResponse", "field value not nul terminated"));
            };
            match field {
                b'S' => severity = value.as_str().to_owned(),
                b'C' => code = value.as_str().to_owned(),
                b'M' => message = value.as_str().to_owned(),
                b'D' => detail = Some(value.as_str().to_owned()),
                b'H' => hint = Some(value.as_str().to_owned()),
                b'P' => position = value.as_str().parse().ok(),
                _ => {}
            }
        }

        Ok(ServerError { severity, code, message, detail, hint, position })
    }
}
