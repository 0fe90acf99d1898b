//! Postgres Backend Messages
use bytes::{Buf, Bytes, BytesMut};

use super::{PgFormat, ProtocolError, ServerError};
use crate::{common::ByteStr, ext::BytesExt, statement::Column};

/// Split the next complete `tag + length + payload` frame off `buf`.
///
/// The length field is a big-endian `i32` that includes itself but not the
/// tag byte. Returns `None` until the whole frame has been buffered, so the
/// caller can resume after reading more bytes.
pub fn next_frame(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    if buf.len() < 5 {
        return Ok(None);
    }

    let tag = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(ProtocolError::frame(len));
    }

    let frame_len = 1 + len as usize;
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    buf.advance(5);
    let body = buf.split_to(len as usize - 4).freeze();
    Ok(Some((tag, body)))
}

/// A type that can be decoded from a postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ServerError),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(ServerError),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

impl BackendMessage {
    /// Message name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::BindComplete(_) => "BindComplete",
            Self::CloseComplete(_) => "CloseComplete",
            Self::CommandComplete(_) => "CommandComplete",
            Self::DataRow(_) => "DataRow",
            Self::EmptyQueryResponse(_) => "EmptyQueryResponse",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::NegotiateProtocolVersion(_) => "NegotiateProtocolVersion",
            Self::NoData(_) => "NoData",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::NotificationResponse(_) => "NotificationResponse",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ParseComplete(_) => "ParseComplete",
            Self::PortalSuspended(_) => "PortalSuspended",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::RowDescription(_) => "RowDescription",
        }
    }
}

impl BackendProtocol for BackendMessage {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        let message = match msgtype {
            Authentication::MSGTYPE => Self::Authentication(Authentication::decode(msgtype, body)?),
            BackendKeyData::MSGTYPE => Self::BackendKeyData(BackendKeyData::decode(msgtype, body)?),
            BindComplete::MSGTYPE => Self::BindComplete(BindComplete::decode(msgtype, body)?),
            CloseComplete::MSGTYPE => Self::CloseComplete(CloseComplete::decode(msgtype, body)?),
            CommandComplete::MSGTYPE => Self::CommandComplete(CommandComplete::decode(msgtype, body)?),
            DataRow::MSGTYPE => Self::DataRow(DataRow::decode(msgtype, body)?),
            EmptyQueryResponse::MSGTYPE => Self::EmptyQueryResponse(EmptyQueryResponse::decode(msgtype, body)?),
            b'E' => Self::ErrorResponse(ServerError::parse(body)?),
            NegotiateProtocolVersion::MSGTYPE => {
                Self::NegotiateProtocolVersion(NegotiateProtocolVersion::decode(msgtype, body)?)
            }
            NoData::MSGTYPE => Self::NoData(NoData::decode(msgtype, body)?),
            b'N' => Self::NoticeResponse(ServerError::parse(body)?),
            NotificationResponse::MSGTYPE => {
                Self::NotificationResponse(NotificationResponse::decode(msgtype, body)?)
            }
            ParameterDescription::MSGTYPE => {
                Self::ParameterDescription(ParameterDescription::decode(msgtype, body)?)
            }
            ParameterStatus::MSGTYPE => Self::ParameterStatus(ParameterStatus::decode(msgtype, body)?),
            ParseComplete::MSGTYPE => Self::ParseComplete(ParseComplete::decode(msgtype, body)?),
            PortalSuspended::MSGTYPE => Self::PortalSuspended(PortalSuspended::decode(msgtype, body)?),
            ReadyForQuery::MSGTYPE => Self::ReadyForQuery(ReadyForQuery::decode(msgtype, body)?),
            RowDescription::MSGTYPE => Self::RowDescription(RowDescription::decode(msgtype, body)?),
            _ => return Err(ProtocolError::unknown(msgtype)),
        };
        Ok(message)
    }
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected_phase("mistyped", "decode"))
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    Md5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// A method this driver does not speak.
    Unsupported {
        /// Method name per the request subcode.
        name: &'static str,
    },
    /// A request subcode this driver does not recognize.
    Unknown {
        code: u32,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 4 {
            return Err(ProtocolError::malformed("Authentication", "missing subcode"));
        }
        let auth = match body.get_u32() {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                if body.remaining() < 4 {
                    return Err(ProtocolError::malformed("Authentication", "md5 salt missing"));
                }
                Authentication::Md5Password { salt: body.get_u32().to_be_bytes() }
            }
            2 => Authentication::Unsupported { name: "kerberos5" },
            4 => Authentication::Unsupported { name: "crypt" },
            6 => Authentication::Unsupported { name: "scm" },
            7 => Authentication::Unsupported { name: "gss" },
            8 => Authentication::Unsupported { name: "gss_continue" },
            code => Authentication::Unknown { code },
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 8 {
            return Err(ProtocolError::malformed("BackendKeyData", "expected 8 bytes"));
        }
        Ok(Self {
            process_id: body.get_i32(),
            secret_key: body.get_i32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let (Some(name), Some(value)) = (body.get_nul_bytestr(), body.get_nul_bytestr()) else {
            return Err(ProtocolError::malformed("ParameterStatus", "expected two strings"));
        };
        Ok(Self { name, value })
    }
}

/// Identifies the message as an asynchronous notification from `NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: i32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The "payload" string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 4 {
            return Err(ProtocolError::malformed("NotificationResponse", "missing process id"));
        }
        let process_id = body.get_i32();
        let (Some(channel), Some(payload)) = (body.get_nul_bytestr(), body.get_nul_bytestr()) else {
            return Err(ProtocolError::malformed("NotificationResponse", "expected two strings"));
        };
        Ok(Self { process_id, channel, payload })
    }
}

/// Identifies the message as a row description.
///
/// Sent in response to a simple query or a Describe, ahead of any
/// DataRow messages. In a RowDescription returned from the statement
/// variant of Describe the format codes are not yet known and are
/// always zero.
#[derive(Debug)]
pub struct RowDescription {
    pub columns: Vec<Column>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(ProtocolError::malformed("RowDescription", "missing field count"));
        }
        let field_len = body.get_u16();
        let mut columns = Vec::with_capacity(field_len as usize);
        for _ in 0..field_len {
            let Some(name) = body.get_nul_bytestr() else {
                return Err(ProtocolError::malformed("RowDescription", "field name not nul terminated"));
            };
            // table oid, attribute number, type oid, type size, type
            // modifier, format code
            if body.remaining() < 4 + 2 + 4 + 2 + 4 + 2 {
                return Err(ProtocolError::malformed("RowDescription", "truncated field"));
            }
            let _table_oid = body.get_u32();
            let _attribute = body.get_u16();
            let type_oid = body.get_u32();
            let _type_size = body.get_i16();
            let _type_modifier = body.get_i32();
            let format = PgFormat::from_code(body.get_u16());
            columns.push(Column { name, type_oid, format });
        }
        Ok(Self { columns })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(ProtocolError::malformed("DataRow", "missing column count"));
        }
        Ok(Self {
            column_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag, usually a single word identifying which SQL command
    /// was completed, followed by the affected row count for the commands
    /// that report one (`INSERT 0 5`, `SELECT 3`, `UPDATE 1`, ...).
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let Some(tag) = body.get_nul_bytestr() else {
            return Err(ProtocolError::malformed("CommandComplete", "tag not nul terminated"));
        };
        Ok(Self { tag })
    }
}

/// Identifies the message as a parameter description.
///
/// Sent in response to a Describe of a prepared statement, ahead of the
/// RowDescription or NoData reply.
#[derive(Debug)]
pub struct ParameterDescription {
    /// Object ID of each parameter data type.
    pub oids: Vec<u32>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 2 {
            return Err(ProtocolError::malformed("ParameterDescription", "missing count"));
        }
        let param_len = body.get_u16();
        if body.remaining() < param_len as usize * 4 {
            return Err(ProtocolError::malformed("ParameterDescription", "truncated oid list"));
        }
        let mut oids = Vec::with_capacity(param_len as usize);
        for _ in 0..param_len {
            oids.push(body.get_u32());
        }
        Ok(Self { oids })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend
/// is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator. Possible values are
    /// `'I'` if idle (not in a transaction block); `'T'` if in a transaction
    /// block; or `'E'` if in a failed transaction block.
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if !body.has_remaining() {
            return Err(ProtocolError::malformed("ReadyForQuery", "missing status byte"));
        }
        Ok(Self { tx_status: body.get_u8() })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major
    /// protocol version requested by the client.
    pub minor: u32,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 4 {
            return Err(ProtocolError::malformed("NegotiateProtocolVersion", "missing version"));
        }
        Ok(Self { minor: body.get_u32() })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected_phase("mistyped", "decode"))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}
