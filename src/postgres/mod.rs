//! Postgres protocol types and message codecs.
pub mod backend;
pub mod frontend;
mod error;

pub use backend::{BackendMessage, BackendProtocol};
pub use error::{ProtocolError, ServerError};
pub use frontend::FrontendProtocol;

/// Postgres object id of a data type.
pub type Oid = u32;

/// Postgres data transmission format.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the text representation there is no trailing null character;
    /// embedded nulls are not allowed.
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order.
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Format for a given wire format code, any nonzero code is binary.
    pub fn from_code(code: u16) -> PgFormat {
        match code {
            0 => PgFormat::Text,
            _ => PgFormat::Binary,
        }
    }
}

/// Object ids of the types this driver encodes and decodes natively.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
}

/// Transmission format this driver asks for when it may choose.
///
/// Well known oids have a stable binary layout; everything else stays
/// in text so the value survives as a string.
pub fn preferred_format(ty: Oid) -> PgFormat {
    match ty {
        oid::BOOL
        | oid::BYTEA
        | oid::INT2
        | oid::INT4
        | oid::INT8
        | oid::FLOAT4
        | oid::FLOAT8
        | oid::DATE
        | oid::TIME
        | oid::TIMESTAMP
        | oid::TIMESTAMPTZ => PgFormat::Binary,
        _ => PgFormat::Text,
    }
}
