//! Parameter and column values.
use bytes::Bytes;
use time::{Date, PrimitiveDateTime, Time};

use crate::{
    datetime::{self, DateTimeMode},
    ext::UsizeExt,
    postgres::{Oid, PgFormat, oid},
};

/// A single postgres value, a query parameter or one column of a row.
///
/// Values carry their own shape; the target oid only selects the wire
/// layout. Columns with an oid outside the set below decode as [`Text`]
/// or [`Bytea`] depending on the transfer format.
///
/// [`Text`]: Value::Text
/// [`Bytea`]: Value::Bytea
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Timestamp(PrimitiveDateTime),
    Date(Date),
    Time(Time),
}

/// A parameter value serialized for the wire, `None` bytes meaning NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedValue {
    pub format: PgFormat,
    pub bytes: Option<Vec<u8>>,
}

impl EncodedValue {
    /// Bytes this value contributes to a Bind body after its length prefix.
    pub fn wire_len(&self) -> i32 {
        self.bytes.as_ref().map_or(0, |bytes| bytes.len().to_i32())
    }
}

/// An error decoding a wire value into a [`Value`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("row has {row} values but the description has {desc} columns")]
    ColumnCount { row: u16, desc: usize },
    #[error("invalid {0} value")]
    Invalid(&'static str),
    #[error("text value is not valid utf-8")]
    Utf8,
    #[error("truncated value")]
    Truncated,
}

impl Value {
    /// The oid this value would report for itself when the statement did
    /// not specify one.
    pub fn infer_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytea(_) => oid::BYTEA,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
        }
    }

    /// Serialize for a Bind message, in `format`.
    pub(crate) fn encode(&self, format: PgFormat, mode: DateTimeMode) -> EncodedValue {
        let bytes = match format {
            PgFormat::Binary => self.encode_binary(mode),
            PgFormat::Text => self.encode_text(mode),
        };
        EncodedValue { format, bytes }
    }

    fn encode_binary(&self, mode: DateTimeMode) -> Option<Vec<u8>> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(b) => vec![*b as u8],
            Value::Int2(v) => v.to_be_bytes().to_vec(),
            Value::Int4(v) => v.to_be_bytes().to_vec(),
            Value::Int8(v) => v.to_be_bytes().to_vec(),
            Value::Float4(v) => v.to_be_bytes().to_vec(),
            Value::Float8(v) => v.to_be_bytes().to_vec(),
            Value::Text(v) => v.clone().into_bytes(),
            Value::Bytea(v) => v.clone(),
            Value::Timestamp(v) => datetime::encode_timestamp(*v, mode).to_vec(),
            Value::Date(v) => datetime::encode_date(*v).to_vec(),
            Value::Time(v) => datetime::encode_time(*v, mode).to_vec(),
        })
    }

    fn encode_text(&self, _mode: DateTimeMode) -> Option<Vec<u8>> {
        let mut itoa = itoa::Buffer::new();
        Some(match self {
            Value::Null => return None,
            Value::Bool(b) => vec![if *b { b't' } else { b'f' }],
            Value::Int2(v) => itoa.format(*v).as_bytes().to_vec(),
            Value::Int4(v) => itoa.format(*v).as_bytes().to_vec(),
            Value::Int8(v) => itoa.format(*v).as_bytes().to_vec(),
            Value::Float4(v) => format!("{v}").into_bytes(),
            Value::Float8(v) => format!("{v}").into_bytes(),
            Value::Text(v) => v.clone().into_bytes(),
            Value::Bytea(v) => {
                let mut out = Vec::with_capacity(2 + v.len() * 2);
                out.extend_from_slice(b"\\x");
                for byte in v {
                    out.extend_from_slice(format!("{byte:02x}").as_bytes());
                }
                out
            }
            Value::Timestamp(v) => v
                .format(&datetime::TIMESTAMP_TEXT)
                .expect("format is statically known")
                .into_bytes(),
            Value::Date(v) => v
                .format(&datetime::DATE_TEXT)
                .expect("format is statically known")
                .into_bytes(),
            Value::Time(v) => v
                .format(&datetime::TIME_TEXT)
                .expect("format is statically known")
                .into_bytes(),
        })
    }

    /// Decode one wire value, `None` meaning SQL NULL.
    pub(crate) fn decode(
        raw: Option<Bytes>,
        ty: Oid,
        format: PgFormat,
        mode: DateTimeMode,
    ) -> Result<Value, DecodeError> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        match format {
            PgFormat::Binary => Self::decode_binary(raw, ty, mode),
            PgFormat::Text => Self::decode_text(raw, ty, mode),
        }
    }

    fn decode_binary(raw: Bytes, ty: Oid, mode: DateTimeMode) -> Result<Value, DecodeError> {
        Ok(match ty {
            oid::BOOL => Value::Bool(fixed::<1>(&raw)?[0] != 0),
            oid::INT2 => Value::Int2(i16::from_be_bytes(fixed(&raw)?)),
            oid::INT4 => Value::Int4(i32::from_be_bytes(fixed(&raw)?)),
            oid::INT8 => Value::Int8(i64::from_be_bytes(fixed(&raw)?)),
            oid::FLOAT4 => Value::Float4(f32::from_be_bytes(fixed(&raw)?)),
            oid::FLOAT8 => Value::Float8(f64::from_be_bytes(fixed(&raw)?)),
            oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN => {
                Value::Text(utf8(&raw)?)
            }
            oid::TIMESTAMP | oid::TIMESTAMPTZ => {
                Value::Timestamp(datetime::decode_timestamp(fixed(&raw)?, mode)?)
            }
            oid::DATE => Value::Date(datetime::decode_date(fixed(&raw)?)?),
            oid::TIME => Value::Time(datetime::decode_time(fixed(&raw)?, mode)?),
            _ => Value::Bytea(raw.to_vec()),
        })
    }

    fn decode_text(raw: Bytes, ty: Oid, _mode: DateTimeMode) -> Result<Value, DecodeError> {
        let text = utf8(&raw)?;
        Ok(match ty {
            oid::BOOL => match text.as_str() {
                "t" => Value::Bool(true),
                "f" => Value::Bool(false),
                _ => return Err(DecodeError::Invalid("bool")),
            },
            oid::INT2 => Value::Int2(text.parse().map_err(|_| DecodeError::Invalid("int2"))?),
            oid::INT4 => Value::Int4(text.parse().map_err(|_| DecodeError::Invalid("int4"))?),
            oid::INT8 => Value::Int8(text.parse().map_err(|_| DecodeError::Invalid("int8"))?),
            oid::FLOAT4 => Value::Float4(text.parse().map_err(|_| DecodeError::Invalid("float4"))?),
            oid::FLOAT8 => Value::Float8(text.parse().map_err(|_| DecodeError::Invalid("float8"))?),
            oid::BYTEA => Value::Bytea(unhex(&text)?),
            oid::TIMESTAMP | oid::TIMESTAMPTZ => Value::Timestamp(
                PrimitiveDateTime::parse(&text, &datetime::TIMESTAMP_TEXT)
                    .map_err(|_| DecodeError::Invalid("timestamp"))?,
            ),
            oid::DATE => Value::Date(
                Date::parse(&text, &datetime::DATE_TEXT)
                    .map_err(|_| DecodeError::Invalid("date"))?,
            ),
            oid::TIME => Value::Time(
                Time::parse(&text, &datetime::TIME_TEXT)
                    .map_err(|_| DecodeError::Invalid("time"))?,
            ),
            _ => Value::Text(text),
        })
    }
}

fn fixed<const N: usize>(raw: &Bytes) -> Result<[u8; N], DecodeError> {
    raw.as_ref().try_into().map_err(|_| DecodeError::Truncated)
}

fn utf8(raw: &Bytes) -> Result<String, DecodeError> {
    std::str::from_utf8(raw).map(str::to_owned).map_err(|_| DecodeError::Utf8)
}

fn unhex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = text.strip_prefix("\\x").ok_or(DecodeError::Invalid("bytea"))?;
    if digits.len() % 2 != 0 {
        return Err(DecodeError::Invalid("bytea"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| DecodeError::Invalid("bytea")))
        .collect()
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident,)*) => {$(
        impl From<$ty> for Value {
            fn from(value: $ty) -> Value {
                Value::$variant(value)
            }
        }
    )*};
}

value_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    Vec<u8> => Bytea,
    PrimitiveDateTime => Timestamp,
    Date => Date,
    Time => Time,
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
