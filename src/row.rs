//! Decoded result rows.
use bytes::Buf;

use crate::{
    datetime::DateTimeMode,
    postgres::backend::DataRow,
    statement::Column,
    value::{DecodeError, Value},
};

/// One result row, values decoded in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Returns the number of columns in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `idx`, `None` when out of range.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Row {
        Row { values }
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Decode a DataRow against the column set that currently describes the
/// result, pairing each `i32`-length-prefixed wire value (`-1` meaning
/// NULL) with its column's oid and transfer format.
pub(crate) fn decode_data_row(
    row: DataRow,
    columns: &[Column],
    mode: DateTimeMode,
) -> Result<Row, DecodeError> {
    let DataRow { column_len, mut body } = row;
    if column_len as usize != columns.len() {
        return Err(DecodeError::ColumnCount { row: column_len, desc: columns.len() });
    }

    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if body.remaining() < 4 {
            return Err(DecodeError::Truncated);
        }
        let len = body.get_i32();
        let raw = match len {
            -1 => None,
            len if len < 0 || body.remaining() < len as usize => {
                return Err(DecodeError::Truncated);
            }
            len => Some(body.split_to(len as usize)),
        };
        values.push(Value::decode(raw, column.type_oid, column.format, mode)?);
    }

    Ok(Row { values })
}
