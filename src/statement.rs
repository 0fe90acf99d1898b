//! Prepared statement and column descriptors.
use crate::{
    common::ByteStr,
    postgres::{Oid, PgFormat},
};

/// One column of a row-returning statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// The field name.
    pub name: ByteStr,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The wire format values of this column are transferred in.
    pub format: PgFormat,
}

/// A server-side prepared statement.
///
/// Produced by `parse` or `describe_statement`; holds everything needed to
/// bind parameters and decode the rows it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Statement name, empty for the unnamed statement.
    pub name: String,
    /// Parameter data types as reported by the server.
    pub param_types: Vec<Oid>,
    /// Result columns, empty for statements that return no rows.
    pub columns: Vec<Column>,
}
