//! Postgres Driver
//!
//! A client for the postgres frontend/backend protocol (version 3) over a
//! single tcp connection, with opportunistic ssl upgrade. One spawned task
//! owns the socket and serializes user commands onto the wire; pipelined
//! requests resolve in submission order.
//!
//! # Examples
//!
//! Simple and extended queries:
//!
//! ```no_run
//! use postlink::{Config, Connection, Value};
//!
//! # async fn app() -> postlink::Result<()> {
//! let config = Config { user: "postgres".into(), ..Config::default() };
//! let conn = Connection::connect(&config).await?;
//!
//! let batch = conn.squery("SELECT 420").await?;
//! assert_eq!(batch[0].as_ref().unwrap().rows[0][0], Value::Int4(420));
//!
//! let res = conn.equery("SELECT $1::int + 1", vec![Value::Int4(41)]).await?;
//! assert_eq!(res.rows[0][0], Value::Int4(42));
//! # Ok(())
//! # }
//! ```
//!
//! The prepare/bind/execute cycle, paging a portal:
//!
//! ```no_run
//! use postlink::{Connection, ExecuteResult, Value};
//!
//! # async fn app(conn: Connection) -> postlink::Result<()> {
//! let stmt = conn.parse("s1", "SELECT generate_series(1, $1)", &[]).await?;
//! conn.bind(&stmt, "c1", vec![Value::Int4(100)]).await?;
//!
//! while let ExecuteResult::Suspended { rows } = conn.execute(&stmt, "c1", 10).await? {
//!     println!("{} more rows", rows.len());
//! }
//!
//! conn.sync().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Transactions:
//!
//! ```no_run
//! use postlink::{Connection, Value};
//!
//! # async fn app(conn: Connection) -> postlink::Result<()> {
//! conn.with_transaction(async |tx| {
//!     tx.equery("INSERT INTO foo(id) VALUES($1)", vec![Value::Int4(14)]).await?;
//!     tx.equery("INSERT INTO foo(id) VALUES($1)", vec![Value::Int4(15)]).await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;
mod net;
mod cancel;

// Protocol
pub mod postgres;

// Encoding
mod datetime;
mod value;

// Component
mod statement;
pub mod row;

// Operation
mod driver;
mod events;

// Connection
mod connection;
pub mod config;

mod error;

#[doc(inline)]
pub use config::{Config, SslMode};
#[doc(inline)]
pub use connection::Connection;
#[doc(inline)]
pub use datetime::DateTimeMode;
#[doc(inline)]
pub use driver::{ExecuteResult, QueryEvent, QueryResult, StatementResult};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use events::{Event, Events, Notification, QueryEvents};
#[doc(inline)]
pub use postgres::{Oid, PgFormat, ServerError, backend::BackendKeyData};
#[doc(inline)]
pub use row::Row;
#[doc(inline)]
pub use statement::{Column, Statement};
#[doc(inline)]
pub use value::{DecodeError, EncodedValue, Value};
