//! The user-facing connection handle.
use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use crate::{
    Error, Result, cancel,
    config::Config,
    driver::{Command, Driver, ExecuteResult, QueryResult, Reply, ReplySink, StatementResult},
    events::{Events, QueryEvents},
    net::{self, Socket},
    postgres::{Oid, ProtocolError, backend::BackendKeyData},
    statement::{Column, Statement},
    value::Value,
};

/// A handle to one postgres connection.
///
/// The connection itself lives on a spawned task; the handle is cheap to
/// clone and every clone talks to the same session. Commands are written
/// to the wire in the order they are submitted and replies come back in
/// that same order, so a handle can pipeline requests by submitting them
/// before awaiting the earlier ones.
///
/// Dropping the last handle terminates the connection.
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    peer: SocketAddr,
    key: BackendKeyData,
}

impl Connection {
    /// Connect and run the startup handshake.
    pub async fn connect(config: &Config) -> Result<Connection> {
        Self::connect_inner(config, None).await
    }

    /// Connect with configuration taken from the environment.
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_inner(&Config::from_env(), None).await
    }

    /// Connect and run the startup handshake via url.
    pub async fn connect_url(url: &str) -> Result<Connection> {
        Self::connect_inner(&Config::parse(url)?, None).await
    }

    /// Connect with an asynchronous event subscriber attached.
    ///
    /// The [`Events`] half receives notices, `LISTEN`/`NOTIFY`
    /// notifications and run-time parameter changes, independent of any
    /// in-flight request.
    pub async fn connect_with_events(config: &Config) -> Result<(Connection, Events)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self::connect_inner(config, Some(tx)).await?;
        Ok((conn, Events { recv: rx }))
    }

    async fn connect_inner(
        config: &Config,
        subscriber: Option<mpsc::UnboundedSender<crate::events::Event>>,
    ) -> Result<Connection> {
        let connect = async {
            let tcp = Socket::connect_tcp(&config.host, config.port).await?;
            let peer = tcp.peer_addr()?;
            let socket = net::maybe_upgrade(tcp, config).await?;

            let (commands, command_rx) = mpsc::unbounded_channel();
            let (tx, rx) = oneshot::channel();

            let driver = Driver::new(socket, command_rx, subscriber, config, ReplySink::once(tx));
            tokio::spawn(driver.run());

            match rx.await {
                Ok(Ok(Reply::Connected(key))) => Ok(Connection { commands, peer, key }),
                Ok(Ok(_)) => unreachable!("connect request resolved with a foreign reply"),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(Error::Closed),
            }
        };

        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// The cancellation key of the server process backing this connection.
    pub fn backend_key(&self) -> BackendKeyData {
        self.key
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    async fn request(&self, build: impl FnOnce(ReplySink) -> Command) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(build(ReplySink::once(tx)))?;
        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Run a simple query, one reply per SQL statement in `sql`.
    ///
    /// A failing statement ends the batch server-side; its error is
    /// attached as the final entry.
    pub async fn squery(&self, sql: impl AsRef<str>) -> Result<Vec<StatementResult>> {
        match self.request(|sink| Command::Squery { sql: sql.as_ref().into(), sink }).await? {
            Reply::Batch(results) => Ok(results),
            _ => unreachable!("simple query resolved with a foreign reply"),
        }
    }

    /// Parse, bind and run `sql` as one anonymous extended-query round.
    pub async fn equery(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        let stmt = self.parse("", sql, &[]).await?;
        match self.request(|sink| Command::Equery { stmt, params, sink }).await? {
            Reply::Batch(mut results) => match results.pop() {
                Some(Ok(result)) => Ok(result),
                Some(Err(err)) => Err(err.into()),
                None => Err(ProtocolError::unexpected_phase("ReadyForQuery", "extended query without completion").into()),
            },
            _ => unreachable!("extended query resolved with a foreign reply"),
        }
    }

    /// Like [`equery`][Connection::equery], but stream the replies
    /// instead of accumulating them.
    pub async fn equery_stream(&self, sql: &str, params: Vec<Value>) -> Result<QueryEvents> {
        let stmt = self.parse("", sql, &[]).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatch(Command::Equery { stmt, params, sink: ReplySink::stream(tx) })?;
        Ok(QueryEvents { recv: rx })
    }

    /// Prepare `sql` as statement `name` and describe it.
    ///
    /// Types the statement leaves unspecified (zero, or beyond the slice)
    /// are inferred by the server.
    pub async fn parse(&self, name: &str, sql: &str, types: &[Oid]) -> Result<Statement> {
        let command = |sink| Command::Parse {
            name: name.into(),
            sql: sql.into(),
            types: types.into(),
            sink,
        };
        match self.request(command).await? {
            Reply::Statement(stmt) => Ok(stmt),
            _ => unreachable!("parse resolved with a foreign reply"),
        }
    }

    /// Bind `params` to a prepared statement, creating portal `portal`.
    pub async fn bind(&self, stmt: &Statement, portal: &str, params: Vec<Value>) -> Result<()> {
        let command = |sink| Command::Bind {
            stmt: stmt.clone(),
            portal: portal.into(),
            params,
            sink,
        };
        match self.request(command).await? {
            Reply::Done => Ok(()),
            _ => unreachable!("bind resolved with a foreign reply"),
        }
    }

    /// Run a bound portal, retrieving at most `max_rows` rows (zero means
    /// no limit). A limited execute may come back
    /// [`Suspended`][ExecuteResult::Suspended]; executing the same portal
    /// again continues it.
    pub async fn execute(
        &self,
        stmt: &Statement,
        portal: &str,
        max_rows: i32,
    ) -> Result<ExecuteResult> {
        let command = |sink| Command::Execute {
            stmt: stmt.clone(),
            portal: portal.into(),
            max_rows,
            sink,
        };
        match self.request(command).await? {
            Reply::Executed(result) => Ok(result),
            _ => unreachable!("execute resolved with a foreign reply"),
        }
    }

    /// Like [`execute`][Connection::execute], but stream rows as they
    /// arrive instead of accumulating them.
    pub fn execute_stream(
        &self,
        stmt: &Statement,
        portal: &str,
        max_rows: i32,
    ) -> Result<QueryEvents> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatch(Command::Execute {
            stmt: stmt.clone(),
            portal: portal.into(),
            max_rows,
            sink: ReplySink::stream(tx),
        })?;
        Ok(QueryEvents { recv: rx })
    }

    /// Describe a prepared statement by name.
    pub async fn describe_statement(&self, name: &str) -> Result<Statement> {
        match self.request(|sink| Command::DescribeStatement { name: name.into(), sink }).await? {
            Reply::Statement(stmt) => Ok(stmt),
            _ => unreachable!("describe resolved with a foreign reply"),
        }
    }

    /// Describe an open portal by name, returning its result columns.
    pub async fn describe_portal(&self, name: &str) -> Result<Vec<Column>> {
        match self.request(|sink| Command::DescribePortal { name: name.into(), sink }).await? {
            Reply::Columns(columns) => Ok(columns),
            _ => unreachable!("describe resolved with a foreign reply"),
        }
    }

    /// Close a prepared statement by name.
    pub async fn close_statement(&self, name: &str) -> Result<()> {
        match self.request(|sink| Command::CloseStatement { name: name.into(), sink }).await? {
            Reply::Done => Ok(()),
            _ => unreachable!("close resolved with a foreign reply"),
        }
    }

    /// Close an open portal by name.
    pub async fn close_portal(&self, name: &str) -> Result<()> {
        match self.request(|sink| Command::ClosePortal { name: name.into(), sink }).await? {
            Reply::Done => Ok(()),
            _ => unreachable!("close resolved with a foreign reply"),
        }
    }

    /// Close the current extended-query group.
    ///
    /// After an extended-query error this is the only command the
    /// connection accepts, and it restores normal processing.
    pub async fn sync(&self) -> Result<()> {
        match self.request(|sink| Command::Sync { sink }).await? {
            Reply::Done => Ok(()),
            _ => unreachable!("sync resolved with a foreign reply"),
        }
    }

    /// Current value of a run-time parameter, as last reported by the
    /// server. Answered locally without a round trip.
    pub async fn get_parameter(&self, name: &str) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Command::GetParameter { name: name.into(), reply: tx })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Ask the server to cancel whatever this connection is running.
    ///
    /// Travels over a fresh connection; the running request, if any,
    /// observes a regular backend error on this one.
    pub async fn cancel(&self) -> Result<()> {
        cancel::send_cancel(self.peer, self.key).await.map_err(Into::into)
    }

    /// Run `body` inside a transaction.
    ///
    /// Emits `BEGIN` before and `COMMIT` after; any failure from `body`
    /// triggers `ROLLBACK` and comes back wrapped in
    /// [`Error::Rollback`].
    pub async fn with_transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: AsyncFnOnce(&Connection) -> Result<T>,
    {
        single(self.squery("BEGIN").await?)?;
        match body(self).await {
            Ok(value) => {
                single(self.squery("COMMIT").await?)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.squery("ROLLBACK").await {
                    tracing::warn!("rollback failed: {rollback}");
                }
                Err(Error::Rollback(Box::new(err)))
            }
        }
    }

    /// Gracefully close the connection.
    ///
    /// Pending requests fail with [`Error::Closed`]; repeated calls are
    /// no-ops.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.dispatch(Command::Terminate { done: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// First entry of a single-statement batch.
fn single(mut results: Vec<StatementResult>) -> Result<QueryResult> {
    match results.drain(..).next() {
        Some(Ok(result)) => Ok(result),
        Some(Err(err)) => Err(err.into()),
        None => Err(ProtocolError::unexpected_phase("ReadyForQuery", "query without completion").into()),
    }
}
