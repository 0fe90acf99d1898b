//! The connection actor.
//!
//! One task owns the socket, the inbound buffer, the request queue and the
//! per-request accumulator. User commands cross the task boundary as
//! [`Command`] messages and are written to the wire in arrival order;
//! because the backend answers strictly in order, every inbound message
//! belongs to the request at the head of the queue until that request
//! completes.
mod phase;
mod steady;

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc::{UnboundedReceiver, UnboundedSender}, oneshot},
};

use crate::{
    Error, Result,
    common::verbose,
    config::Config,
    datetime::DateTimeMode,
    events::Event,
    net::Socket,
    postgres::{
        BackendMessage, BackendProtocol, Oid, PgFormat, backend,
        backend::BackendKeyData, frontend, preferred_format, ServerError,
    },
    row::Row,
    statement::{Column, Statement},
    value::Value,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// The outcome of one SQL statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Affected or returned row count, when the completion tag carried one.
    pub rows_affected: Option<u64>,
    /// Result columns, empty for statements that return no rows.
    pub columns: Vec<Column>,
    /// Result rows in server order.
    pub rows: Vec<Row>,
}

/// Per-statement outcome inside a (possibly multi-statement) simple query.
pub type StatementResult = Result<QueryResult, ServerError>;

/// The outcome of one `execute` over a bound portal.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    /// The portal ran to completion.
    Complete {
        rows_affected: Option<u64>,
        rows: Vec<Row>,
    },
    /// The row limit was reached and the portal can be executed again for
    /// the remainder.
    Suspended { rows: Vec<Row> },
}

/// Incremental replies delivered to a streaming caller.
#[derive(Debug)]
pub enum QueryEvent {
    /// Parameter types of the statement being described.
    ParamTypes(Vec<Oid>),
    /// Result columns, ahead of any rows.
    Columns(Vec<Column>),
    /// One result row; streamed rows are not retained by the connection.
    Row(Row),
    /// One statement finished.
    Complete { rows_affected: Option<u64> },
    /// The backend reported an error for this request.
    Error(ServerError),
    /// Terminal: the row limit was reached, rows were already streamed.
    Suspended,
    /// Terminal: the request finished.
    Done,
    /// Terminal: the request failed outside the backend protocol.
    Failed(Error),
}

/// A reply delivered to a one-shot caller.
#[derive(Debug)]
pub(crate) enum Reply {
    Connected(BackendKeyData),
    Done,
    Statement(Statement),
    Columns(Vec<Column>),
    Executed(ExecuteResult),
    Batch(Vec<StatementResult>),
}

/// Where a request's replies go.
pub(crate) enum ReplySink {
    /// One final reply.
    Once(Option<oneshot::Sender<Result<Reply>>>),
    /// Incremental events terminated by `Done`, `Suspended` or `Failed`.
    Stream(UnboundedSender<QueryEvent>),
}

impl ReplySink {
    pub(crate) fn once(tx: oneshot::Sender<Result<Reply>>) -> ReplySink {
        ReplySink::Once(Some(tx))
    }

    pub(crate) fn stream(tx: UnboundedSender<QueryEvent>) -> ReplySink {
        ReplySink::Stream(tx)
    }

    fn is_stream(&self) -> bool {
        matches!(self, ReplySink::Stream(_))
    }

    /// Deliver the final reply. Streaming sinks see `Done` or `Failed`
    /// instead of the reply value, which they already received piecewise.
    fn deliver(&mut self, reply: Result<Reply>) {
        match self {
            ReplySink::Once(tx) => {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(reply);
                }
            }
            ReplySink::Stream(tx) => {
                let _ = tx.send(match reply {
                    Ok(_) => QueryEvent::Done,
                    Err(err) => QueryEvent::Failed(err),
                });
            }
        }
    }

    /// Emit an incremental event, a no-op for one-shot sinks.
    fn event(&self, event: QueryEvent) {
        if let ReplySink::Stream(tx) = self {
            let _ = tx.send(event);
        }
    }
}

/// A user command crossing into the actor.
pub(crate) enum Command {
    Squery { sql: String, sink: ReplySink },
    Equery { stmt: Statement, params: Vec<Value>, sink: ReplySink },
    Parse { name: String, sql: String, types: Vec<Oid>, sink: ReplySink },
    Bind { stmt: Statement, portal: String, params: Vec<Value>, sink: ReplySink },
    Execute { stmt: Statement, portal: String, max_rows: i32, sink: ReplySink },
    DescribeStatement { name: String, sink: ReplySink },
    DescribePortal { name: String, sink: ReplySink },
    CloseStatement { name: String, sink: ReplySink },
    ClosePortal { name: String, sink: ReplySink },
    Sync { sink: ReplySink },
    GetParameter { name: String, reply: oneshot::Sender<Option<String>> },
    Terminate { done: oneshot::Sender<()> },
}

impl Command {
    fn into_sink(self) -> Option<ReplySink> {
        match self {
            Command::Squery { sink, .. }
            | Command::Equery { sink, .. }
            | Command::Parse { sink, .. }
            | Command::Bind { sink, .. }
            | Command::Execute { sink, .. }
            | Command::DescribeStatement { sink, .. }
            | Command::DescribePortal { sink, .. }
            | Command::CloseStatement { sink, .. }
            | Command::ClosePortal { sink, .. }
            | Command::Sync { sink } => Some(sink),
            Command::GetParameter { .. } | Command::Terminate { .. } => None,
        }
    }
}

/// One in-flight request: the command kind, the context needed to decode
/// its replies, and where those replies go.
pub(crate) struct Request {
    kind: RequestKind,
    sink: ReplySink,
}

enum RequestKind {
    Connect,
    Squery,
    Equery { stmt: Statement },
    Parse { name: String },
    Bind,
    Execute { stmt: Statement },
    DescribeStatement { name: String },
    DescribePortal,
    Close,
    Sync,
}

/// Copyable discriminant of [`RequestKind`], for dispatching before the
/// queue is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    Connect,
    Squery,
    Equery,
    Parse,
    Bind,
    Execute,
    DescribeStatement,
    DescribePortal,
    Close,
    Sync,
}

impl RequestKind {
    fn head(&self) -> Head {
        match self {
            RequestKind::Connect => Head::Connect,
            RequestKind::Squery => Head::Squery,
            RequestKind::Equery { .. } => Head::Equery,
            RequestKind::Parse { .. } => Head::Parse,
            RequestKind::Bind => Head::Bind,
            RequestKind::Execute { .. } => Head::Execute,
            RequestKind::DescribeStatement { .. } => Head::DescribeStatement,
            RequestKind::DescribePortal => Head::DescribePortal,
            RequestKind::Close => Head::Close,
            RequestKind::Sync => Head::Sync,
        }
    }
}

/// Which per-message dispatcher is active.
enum Phase {
    Auth,
    Init,
    Ready,
}

enum Control {
    Continue,
    /// Terminate cleanly: flush, send Terminate, close the socket.
    Shutdown,
    /// Abort: fail every queued request with the error and drop the socket.
    Teardown(Error),
}

pub(crate) struct Driver {
    socket: Socket,
    buf: BytesMut,
    wbuf: BytesMut,
    commands: UnboundedReceiver<Command>,

    queue: VecDeque<Request>,
    phase: Phase,
    parameters: HashMap<String, String>,
    backend_key: Option<BackendKeyData>,
    tx_status: u8,
    sync_required: bool,
    subscriber: Option<UnboundedSender<Event>>,
    datetime_mode: DateTimeMode,
    user: String,
    password: String,
    term_ack: Option<oneshot::Sender<()>>,

    // per-request scratch, empty at request boundaries
    statement_types: Vec<Oid>,
    columns: Vec<Column>,
    rows: Vec<Row>,
    results: Vec<StatementResult>,
}

impl Driver {
    /// Build the actor with the startup packet staged and the connect
    /// request queued; completion is signaled through `connect`.
    pub(crate) fn new(
        socket: Socket,
        commands: UnboundedReceiver<Command>,
        subscriber: Option<UnboundedSender<Event>>,
        config: &Config,
        connect: ReplySink,
    ) -> Driver {
        let mut wbuf = BytesMut::with_capacity(DEFAULT_BUF_CAPACITY);
        frontend::Startup {
            user: &config.user,
            database: config.database.as_deref(),
        }
        .write(&mut wbuf);

        let mut queue = VecDeque::new();
        queue.push_back(Request { kind: RequestKind::Connect, sink: connect });

        Driver {
            socket,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            wbuf,
            commands,
            queue,
            phase: Phase::Auth,
            parameters: HashMap::new(),
            backend_key: None,
            tx_status: 0,
            sync_required: false,
            subscriber,
            datetime_mode: DateTimeMode::default(),
            user: config.user.clone(),
            password: config.password.clone(),
            term_ack: None,
            statement_types: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            results: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            // everything staged by the previous round goes out before the
            // actor suspends again
            if !self.wbuf.is_empty() {
                if let Err(err) = self.socket.write_all(&self.wbuf).await {
                    return self.teardown(Error::SockError(err.to_string()));
                }
                self.wbuf.clear();
            }

            loop {
                let (tag, body) = match backend::next_frame(&mut self.buf) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => return self.teardown(err.into()),
                };
                let message = match BackendMessage::decode(tag, body) {
                    Ok(message) => message,
                    Err(err) => return self.teardown(err.into()),
                };
                verbose!("(B){}", message.name());
                match self.on_message(message) {
                    Control::Continue => {}
                    Control::Shutdown => return self.graceful_shutdown().await,
                    Control::Teardown(err) => return self.teardown(err),
                }
            }

            // a handler may have staged a reply (password, etc.)
            if !self.wbuf.is_empty() {
                continue;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => match self.on_command(command) {
                        Control::Continue => {}
                        Control::Shutdown => return self.graceful_shutdown().await,
                        Control::Teardown(err) => return self.teardown(err),
                    },
                    // every handle dropped
                    None => return self.graceful_shutdown().await,
                },
                read = self.socket.read_buf(&mut self.buf) => match read {
                    Ok(0) => return self.teardown(Error::SockClosed),
                    Ok(_) => {}
                    Err(err) => return self.teardown(Error::SockError(err.to_string())),
                },
            }
        }
    }

    fn on_message(&mut self, message: BackendMessage) -> Control {
        match self.phase {
            Phase::Auth => self.on_auth_message(message),
            Phase::Init => self.on_init_message(message),
            Phase::Ready => self.on_ready_message(message),
        }
    }

    fn on_command(&mut self, command: Command) -> Control {
        match command {
            // answered from connection state, no wire write
            Command::GetParameter { name, reply } => {
                let _ = reply.send(self.parameters.get(&name).cloned());
                return Control::Continue;
            }
            Command::Terminate { done } => {
                self.term_ack = Some(done);
                return Control::Shutdown;
            }
            command => {
                if self.sync_required && !matches!(command, Command::Sync { .. }) {
                    if let Some(mut sink) = command.into_sink() {
                        sink.deliver(Err(Error::SyncRequired));
                    }
                    return Control::Continue;
                }
                self.dispatch(command);
            }
        }
        Control::Continue
    }

    /// Encode the command onto the wire and append it to the queue.
    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Squery { sql, sink } => {
                frontend::write(frontend::Query { sql: &sql }, &mut self.wbuf);
                self.push(RequestKind::Squery, sink);
            }
            Command::Equery { stmt, params, sink } => {
                self.write_bind(&stmt, "", &params);
                frontend::write(frontend::Execute { portal_name: "", max_rows: 0 }, &mut self.wbuf);
                frontend::write(frontend::Close { variant: b'S', name: "" }, &mut self.wbuf);
                frontend::write(frontend::Sync, &mut self.wbuf);
                self.push(RequestKind::Equery { stmt }, sink);
            }
            Command::Parse { name, sql, types, sink } => {
                frontend::write(
                    frontend::Parse { prepare_name: &name, sql: &sql, data_types: &types },
                    &mut self.wbuf,
                );
                frontend::write(frontend::Describe { kind: b'S', name: &name }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::Parse { name }, sink);
            }
            Command::Bind { stmt, portal, params, sink } => {
                self.write_bind(&stmt, &portal, &params);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::Bind, sink);
            }
            Command::Execute { stmt, portal, max_rows, sink } => {
                frontend::write(frontend::Execute { portal_name: &portal, max_rows }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::Execute { stmt }, sink);
            }
            Command::DescribeStatement { name, sink } => {
                frontend::write(frontend::Describe { kind: b'S', name: &name }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::DescribeStatement { name }, sink);
            }
            Command::DescribePortal { name, sink } => {
                frontend::write(frontend::Describe { kind: b'P', name: &name }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::DescribePortal, sink);
            }
            Command::CloseStatement { name, sink } => {
                frontend::write(frontend::Close { variant: b'S', name: &name }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::Close, sink);
            }
            Command::ClosePortal { name, sink } => {
                frontend::write(frontend::Close { variant: b'P', name: &name }, &mut self.wbuf);
                frontend::write(frontend::Flush, &mut self.wbuf);
                self.push(RequestKind::Close, sink);
            }
            Command::Sync { sink } => {
                frontend::write(frontend::Sync, &mut self.wbuf);
                self.sync_required = false;
                self.push(RequestKind::Sync, sink);
            }
            Command::GetParameter { .. } | Command::Terminate { .. } => unreachable!(),
        }
    }

    fn write_bind(&mut self, stmt: &Statement, portal: &str, params: &[Value]) {
        let encoded: Vec<_> = params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let ty = stmt
                    .param_types
                    .get(i)
                    .copied()
                    .filter(|ty| *ty != 0)
                    .unwrap_or_else(|| param.infer_oid());
                param.encode(preferred_format(ty), self.datetime_mode)
            })
            .collect();
        let result_formats: Vec<PgFormat> = stmt.columns.iter().map(|c| c.format).collect();

        frontend::write(
            frontend::Bind {
                portal_name: portal,
                stmt_name: &stmt.name,
                params: &encoded,
                result_formats: &result_formats,
            },
            &mut self.wbuf,
        );
    }

    fn push(&mut self, kind: RequestKind, sink: ReplySink) {
        self.queue.push_back(Request { kind, sink });
    }

    fn head(&self) -> Option<Head> {
        self.queue.front().map(|req| req.kind.head())
    }

    fn finish_head(&mut self, reply: Reply) {
        self.finish_head_with(Ok(reply));
    }

    fn finish_head_with(&mut self, reply: Result<Reply>) {
        if let Some(mut req) = self.queue.pop_front() {
            req.sink.deliver(reply);
        }
    }

    /// Fail every queued request in order and stop; the socket drops with
    /// the actor.
    fn teardown(&mut self, err: Error) {
        match &err {
            Error::SockClosed | Error::Closed => tracing::debug!("connection terminated: {err}"),
            err => tracing::error!("connection terminated: {err}"),
        }
        while let Some(mut req) = self.queue.pop_front() {
            req.sink.deliver(Err(err.duplicate()));
        }
        if let Some(ack) = self.term_ack.take() {
            let _ = ack.send(());
        }
    }

    /// Flush queued requests with `closed`, announce termination to the
    /// server and shut the socket down.
    async fn graceful_shutdown(mut self) {
        while let Some(mut req) = self.queue.pop_front() {
            req.sink.deliver(Err(Error::Closed));
        }
        frontend::write(frontend::Terminate, &mut self.wbuf);
        if self.socket.write_all(&self.wbuf).await.is_ok() {
            let _ = self.socket.shutdown().await;
        }
        if let Some(ack) = self.term_ack.take() {
            let _ = ack.send(());
        }
    }
}
