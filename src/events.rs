//! Asynchronous server events and streaming query replies.
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    common::ByteStr,
    driver::QueryEvent,
    postgres::ServerError,
};

/// An asynchronous notification raised by `NOTIFY`.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The process ID of the notifying backend.
    pub process_id: i32,
    /// The channel the notify was raised on.
    pub channel: ByteStr,
    /// The payload string, empty when none was given.
    pub payload: ByteStr,
}

/// A server-initiated event, delivered outside any request's reply.
#[derive(Debug, Clone)]
pub enum Event {
    /// A `NoticeResponse` warning.
    Notice(ServerError),
    /// A `NOTIFY` on a channel this session listens on.
    Notification(Notification),
    /// A run-time parameter changed, reported by `ParameterStatus`.
    Parameter { name: ByteStr, value: ByteStr },
}

/// Receiver half of the async subscriber attached at connect time.
///
/// Delivery never blocks the connection; events buffer here until read.
#[derive(Debug)]
pub struct Events {
    pub(crate) recv: UnboundedReceiver<Event>,
}

impl Events {
    /// Next event, `None` once the connection has terminated.
    pub async fn next(&mut self) -> Option<Event> {
        self.recv.recv().await
    }
}

impl futures_core::Stream for Events {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.recv.poll_recv(cx)
    }
}

/// Incremental replies of a streaming query.
///
/// Yields row and descriptor events as the backend produces them,
/// terminated by [`QueryEvent::Done`] or [`QueryEvent::Suspended`].
#[derive(Debug)]
pub struct QueryEvents {
    pub(crate) recv: UnboundedReceiver<QueryEvent>,
}

impl QueryEvents {
    /// Next event, `None` after the terminal event was consumed.
    pub async fn next(&mut self) -> Option<QueryEvent> {
        self.recv.recv().await
    }
}

impl futures_core::Stream for QueryEvents {
    type Item = QueryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<QueryEvent>> {
        self.recv.poll_recv(cx)
    }
}
