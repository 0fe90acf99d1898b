//! Steady-state message dispatch.
//!
//! Every inbound message is consumed on behalf of the request at the head
//! of the queue; how it is consumed depends on that request's kind.
use super::{
    Control, Driver, ExecuteResult, Head, QueryEvent, QueryResult, Reply, RequestKind,
};
use crate::{
    Error,
    events::{Event, Notification},
    postgres::{BackendMessage, ProtocolError, ServerError, backend, preferred_format},
    row::decode_data_row,
    statement::{Column, Statement},
};

impl Driver {
    pub(super) fn on_ready_message(&mut self, message: BackendMessage) -> Control {
        match message {
            // the reply to Parse is driven by the messages that follow it
            BackendMessage::ParseComplete(_) => Control::Continue,

            BackendMessage::BindComplete(_) => {
                // inside equery the bind is implicit and carries no reply
                if self.head() == Some(Head::Bind) {
                    self.finish_head(Reply::Done);
                }
                Control::Continue
            }

            BackendMessage::CloseComplete(_) => {
                if self.head() == Some(Head::Close) {
                    self.finish_head(Reply::Done);
                }
                Control::Continue
            }

            BackendMessage::ParameterDescription(desc) => {
                if let Some(req) = self.queue.front() {
                    req.sink.event(QueryEvent::ParamTypes(desc.oids.clone()));
                }
                self.statement_types = desc.oids;
                Control::Continue
            }

            BackendMessage::RowDescription(desc) => self.on_row_description(desc.columns),
            BackendMessage::NoData(_) => self.on_no_data(),
            BackendMessage::DataRow(row) => self.on_data_row(row),
            BackendMessage::PortalSuspended(_) => self.on_portal_suspended(),
            BackendMessage::CommandComplete(complete) => self.on_command_complete(complete),
            BackendMessage::EmptyQueryResponse(_) => self.on_empty_query(),
            BackendMessage::ReadyForQuery(ready) => self.on_ready_for_query(ready),
            BackendMessage::ErrorResponse(err) => self.on_error_response(err),

            BackendMessage::NoticeResponse(notice) => {
                self.publish(Event::Notice(notice));
                Control::Continue
            }

            BackendMessage::ParameterStatus(status) => {
                self.parameters
                    .insert(status.name.to_string(), status.value.to_string());
                self.publish(Event::Parameter { name: status.name, value: status.value });
                Control::Continue
            }

            BackendMessage::NotificationResponse(notification) => {
                self.publish(Event::Notification(Notification {
                    process_id: notification.process_id,
                    channel: notification.channel,
                    payload: notification.payload,
                }));
                Control::Continue
            }

            other @ (BackendMessage::Authentication(_)
            | BackendMessage::BackendKeyData(_)
            | BackendMessage::NegotiateProtocolVersion(_)) => Control::Teardown(
                ProtocolError::unexpected_phase(other.name(), "query cycle").into(),
            ),
        }
    }

    fn on_row_description(&mut self, columns: Vec<Column>) -> Control {
        match self.head() {
            // a statement Describe reports format codes as zero; annotate
            // each column with the format the driver will actually request
            Some(Head::Parse) | Some(Head::DescribeStatement) => {
                let columns = columns
                    .into_iter()
                    .map(|c| Column { format: preferred_format(c.type_oid), ..c })
                    .collect();
                let param_types = std::mem::take(&mut self.statement_types);

                let mut req = self.queue.pop_front().expect("head checked above");
                let name = match req.kind {
                    RequestKind::Parse { name } | RequestKind::DescribeStatement { name } => name,
                    _ => unreachable!(),
                };
                req.sink
                    .deliver(Ok(Reply::Statement(Statement { name, param_types, columns })));
            }
            Some(Head::DescribePortal) => {
                self.finish_head(Reply::Columns(columns));
            }
            _ => {
                if let Some(req) = self.queue.front() {
                    req.sink.event(QueryEvent::Columns(columns.clone()));
                }
                self.columns = columns;
            }
        }
        Control::Continue
    }

    fn on_no_data(&mut self) -> Control {
        match self.head() {
            Some(Head::Parse) | Some(Head::DescribeStatement) => {
                let param_types = std::mem::take(&mut self.statement_types);
                let mut req = self.queue.pop_front().expect("head checked above");
                let name = match req.kind {
                    RequestKind::Parse { name } | RequestKind::DescribeStatement { name } => name,
                    _ => unreachable!(),
                };
                req.sink.deliver(Ok(Reply::Statement(Statement {
                    name,
                    param_types,
                    columns: Vec::new(),
                })));
            }
            Some(Head::DescribePortal) => {
                self.finish_head(Reply::Columns(Vec::new()));
            }
            _ => {}
        }
        Control::Continue
    }

    fn on_data_row(&mut self, row: backend::DataRow) -> Control {
        let row = {
            let columns = match self.queue.front().map(|req| &req.kind) {
                Some(RequestKind::Equery { stmt }) | Some(RequestKind::Execute { stmt }) => {
                    &stmt.columns
                }
                _ => &self.columns,
            };
            match decode_data_row(row, columns, self.datetime_mode) {
                Ok(row) => row,
                Err(err) => return Control::Teardown(err.into()),
            }
        };

        let streaming = matches!(self.queue.front(), Some(req) if req.sink.is_stream());
        if streaming {
            if let Some(req) = self.queue.front() {
                req.sink.event(QueryEvent::Row(row));
            }
        } else {
            self.rows.push(row);
        }
        Control::Continue
    }

    fn on_portal_suspended(&mut self) -> Control {
        let rows = std::mem::take(&mut self.rows);
        if let Some(mut req) = self.queue.pop_front() {
            if req.sink.is_stream() {
                // rows were already streamed, the suspension is terminal
                req.sink.event(QueryEvent::Suspended);
            } else {
                req.sink.deliver(Ok(Reply::Executed(ExecuteResult::Suspended { rows })));
            }
        }
        Control::Continue
    }

    fn on_command_complete(&mut self, complete: backend::CommandComplete) -> Control {
        let rows_affected = rows_affected(&complete.tag);
        match self.head() {
            Some(Head::Execute) => {
                let rows = std::mem::take(&mut self.rows);
                let mut req = self.queue.pop_front().expect("head checked above");
                req.sink.event(QueryEvent::Complete { rows_affected });
                req.sink
                    .deliver(Ok(Reply::Executed(ExecuteResult::Complete { rows_affected, rows })));
            }
            Some(Head::Squery) | Some(Head::Equery) => {
                let columns = match self.queue.front().map(|req| &req.kind) {
                    Some(RequestKind::Equery { stmt }) => stmt.columns.clone(),
                    _ => std::mem::take(&mut self.columns),
                };
                if let Some(req) = self.queue.front() {
                    req.sink.event(QueryEvent::Complete { rows_affected });
                }
                self.results.push(Ok(QueryResult {
                    rows_affected,
                    columns,
                    rows: std::mem::take(&mut self.rows),
                }));
            }
            _ => {}
        }
        Control::Continue
    }

    fn on_empty_query(&mut self) -> Control {
        match self.head() {
            Some(Head::Execute) => {
                let mut req = self.queue.pop_front().expect("head checked above");
                req.sink.event(QueryEvent::Complete { rows_affected: None });
                req.sink.deliver(Ok(Reply::Executed(ExecuteResult::Complete {
                    rows_affected: None,
                    rows: Vec::new(),
                })));
            }
            Some(Head::Squery) | Some(Head::Equery) => {
                self.results.push(Ok(QueryResult::default()));
            }
            _ => {}
        }
        Control::Continue
    }

    fn on_ready_for_query(&mut self, ready: backend::ReadyForQuery) -> Control {
        self.tx_status = ready.tx_status;
        tracing::trace!("ready for query, tx status {:?}", self.tx_status as char);

        match self.head() {
            Some(Head::Squery) | Some(Head::Equery) => {
                let results = std::mem::take(&mut self.results);
                self.finish_head(Reply::Batch(results));
            }
            Some(Head::Sync) => self.finish_head(Reply::Done),
            // a cycle whose owner already finished (or none at all) only
            // refreshes the transaction status
            _ => {}
        }
        Control::Continue
    }

    fn on_error_response(&mut self, err: ServerError) -> Control {
        match self.head() {
            // simple and extended queries attach the error to their result
            // sequence; the ReadyForQuery that follows delivers it
            Some(Head::Squery) | Some(Head::Equery) => {
                if let Some(req) = self.queue.front() {
                    req.sink.event(QueryEvent::Error(err.clone()));
                }
                self.columns.clear();
                self.rows.clear();
                self.results.push(Err(err));
            }
            Some(Head::Sync) => {
                self.finish_head_with(Err(err.into()));
            }
            Some(_) => {
                self.finish_head_with(Err(err.into()));
                self.statement_types.clear();
                self.columns.clear();
                self.rows.clear();

                // the backend discards everything already pipelined until
                // the next Sync; fail those requests locally. The queued
                // sync, if any, stays to consume its ReadyForQuery.
                loop {
                    let head_is_sync = match self.queue.front() {
                        Some(req) => matches!(req.kind, RequestKind::Sync),
                        None => {
                            self.sync_required = true;
                            break;
                        }
                    };
                    if head_is_sync {
                        break;
                    }
                    let mut req = self.queue.pop_front().expect("peeked above");
                    req.sink.deliver(Err(Error::SyncRequired));
                }
            }
            None => tracing::warn!("backend error outside any request: {err}"),
        }
        Control::Continue
    }

    fn publish(&self, event: Event) {
        match &self.subscriber {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => match event {
                Event::Notice(notice) => tracing::warn!("{notice}"),
                Event::Notification(notification) => tracing::debug!(
                    "notification on {:?} dropped, no subscriber attached",
                    notification.channel
                ),
                Event::Parameter { .. } => {}
            },
        }
    }
}

/// Extract the row count from a command tag, when it carries one.
///
/// `SELECT 3` and `UPDATE 1` report the count as the trailing word,
/// `INSERT 0 5` behind the legacy oid, and tags like `CREATE TABLE` none
/// at all.
fn rows_affected(tag: &str) -> Option<u64> {
    let mut words = tag.split_whitespace();
    let _verb = words.next()?;
    let count = words.next_back()?;
    if !count.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    count.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::rows_affected;

    #[test]
    fn command_tags_with_counts() {
        assert_eq!(rows_affected("SELECT 3"), Some(3));
        assert_eq!(rows_affected("UPDATE 0"), Some(0));
        assert_eq!(rows_affected("INSERT 0 5"), Some(5));
        assert_eq!(rows_affected("COPY 12"), Some(12));
    }

    #[test]
    fn command_tags_without_counts() {
        assert_eq!(rows_affected("BEGIN"), None);
        assert_eq!(rows_affected("CREATE TABLE"), None);
        assert_eq!(rows_affected("SET"), None);
        assert_eq!(rows_affected(""), None);
    }
}
