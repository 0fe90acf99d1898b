//! Cancel side-channel.
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::postgres::{backend::BackendKeyData, frontend};

/// Ask the server to cancel whatever the target backend is running.
///
/// Cancellation travels on its own short-lived connection; the request is a
/// best effort signal and the running query, if any, reports a regular
/// error on its own connection.
pub(crate) async fn send_cancel(addr: SocketAddr, key: BackendKeyData) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;

    let mut buf = BytesMut::with_capacity(16);
    frontend::CancelRequest {
        process_id: key.process_id,
        secret_key: key.secret_key,
    }
    .write(&mut buf);

    stream.write_all(&buf).await?;
    stream.shutdown().await
}
