//! An in-process scripted postgres backend.
//!
//! Each test accepts one (or more) connections and plays both sides of the
//! wire: reading frontend frames with assertions and answering with
//! hand-built backend messages.
use bytes::{Buf, BufMut, BytesMut};
use postlink::Config;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub async fn start() -> (MockServer, Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
            user: "alice".into(),
            password: "hunter2".into(),
            database: Some("blog".into()),
            ..Config::default()
        };
        (MockServer { listener }, config)
    }

    pub async fn accept(&self) -> MockConn {
        let (stream, _) = self.listener.accept().await.unwrap();
        MockConn { stream, buf: BytesMut::new() }
    }
}

pub struct MockConn {
    stream: TcpStream,
    buf: BytesMut,
}

impl MockConn {
    async fn fill(&mut self) {
        let n = self.stream.read_buf(&mut self.buf).await.unwrap();
        assert!(n > 0, "client closed the connection mid-script");
    }

    /// Read the untyped startup packet, returning its parameter pairs.
    pub async fn read_startup(&mut self) -> Vec<(String, String)> {
        while self.buf.len() < 4 {
            self.fill().await;
        }
        let len = i32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        while self.buf.len() < len {
            self.fill().await;
        }

        let mut frame = self.buf.split_to(len);
        frame.advance(4);
        assert_eq!(frame.get_i32(), 196608, "protocol version");

        let mut pairs = Vec::new();
        while frame[0] != 0 {
            let name = take_cstr(&mut frame);
            let value = take_cstr(&mut frame);
            pairs.push((name, value));
        }
        pairs
    }

    /// Read one tagged frontend frame.
    pub async fn read_frame(&mut self) -> (u8, BytesMut) {
        while self.buf.len() < 5 {
            self.fill().await;
        }
        let tag = self.buf[0];
        let len = i32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
        while self.buf.len() < 1 + len {
            self.fill().await;
        }
        self.buf.advance(5);
        let body = self.buf.split_to(len - 4);
        (tag, body)
    }

    /// Read a frame and assert its tag.
    pub async fn expect(&mut self, tag: u8) -> BytesMut {
        let (got, body) = self.read_frame().await;
        assert_eq!(got as char, tag as char, "unexpected frontend message");
        body
    }

    /// Read the 16-byte cancel request of a side-channel connection.
    pub async fn read_cancel(&mut self) -> (i32, i32) {
        while self.buf.len() < 16 {
            self.fill().await;
        }
        let mut frame = self.buf.split_to(16);
        assert_eq!(frame.get_i32(), 16);
        assert_eq!(frame.get_i32(), 80877102);
        (frame.get_i32(), frame.get_i32())
    }

    pub async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut out = BytesMut::with_capacity(5 + body.len());
        out.put_u8(tag);
        out.put_i32(4 + body.len() as i32);
        out.put_slice(body);
        self.stream.write_all(&out).await.unwrap();
    }

    /// Startup packet, AuthenticationOk, session parameters, key data,
    /// ReadyForQuery. Returns the startup parameters for inspection.
    pub async fn handshake(&mut self) -> Vec<(String, String)> {
        let params = self.read_startup().await;
        self.auth(0, &[]).await;
        self.parameter_status("integer_datetimes", "on").await;
        self.parameter_status("client_encoding", "UTF8").await;
        self.parameter_status("server_version", "16.3").await;
        self.backend_key(7777, 1234).await;
        self.ready(b'I').await;
        params
    }

    pub async fn auth(&mut self, code: i32, extra: &[u8]) {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        self.send(b'R', &body).await;
    }

    pub async fn parameter_status(&mut self, name: &str, value: &str) {
        self.send(b'S', &[name.as_bytes(), b"\0", value.as_bytes(), b"\0"].concat()).await;
    }

    pub async fn backend_key(&mut self, process_id: i32, secret_key: i32) {
        let mut body = process_id.to_be_bytes().to_vec();
        body.extend_from_slice(&secret_key.to_be_bytes());
        self.send(b'K', &body).await;
    }

    pub async fn ready(&mut self, tx_status: u8) {
        self.send(b'Z', &[tx_status]).await;
    }

    pub async fn error(&mut self, code: &str, message: &str) {
        self.fields(b'E', "ERROR", code, message).await;
    }

    pub async fn notice(&mut self, code: &str, message: &str) {
        self.fields(b'N', "NOTICE", code, message).await;
    }

    async fn fields(&mut self, tag: u8, severity: &str, code: &str, message: &str) {
        let mut body = Vec::new();
        for (field, value) in [(b'S', severity), (b'C', code), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        self.send(tag, &body).await;
    }

    pub async fn command_complete(&mut self, tag: &str) {
        self.send(b'C', &[tag.as_bytes(), b"\0"].concat()).await;
    }

    pub async fn parse_complete(&mut self) {
        self.send(b'1', &[]).await;
    }

    pub async fn bind_complete(&mut self) {
        self.send(b'2', &[]).await;
    }

    pub async fn close_complete(&mut self) {
        self.send(b'3', &[]).await;
    }

    pub async fn no_data(&mut self) {
        self.send(b'n', &[]).await;
    }

    pub async fn portal_suspended(&mut self) {
        self.send(b's', &[]).await;
    }

    pub async fn empty_query(&mut self) {
        self.send(b'I', &[]).await;
    }

    pub async fn parameter_description(&mut self, oids: &[u32]) {
        let mut body = (oids.len() as u16).to_be_bytes().to_vec();
        for oid in oids {
            body.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &body).await;
    }

    /// A RowDescription with all columns in text format, the way a simple
    /// query or a statement Describe reports them.
    pub async fn row_description(&mut self, columns: &[(&str, u32)]) {
        let mut body = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, oid) in columns {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0u32.to_be_bytes()); // table oid
            body.extend_from_slice(&0u16.to_be_bytes()); // attribute number
            body.extend_from_slice(&oid.to_be_bytes());
            body.extend_from_slice(&(-1i16).to_be_bytes()); // type size
            body.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
            body.extend_from_slice(&0u16.to_be_bytes()); // format code
        }
        self.send(b'T', &body).await;
    }

    pub async fn data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut body = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            match value {
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(value) => {
                    body.extend_from_slice(&(value.len() as i32).to_be_bytes());
                    body.extend_from_slice(value);
                }
            }
        }
        self.send(b'D', &body).await;
    }

    pub async fn notification(&mut self, process_id: i32, channel: &str, payload: &str) {
        let mut body = process_id.to_be_bytes().to_vec();
        body.extend_from_slice(channel.as_bytes());
        body.push(0);
        body.extend_from_slice(payload.as_bytes());
        body.push(0);
        self.send(b'A', &body).await;
    }
}

pub fn take_cstr(buf: &mut BytesMut) -> String {
    let pos = buf.iter().position(|b| *b == 0).expect("missing nul");
    let value = String::from_utf8(buf.split_to(pos).to_vec()).unwrap();
    buf.advance(1);
    value
}
