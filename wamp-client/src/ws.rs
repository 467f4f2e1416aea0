//! The WebSocket connection: TCP/TLS socket, HTTP upgrade handshake, and
//! frame-oriented send/receive on top of the codec in `frame`.
//!
//! The connection handles transport errors conservatively: anything
//! unexpected on the socket surfaces as a connection or protocol error and
//! the session above moves to its failed state. Close frames are sent on a
//! best-effort basis.

use std::{collections::HashMap, io, pin::Pin, sync::Arc, task::Poll};

use base64::Engine as _;
use sha1::{Digest as _, Sha1};
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, ReadBuf, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::{
    Error, PeerConfig,
    frame::{self, Decoded, Frame, Opcode},
};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const SUBPROTOCOL: &str = "wamp.2.json";
const MAX_HANDSHAKE_RESPONSE: usize = 16 * 1024;
const READ_CHUNK: usize = 4096;

/// A TCP stream, optionally wrapped in client TLS.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// One logical inbound message, after continuation reassembly.
#[derive(Debug)]
pub(crate) enum WsMessage {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Vec<u8>),
    /// The router pinged us; the caller should answer with a pong.
    Ping(Vec<u8>),
    /// The router is closing the connection.
    Close,
}

/// The reading half: frame accumulation and message reassembly.
pub(crate) struct WsReader<R> {
    stream: R,
    buf: Vec<u8>,
    // (opcode, bytes) of a fragmented message in progress
    partial: Option<(Opcode, Vec<u8>)>,
}

/// The writing half. Every outbound message is a single masked frame.
pub(crate) struct WsWriter<W> {
    stream: W,
}

pub(crate) type SocketReader = WsReader<ReadHalf<MaybeTlsStream>>;
pub(crate) type SocketWriter = WsWriter<WriteHalf<MaybeTlsStream>>;

/// Connects to the router and performs the HTTP upgrade handshake.
pub(crate) async fn connect(config: &PeerConfig) -> Result<(SocketReader, SocketWriter), Error> {
    let address = format!("{}:{}", config.host, config.port);
    tracing::debug!("connecting to {address}");
    let tcp = TcpStream::connect(&address).await?;

    let mut stream = if config.use_tls {
        let connector = tls_connector(config)?;
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|err| Error::Connection(io::Error::other(err)))?;
        let tls = connector.connect(server_name, tcp).await?;
        MaybeTlsStream::Tls(Box::new(tls))
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    upgrade(&mut stream, &config.host, &config.websocket_location).await?;

    let (read_half, write_half) = tokio::io::split(stream);
    Ok((WsReader::new(read_half), WsWriter { stream: write_half }))
}

fn tls_connector(config: &PeerConfig) -> Result<TlsConnector, Error> {
    let mut roots = rustls::RootCertStore::empty();
    match &config.ca_certificate_path {
        Some(path) => {
            let pem = std::fs::read(path)?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                roots
                    .add(cert?)
                    .map_err(|err| Error::Connection(io::Error::other(err)))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    // rustls negotiates TLS 1.2 or newer only
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Performs the HTTP upgrade handshake on an established stream.
///
/// Split out from [`connect`] so tests can drive it over an in-memory duplex.
pub(crate) async fn upgrade<S>(stream: &mut S, host: &str, location: &str) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce: [u8; 16] = rand::random();
    let key = base64::engine::general_purpose::STANDARD.encode(nonce);

    let request = format!(
        "GET /{location} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Origin: wss://{host}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Protocol: {SUBPROTOCOL}\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Read byte-wise up to the blank-line terminator so no frame bytes are
    // consumed from the stream.
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::Connection(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
        response.push(byte[0]);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_HANDSHAKE_RESPONSE {
            return Err(Error::Protocol(
                "oversized handshake response".to_owned(),
            ));
        }
    }

    let response = String::from_utf8_lossy(&response);
    let mut lines = response.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("101") {
        return Err(Error::Protocol(format!(
            "handshake rejected: {status_line:?}"
        )));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol(format!("invalid header line {line:?}")));
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    match headers.get("sec-websocket-accept") {
        Some(received) if *received == accept_key(&key) => {}
        Some(received) => {
            return Err(Error::Protocol(format!(
                "Sec-WebSocket-Accept mismatch: {received:?}"
            )));
        }
        // Some routers omit the accept header; tolerate it like the key
        // exchange is tolerated by intermediaries.
        None => tracing::warn!("router omitted Sec-WebSocket-Accept"),
    }

    tracing::debug!("connection upgraded to {SUBPROTOCOL}");
    Ok(())
}

/// The expected `Sec-WebSocket-Accept` for our key: SHA-1 of key + GUID,
/// base64-encoded.
fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::default();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sha1.finalize())
}

impl<R: AsyncRead + Unpin> WsReader<R> {
    pub(crate) fn new(stream: R) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            partial: None,
        }
    }

    /// Reads one logical message, reassembling continuation frames and
    /// skipping pongs. Fails with a connection error once the socket is gone.
    pub(crate) async fn read_message(&mut self) -> Result<WsMessage, Error> {
        loop {
            while let Decoded::Frame { frame, consumed } =
                frame::decode(&self.buf).map_err(|err| Error::Protocol(err.to_string()))?
            {
                self.buf.drain(..consumed);
                if let Some(message) = self.accept(frame)? {
                    return Ok(message);
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by router",
                )));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn accept(&mut self, frame: Frame) -> Result<Option<WsMessage>, Error> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(WsMessage::Ping(frame.payload))),
            Opcode::Pong => Ok(None),
            Opcode::Close => Ok(Some(WsMessage::Close)),
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(Error::Protocol(
                        "data frame while a fragmented message is in progress".to_owned(),
                    ));
                }
                if frame.fin {
                    Ok(Some(assemble(frame.opcode, frame.payload)?))
                } else {
                    self.partial = Some((frame.opcode, frame.payload));
                    Ok(None)
                }
            }
            Opcode::Continuation => {
                let Some((opcode, mut bytes)) = self.partial.take() else {
                    return Err(Error::Protocol(
                        "continuation frame without a message in progress".to_owned(),
                    ));
                };
                bytes.extend_from_slice(&frame.payload);
                if frame.fin {
                    Ok(Some(assemble(opcode, bytes)?))
                } else {
                    self.partial = Some((opcode, bytes));
                    Ok(None)
                }
            }
        }
    }
}

fn assemble(opcode: Opcode, bytes: Vec<u8>) -> Result<WsMessage, Error> {
    match opcode {
        Opcode::Text => String::from_utf8(bytes)
            .map(WsMessage::Text)
            .map_err(|_| Error::Protocol("text frame payload is not UTF-8".to_owned())),
        Opcode::Binary => Ok(WsMessage::Binary(bytes)),
        _ => unreachable!("only data frames are reassembled"),
    }
}

impl<W: AsyncWrite + Unpin> WsWriter<W> {
    pub(crate) async fn send_text(&mut self, payload: &str) -> Result<(), Error> {
        self.send_frame(Opcode::Text, payload.as_bytes()).await
    }

    pub(crate) async fn send_pong(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send_frame(Opcode::Pong, payload).await
    }

    pub(crate) async fn send_close(&mut self) -> Result<(), Error> {
        self.send_frame(Opcode::Close, &[]).await
    }

    async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), Error> {
        let bytes = frame::encode(opcode, payload);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
