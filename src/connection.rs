//! Write-safe connection wrapper (spec §4.6).
//!
//! The mutex spans the entire frame write (header + payload + flush), which
//! is exactly the section that must never interleave across concurrent
//! producers (a request handler replying to its own session, and N
//! broadcaster tasks fanning a frame out to every other member of a
//! channel). Reads never take this lock — the owning task's read loop reads
//! directly off its half of the stream.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::wire::Frame;

/// How long a single frame write may take before we give up on a recipient
/// and close it. This is the "bounded outbound queue" of spec §4.7 in its
/// simplest form: a slow reader eventually blocks on TCP backpressure, and
/// we refuse to let that stall the other recipients of a broadcast.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapts an axum WebSocket sink to `AsyncWrite` by buffering writes and
/// flushing them as a single binary message — safe because every call site
/// in this crate does exactly one `write_all` followed by one `flush` per
/// frame (see `Frame::write_to`).
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message>,
    buf: Vec<u8>,
}

impl WsWriter {
    pub fn new(sink: futures_util::stream::SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message>) -> Self {
        Self { sink, buf: Vec::new() }
    }
}

impl AsyncWrite for WsWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        use futures_util::SinkExt;
        let this = self.get_mut();
        if this.buf.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let message = axum::extract::ws::Message::Binary(std::mem::take(&mut this.buf));
        let fut = this.sink.send(message);
        tokio::pin!(fut);
        match fut.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.poll_flush(cx)
    }
}

/// Adapts an SSH channel handle to `AsyncWrite` the same way `WsWriter`
/// adapts a WebSocket sink: buffer writes, flush them as one
/// `Handle::data` call per frame.
pub struct SshWriter {
    handle: russh::server::Handle,
    channel_id: russh::ChannelId,
    buf: Vec<u8>,
}

impl SshWriter {
    pub fn new(handle: russh::server::Handle, channel_id: russh::ChannelId) -> Self {
        Self { handle, channel_id, buf: Vec::new() }
    }
}

impl AsyncWrite for SshWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.buf.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let data = russh::CryptoVec::from(std::mem::take(&mut this.buf));
        let fut = this.handle.data(this.channel_id, data);
        tokio::pin!(fut);
        match fut.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(_)) => Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "ssh channel closed"))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.poll_flush(cx)
    }
}

/// A connection's write half, behind a mutex, tagged with the transport
/// type for logging and presence reporting.
pub struct Connection {
    pub session_id: i64,
    pub remote_addr: SocketAddr,
    write: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    /// Protocol version the peer advertised at handshake; `0` means
    /// unknown, which `Frame::encode` treats as "never compress".
    peer_version: AtomicU8,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(session_id: i64, remote_addr: SocketAddr, write: Box<dyn AsyncWrite + Send>) -> Self {
        Self {
            session_id,
            remote_addr,
            write: Mutex::new(Pin::from(write)),
            peer_version: AtomicU8::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_peer_version(&self, version: u8) {
        self.peer_version.store(version, Ordering::Relaxed);
    }

    pub fn peer_version(&self) -> Option<u8> {
        match self.peer_version.load(Ordering::Relaxed) {
            0 => None,
            v => Some(v),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Encode and write a frame, compressing it according to the peer's
    /// advertised protocol version. The only legal way to put bytes on the
    /// wire for this connection (spec §4.6: "the raw connection is not
    /// exposed").
    pub async fn encode_frame(&self, frame: &Frame) -> std::io::Result<()> {
        self.write_bytes(&frame.encode(self.peer_version())).await
    }

    /// Write pre-encoded bytes under the connection's write lock. Used by
    /// broadcasters that encode a frame once and fan it out to many
    /// connections without re-encoding per recipient.
    pub async fn write_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "connection closed"));
        }
        let result = tokio::time::timeout(WRITE_TIMEOUT, async {
            let mut guard = self.write.lock().await;
            guard.write_all(bytes).await?;
            guard.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.closed.store(true, Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                tracing::warn!(session_id = self.session_id, "write timed out, closing connection");
                self.closed.store(true, Ordering::Relaxed);
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))
            }
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let mut guard = self.write.lock().await;
        let _ = guard.shutdown().await;
    }
}
