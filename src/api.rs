//! WebSocket and SSH transport bindings (spec §4, §6).
//!
//! Both carry the exact same framed binary protocol as the TCP transport in
//! `main`; neither speaks JSON or a shell. The WebSocket side rides axum's
//! `ws` extractor but treats every binary message as one already-framed
//! `Frame`. The SSH side accepts a single channel per connection and treats
//! its raw channel data as the same byte stream `Frame::read_from` expects
//! over TCP — there is no shell, pty, or exec semantics, just the wire
//! protocol running inside the encrypted SSH transport.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use russh::server::{Auth, Msg, Server as _, Session as SshSession};
use russh::{Channel, ChannelId};
use russh_keys::key::KeyPair;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::models::ConnectionType;
use crate::transport;
use crate::wire::Frame;

// ─── WebSocket transport ────────────────────────────────────────────────────

pub fn ws_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(dispatcher)
}

async fn ws_upgrade(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, dispatcher, remote_addr))
}

async fn handle_ws(socket: WebSocket, dispatcher: Arc<Dispatcher>, remote_addr: SocketAddr) {
    let (sink, mut stream) = socket.split();
    let conn = Arc::new(Connection::new(0, remote_addr, Box::new(crate::connection::WsWriter::new(sink))));

    let Some(session_id) = transport::accept_session(&dispatcher, ConnectionType::Ws, remote_addr.ip(), &conn).await else {
        return;
    };

    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let bytes = match msg {
            WsMessage::Binary(b) => b,
            WsMessage::Close(_) => break,
            // Text/Ping/Pong carry no frame; the protocol is binary-only.
            _ => continue,
        };
        let frame = match Frame::decode(&bytes) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(session_id, error = %e, "dropping ws connection on frame error");
                break;
            }
        };
        if !transport::process_frame(&dispatcher, session_id, &conn, frame).await {
            break;
        }
    }

    transport::teardown(&dispatcher, session_id, &conn).await;
}

// ─── SSH transport ──────────────────────────────────────────────────────────

/// One `Server` clone is handed to every accepted connection by russh; state
/// shared across connections goes through the `Arc` inside.
#[derive(Clone)]
pub struct SshTransport {
    dispatcher: Arc<Dispatcher>,
}

impl SshTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn serve(self, bind: &str, host_key_path: &str) -> anyhow::Result<()> {
        let key = load_or_generate_host_key(host_key_path)?;
        let config = Arc::new(russh::server::Config {
            keys: vec![key],
            ..Default::default()
        });
        let addr: SocketAddr = bind.parse()?;
        tracing::info!(%addr, "ssh transport listening");
        russh::server::run(config, addr, self).await?;
        Ok(())
    }
}

impl russh::server::Server for SshTransport {
    type Handler = SshConnection;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> SshConnection {
        SshConnection {
            dispatcher: self.dispatcher.clone(),
            peer_addr: peer_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0))),
            incoming: None,
        }
    }
}

/// Per-connection SSH handler. A session is registered on channel open — the
/// wire protocol then flows over that channel's data exactly as it would
/// over a raw TCP socket. SuperChat has no concept of pubkey-implies-identity:
/// SSH auth just gates the transport, and the wire protocol's own
/// `AUTH_REQUEST`/`REGISTER_USER` establishes who the caller is.
pub struct SshConnection {
    dispatcher: Arc<Dispatcher>,
    peer_addr: SocketAddr,
    incoming: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait::async_trait]
impl russh::server::Handler for SshConnection {
    type Error = anyhow::Error;

    async fn auth_publickey(self, _user: &str, _key: &russh_keys::key::PublicKey) -> Result<(Self, Auth), Self::Error> {
        Ok((self, Auth::Accept))
    }

    async fn auth_password(self, _user: &str, _password: &str) -> Result<(Self, Auth), Self::Error> {
        Ok((self, Auth::Accept))
    }

    async fn channel_open_session(mut self, channel: Channel<Msg>, session: &mut SshSession) -> Result<(Self, bool), Self::Error> {
        let handle = session.handle();
        let channel_id = channel.id();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.incoming = Some(tx);

        let writer = crate::connection::SshWriter::new(handle, channel_id);
        let conn = Arc::new(Connection::new(0, self.peer_addr, Box::new(writer)));

        let dispatcher = self.dispatcher.clone();
        let remote_ip = self.peer_addr.ip();
        tokio::spawn(async move {
            let reader = ChannelReader::new(rx);
            transport::serve_stream(dispatcher, ConnectionType::Ssh, remote_ip, reader, conn).await;
        });

        Ok((self, true))
    }

    async fn data(self, _channel: ChannelId, data: &[u8], session: &mut SshSession) -> Result<Self, Self::Error> {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(data.to_vec());
        }
        let _ = session;
        Ok(self)
    }
}

/// Adapts the `mpsc` stream of raw channel data chunks fed by `Handler::data`
/// into `AsyncRead`, so the SSH transport can reuse the same
/// `Frame::read_from`-based read loop as TCP.
struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: std::collections::VecDeque<u8>,
}

impl ChannelReader {
    fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { rx, pending: std::collections::VecDeque::new() }
    }
}

impl tokio::io::AsyncRead for ChannelReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::Poll;

        if self.pending.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.pending.extend(chunk),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = buf.remaining().min(self.pending.len());
        for _ in 0..n {
            buf.put_slice(&[self.pending.pop_front().unwrap()]);
        }
        Poll::Ready(Ok(()))
    }
}

fn load_or_generate_host_key(path: &str) -> anyhow::Result<KeyPair> {
    if let Ok(bytes) = std::fs::read(path) {
        if let Ok(key) = russh_keys::decode_secret_key(std::str::from_utf8(&bytes)?, None) {
            return Ok(key);
        }
    }
    tracing::info!(path, "generating new ssh host key");
    let key = KeyPair::generate_ed25519().ok_or_else(|| anyhow::anyhow!("failed to generate host key"))?;
    let encoded = russh_keys::encode_pkcs8_pem(&key)?;
    std::fs::write(path, encoded)?;
    Ok(key)
}
