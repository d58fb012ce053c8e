//! Shared per-connection read loop used by all three transports (spec §4.6,
//! §4.10). TCP and SSH feed it a byte stream and reuse `Frame::read_from`
//! directly; the WebSocket transport in [`crate::api`] decodes one frame per
//! binary message instead, since axum already gives it message boundaries,
//! then calls [`process_frame`] with the result.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::dispatcher::Dispatcher;
use crate::models::{now_ms, ConnectionType, Session, SessionState};
use crate::ratelimit;
use crate::wire::message::{ErrorMessage, Message, ServerPresence};
use crate::wire::{Frame, FrameError};

use crate::connection::Connection;

/// Registers a freshly-accepted session, checking IP bans up front. Returns
/// `None` (after closing `conn`) if the IP is banned — the caller should not
/// proceed to the read loop in that case.
pub async fn accept_session(
    dispatcher: &Dispatcher,
    connection_type: ConnectionType,
    remote_ip: IpAddr,
    conn: &Arc<Connection>,
) -> Option<i64> {
    if let Ok(Some(ban)) = ratelimit::check_ip_ban(&dispatcher.db, remote_ip).await {
        tracing::info!(%remote_ip, reason = %ban.reason, "rejecting connection from banned ip");
        conn.close().await;
        return None;
    }

    let session_id = dispatcher.ids.next_id();
    let now = now_ms();
    let session = Session {
        id: session_id,
        user_id: None,
        nickname: format!("guest-{session_id}"),
        connection_type,
        connected_at: now,
        last_activity: now,
        state: SessionState::Unauthenticated,
        remote_ip,
        protocol_version: None,
        shadowbanned: false,
    };
    dispatcher.sessions.register(session, conn.clone());

    // spec §6: "0x98 ServerConfig (unsolicited after successful session start)".
    let config_frame = Frame::new(
        dispatcher.protocol_version,
        Message::ServerConfigMessage(dispatcher.server_config.clone()).msg_type(),
        Message::ServerConfigMessage(dispatcher.server_config.clone()).encode(),
    );
    let _ = conn.encode_frame(&config_frame).await;

    Some(session_id)
}

/// Full lifetime of a byte-stream connection (TCP, SSH channel): register,
/// read frames until EOF/error, then tear everything down. The WebSocket
/// transport doesn't use this directly since its reads are message-bounded,
/// not byte-stream — see `api::handle_ws`.
pub async fn serve_stream<R>(dispatcher: Arc<Dispatcher>, connection_type: ConnectionType, remote_ip: IpAddr, mut reader: R, conn: Arc<Connection>)
where
    R: AsyncRead + Unpin + Send,
{
    let Some(session_id) = accept_session(&dispatcher, connection_type, remote_ip, &conn).await else {
        return;
    };

    loop {
        match Frame::read_from(&mut reader).await {
            Ok(frame) => {
                if !process_frame(&dispatcher, session_id, &conn, frame).await {
                    break;
                }
            }
            Err(FrameError::Io(_)) => break,
            Err(e) => {
                tracing::debug!(session_id, error = %e, "dropping connection on frame error");
                break;
            }
        }
    }

    teardown(&dispatcher, session_id, &conn).await;
}

/// Decode and dispatch one already-framed message, writing the reply (and
/// any side-effect broadcasts, performed inside the dispatcher) back over
/// `conn`. Returns `false` if the caller should stop reading (a
/// client-initiated `Disconnect` or a write failure).
pub async fn process_frame(dispatcher: &Dispatcher, session_id: i64, conn: &Connection, frame: Frame) -> bool {
    conn.set_peer_version(frame.version);
    let reply = match Message::decode(frame.msg_type, &frame.payload) {
        Ok(Message::Disconnect(_)) => return false,
        Ok(msg) => dispatcher.dispatch(session_id, msg).await,
        Err(e) => Message::ErrorMessage(ErrorMessage::from_server_error(&e)),
    };
    let reply_frame = Frame::new(dispatcher.protocol_version, reply.msg_type(), reply.encode());
    conn.encode_frame(&reply_frame).await.is_ok()
}

/// spec §4.10: "On read error or clean disconnect, the dispatcher
/// deregisters the session, emits a server-wide `ServerPresence(online=false)`,
/// and exits."
pub async fn teardown(dispatcher: &Dispatcher, session_id: i64, conn: &Connection) {
    let departed = dispatcher.sessions.get_session(session_id);
    dispatcher.sessions.deregister(session_id);
    dispatcher.subscriptions.clear_session(session_id);
    dispatcher.rate_limiter.clear_session(session_id);
    conn.close().await;

    if let Some(session) = departed {
        let presence = Message::ServerPresence(ServerPresence {
            user_id: session.user_id.unwrap_or(0),
            nickname: session.nickname,
            online: false,
        });
        let frame = Frame::new(dispatcher.protocol_version, presence.msg_type(), presence.encode());
        dispatcher.sessions.broadcast_server_wide(&frame).await;
    }
}
