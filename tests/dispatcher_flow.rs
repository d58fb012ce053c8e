//! Dispatcher-level end-to-end flow: register, create a channel, join it,
//! post a root message, then reply to it and check the reply count.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use superchat_server::connection::Connection;
use superchat_server::db::Store as Db;
use superchat_server::dispatcher::Dispatcher;
use superchat_server::id::SnowflakeGenerator;
use superchat_server::models::{ConnectionType, Session, SessionState, USER_FLAG_ADMIN};
use superchat_server::ratelimit::RateLimiter;
use superchat_server::session::SessionRegistry;
use superchat_server::store::MemoryStore;
use superchat_server::subscription::SubscriptionManager;
use superchat_server::wire::message::*;

/// Records every byte written to it so a test can assert whether a given
/// session ever received a broadcast frame.
#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for RecordingSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn addr() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn new_dispatcher(db_path: &str) -> (Arc<Dispatcher>, Arc<SessionRegistry>) {
    let db = Arc::new(Db::open(db_path, 4, 1).await.unwrap());
    let mem = Arc::new(MemoryStore::load_from(&db).await.unwrap());
    let sessions = Arc::new(SessionRegistry::new());
    let subscriptions = Arc::new(SubscriptionManager::new(50, 20));
    let rate_limiter = Arc::new(RateLimiter::new(120, 8));
    let ids = Arc::new(SnowflakeGenerator::new(1));
    let dispatcher = Arc::new(Dispatcher {
        db,
        mem,
        sessions: sessions.clone(),
        subscriptions,
        rate_limiter,
        ids,
        protocol_version: 2,
        server_config: ServerConfigMessage {
            protocol_version: 2,
            max_message_rate: 120,
            max_channel_creates: 10,
            inactive_cleanup_days: 30,
            max_connections_per_ip: 8,
            max_message_length: 4096,
            max_thread_subscriptions: 50,
            max_channel_subscriptions: 20,
            directory_enabled: false,
        },
    });
    (dispatcher, sessions)
}

fn register_session(sessions: &SessionRegistry, id: i64) {
    let session = Session {
        id,
        user_id: None,
        nickname: String::new(),
        connection_type: ConnectionType::Tcp,
        connected_at: 0,
        last_activity: 0,
        state: SessionState::Unauthenticated,
        remote_ip: "127.0.0.1".parse().unwrap(),
        protocol_version: Some(2),
        shadowbanned: false,
    };
    let conn = Arc::new(Connection::new(id, addr(), Box::new(tokio::io::sink())));
    sessions.register(session, conn);
}

#[tokio::test]
async fn register_create_post_and_reply_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dispatch.sqlite3");
    let (dispatcher, sessions) = new_dispatcher(path.to_str().unwrap()).await;

    register_session(&sessions, 1);

    let register_reply = dispatcher
        .dispatch(1, Message::RegisterUser(RegisterUser { nickname: "alice".into(), password: "correcthorse".into() }))
        .await;
    let Message::RegisterResponse(resp) = register_reply else {
        panic!("expected RegisterResponse, got {register_reply:?}");
    };
    assert!(resp.success, "registration should succeed for a fresh nickname: {:?}", resp.error);
    assert!(resp.user_id.is_some());

    let create_reply = dispatcher
        .dispatch(
            1,
            Message::CreateChannel(CreateChannel {
                name: "general".into(),
                display_name: "General".into(),
                description: None,
                channel_type: 0,
                retention_hours: 0,
                is_private: false,
            }),
        )
        .await;
    let Message::ChannelCreated(ChannelCreated { channel }) = create_reply else {
        panic!("expected ChannelCreated, got {create_reply:?}");
    };

    let join_reply = dispatcher
        .dispatch(1, Message::JoinChannel(JoinChannel { channel_id: channel.id, subchannel_id: None }))
        .await;
    assert!(matches!(join_reply, Message::JoinResponse(JoinResponse { success: true, .. })));

    let post_reply = dispatcher
        .dispatch(
            1,
            Message::PostMessage(PostMessage { channel_id: channel.id, subchannel_id: None, parent_id: None, content: "hello, world".into() }),
        )
        .await;
    let Message::MessagePosted(MessagePosted { success: true, message_id: Some(root_id) }) = post_reply else {
        panic!("expected a successful MessagePosted, got {post_reply:?}");
    };

    let reply_reply = dispatcher
        .dispatch(
            1,
            Message::PostMessage(PostMessage { channel_id: channel.id, subchannel_id: None, parent_id: Some(root_id), content: "a reply".into() }),
        )
        .await;
    assert!(matches!(reply_reply, Message::MessagePosted(MessagePosted { success: true, .. })));

    let root = dispatcher.mem.get_message(root_id).expect("root message should be in the live store");
    assert_eq!(root.reply_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(root.thread_root_id, root_id);
}

#[tokio::test]
async fn posting_to_an_unknown_channel_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dispatch_err.sqlite3");
    let (dispatcher, sessions) = new_dispatcher(path.to_str().unwrap()).await;
    register_session(&sessions, 1);

    dispatcher
        .dispatch(1, Message::RegisterUser(RegisterUser { nickname: "bob".into(), password: "hunter22".into() }))
        .await;

    let reply = dispatcher
        .dispatch(1, Message::PostMessage(PostMessage { channel_id: 9999, subchannel_id: None, parent_id: None, content: "nope".into() }))
        .await;
    assert!(matches!(reply, Message::ErrorMessage(_)), "expected an ErrorMessage reply for a nonexistent channel, got {reply:?}");
}
