//! Session registry & presence (spec §4.7).
//!
//! Membership and subscription sets are per-session; fan-out drives every
//! recipient's write concurrently via `join_all`, and each recipient's bytes
//! are serialized by its own connection mutex (spec §4.6), so a slow
//! recipient's write can't block the others from being polled.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::Connection;
use crate::models::Session;
use crate::wire::message::{ChannelPresence, Message};
use crate::wire::Frame;

#[derive(Default)]
pub struct SessionMembership {
    pub channels: HashSet<i64>,
}

struct Entry {
    session: parking_lot::RwLock<Session>,
    conn: Arc<Connection>,
    membership: parking_lot::RwLock<SessionMembership>,
}

/// Maps session ids to their connection and membership state, and indexes
/// channel membership for broadcast fan-out. Never held across network I/O
/// (spec §5) — every broadcast path acquires the registry only long enough
/// to copy out the recipient list, then releases it before writing.
pub struct SessionRegistry {
    sessions: DashMap<i64, Entry>,
    by_user: DashMap<i64, HashSet<i64>>,
    by_channel: DashMap<i64, HashSet<i64>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            by_channel: DashMap::new(),
        }
    }

    pub fn register(&self, session: Session, conn: Arc<Connection>) {
        let id = session.id;
        if let Some(user_id) = session.user_id {
            self.by_user.entry(user_id).or_default().insert(id);
        }
        self.sessions.insert(
            id,
            Entry {
                session: parking_lot::RwLock::new(session),
                conn,
                membership: parking_lot::RwLock::new(SessionMembership::default()),
            },
        );
    }

    pub fn deregister(&self, id: i64) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            let session = entry.session.read();
            if let Some(user_id) = session.user_id {
                if let Some(mut set) = self.by_user.get_mut(&user_id) {
                    set.remove(&id);
                }
            }
            for channel_id in entry.membership.read().channels.iter() {
                if let Some(mut set) = self.by_channel.get_mut(channel_id) {
                    set.remove(&id);
                }
            }
        }
    }

    pub fn get_session(&self, id: i64) -> Option<Session> {
        self.sessions.get(&id).map(|e| e.session.read().clone())
    }

    pub fn update_session<F: FnOnce(&mut Session)>(&self, id: i64, f: F) {
        if let Some(entry) = self.sessions.get(&id) {
            f(&mut entry.session.write());
        }
    }

    pub fn connection(&self, id: i64) -> Option<Arc<Connection>> {
        self.sessions.get(&id).map(|e| e.conn.clone())
    }

    pub fn sessions_for_user(&self, user_id: i64) -> Vec<i64> {
        self.by_user.get(&user_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn all_session_ids(&self) -> Vec<i64> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn online_user_ids(&self) -> HashSet<i64> {
        self.by_user.iter().filter(|e| !e.value().is_empty()).map(|e| *e.key()).collect()
    }

    /// Session ids whose `last_activity` is older than `cutoff_ms` (spec
    /// §5: "a background sweeper closes idle sessions").
    pub fn idle_since(&self, cutoff_ms: i64) -> Vec<i64> {
        self.sessions
            .iter()
            .filter(|e| e.session.read().last_activity < cutoff_ms)
            .map(|e| *e.key())
            .collect()
    }

    // ─── Channel membership ──────────────────────────────────────────────

    pub fn join_channel(&self, session_id: i64, channel_id: i64) {
        if let Some(entry) = self.sessions.get(&session_id) {
            entry.membership.write().channels.insert(channel_id);
        }
        self.by_channel.entry(channel_id).or_default().insert(session_id);
    }

    pub fn leave_channel(&self, session_id: i64, channel_id: i64) {
        if let Some(entry) = self.sessions.get(&session_id) {
            entry.membership.write().channels.remove(&channel_id);
        }
        if let Some(mut set) = self.by_channel.get_mut(&channel_id) {
            set.remove(&session_id);
        }
    }

    pub fn channel_members(&self, channel_id: i64) -> Vec<i64> {
        self.by_channel.get(&channel_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn is_member(&self, session_id: i64, channel_id: i64) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|e| e.membership.read().channels.contains(&channel_id))
    }

    // ─── Broadcast fan-out ───────────────────────────────────────────────

    /// Deliver pre-encoded frame bytes to one session. Shadowbanned senders
    /// still get their own echo (they're never told), but callers exclude
    /// the offender from fan-out to *others* by filtering session ids before
    /// calling this for the broadcast case — see `dispatcher`.
    async fn deliver(&self, session_id: i64, bytes: Arc<Vec<u8>>) {
        let Some(conn) = self.connection(session_id) else { return };
        if conn.write_bytes(&bytes).await.is_err() {
            self.deregister(session_id);
        }
    }

    pub async fn broadcast_to_channel(&self, channel_id: i64, frame: &Frame, exclude: Option<i64>) {
        let recipients = self.channel_members(channel_id);
        self.fan_out(recipients, frame, exclude).await;
    }

    pub async fn broadcast_to_thread_subscribers(&self, subscribers: Vec<i64>, frame: &Frame, exclude: Option<i64>) {
        self.fan_out(subscribers, frame, exclude).await;
    }

    pub async fn broadcast_server_wide(&self, frame: &Frame) {
        let recipients = self.all_session_ids();
        self.fan_out(recipients, frame, None).await;
    }

    async fn fan_out(&self, recipients: Vec<i64>, frame: &Frame, exclude: Option<i64>) {
        let bytes = Arc::new(frame.encode(None));
        let mut tasks = Vec::with_capacity(recipients.len());
        for session_id in recipients {
            if Some(session_id) == exclude {
                continue;
            }
            let bytes = bytes.clone();
            tasks.push(self.deliver(session_id, bytes));
        }
        futures_util::future::join_all(tasks).await;
    }

    // ─── Presence ────────────────────────────────────────────────────────

    pub async fn presence_on_join(&self, channel_id: i64, subchannel_id: Option<i64>, session_id: i64, user_id: i64, nickname: &str) {
        let frame = presence_frame(channel_id, subchannel_id, user_id, nickname, true);
        self.broadcast_to_channel(channel_id, &frame, Some(session_id)).await;
    }

    pub async fn presence_on_leave(&self, channel_id: i64, subchannel_id: Option<i64>, session_id: i64, user_id: i64, nickname: &str) {
        let frame = presence_frame(channel_id, subchannel_id, user_id, nickname, false);
        self.broadcast_to_channel(channel_id, &frame, Some(session_id)).await;
    }
}

fn presence_frame(channel_id: i64, subchannel_id: Option<i64>, user_id: i64, nickname: &str, joined: bool) -> Frame {
    let msg = Message::ChannelPresence(ChannelPresence {
        channel_id,
        subchannel_id,
        user_id,
        nickname: nickname.to_string(),
        joined,
    });
    Frame::new(crate::wire::frame::PROTOCOL_VERSION, msg.msg_type(), msg.encode())
}
