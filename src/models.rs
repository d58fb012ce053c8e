//! The data model of spec.md §3. Every entity here is either loaded straight
//! off the persistent store (`FromRow`) or lives only in the in-memory store
//! (`Session`, and the atomic `reply_count` carried alongside `Message`).

use sqlx::FromRow;

// ─── Channels ───────────────────────────────────────────────────────────────

pub const CHANNEL_TYPE_CHAT: i64 = 0;
pub const CHANNEL_TYPE_FORUM: i64 = 1;

#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: i64,
    pub retention_hours: i64,
    pub created_by: Option<i64>,
    pub created_at: i64,
    pub is_private: bool,
    pub parent_id: Option<i64>,
    pub is_dm: bool,
}

impl Channel {
    pub fn is_subchannel(&self) -> bool {
        self.parent_id.is_some()
    }
}

// ─── Users ──────────────────────────────────────────────────────────────────

pub const USER_FLAG_ADMIN: i64 = 1 << 0;
pub const USER_FLAG_MODERATOR: i64 = 1 << 1;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub nickname: String,
    pub user_flags: i64,
    pub password_hash: String,
    pub created_at: i64,
    pub last_seen: i64,
    pub encryption_public_key: Option<Vec<u8>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.user_flags & USER_FLAG_ADMIN != 0
    }

    pub fn is_moderator(&self) -> bool {
        self.user_flags & USER_FLAG_MODERATOR != 0
    }
}

// ─── Sessions (ephemeral, never persisted) ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Tcp,
    Ssh,
    Ws,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Tcp => "tcp",
            ConnectionType::Ssh => "ssh",
            ConnectionType::Ws => "ws",
        }
    }
}

/// State machine position for a connection (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: Option<i64>,
    pub nickname: String,
    pub connection_type: ConnectionType,
    pub connected_at: i64,
    pub last_activity: i64,
    pub state: SessionState,
    pub remote_ip: std::net::IpAddr,
    pub protocol_version: Option<u8>,
    pub shadowbanned: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub thread_root_id: i64,
    pub author_user_id: Option<i64>,
    pub author_nickname: String,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

pub const MESSAGE_VERSION_CREATED: i64 = 0;
pub const MESSAGE_VERSION_EDITED: i64 = 1;
pub const MESSAGE_VERSION_DELETED: i64 = 2;

#[derive(Debug, Clone, FromRow)]
pub struct MessageVersion {
    pub id: i64,
    pub message_id: i64,
    pub content: String,
    pub author_nickname: String,
    pub created_at: i64,
    pub version_type: i64,
}

// ─── SSH keys ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct SshKey {
    pub id: i64,
    pub user_id: i64,
    pub fingerprint: String,
    pub public_key: Vec<u8>,
    pub key_type: String,
    pub label: Option<String>,
    pub added_at: i64,
    pub last_used_at: Option<i64>,
}

// ─── Bans ───────────────────────────────────────────────────────────────────

pub const BAN_TYPE_USER: i64 = 0;
pub const BAN_TYPE_IP: i64 = 1;

#[derive(Debug, Clone, FromRow)]
pub struct Ban {
    pub id: i64,
    pub ban_type: i64,
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub ip_cidr: Option<String>,
    pub reason: String,
    pub shadowban: bool,
    pub banned_at: i64,
    pub banned_until: Option<i64>,
    pub banned_by: i64,
}

impl Ban {
    pub fn is_active(&self, now: i64) -> bool {
        match self.banned_until {
            Some(until) => now < until,
            None => true,
        }
    }
}

// ─── DM invites & access ────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct DmInvite {
    pub id: i64,
    pub initiator_user_id: i64,
    pub target_user_id: i64,
    pub is_encrypted: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChannelAccess {
    pub channel_id: i64,
    pub user_id: i64,
    pub created_at: i64,
}

// ─── Read state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct UserChannelState {
    pub user_id: i64,
    pub channel_id: i64,
    pub subchannel_id: i64,
    pub last_read_at: i64,
    pub updated_at: i64,
}

// ─── Server directory ───────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct DiscoveredServer {
    pub id: i64,
    pub hostname: String,
    pub port: i64,
    pub name: String,
    pub description: String,
    pub user_count: i64,
    pub uptime_seconds: i64,
    pub channel_count: i64,
    pub last_heartbeat: i64,
    pub heartbeat_interval: i64,
    pub is_public: bool,
    pub source_ip: String,
    pub discovered_via: String,
}

impl DiscoveredServer {
    pub fn is_stale(&self, now: i64) -> bool {
        now - self.last_heartbeat > 3 * self.heartbeat_interval
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
