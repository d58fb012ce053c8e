//! Structured payload fragments shared by several message types.

use super::primitives::{Reader, Writer};
use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: u8,
    pub retention_hours: u32,
    pub created_by: Option<i64>,
    pub created_at: i64,
    pub is_private: bool,
    pub parent_id: Option<i64>,
    pub is_dm: bool,
}

impl ChannelSummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_string(&self.name);
        w.write_string(&self.display_name);
        w.write_optional_string(self.description.as_deref());
        w.write_u8(self.channel_type);
        w.write_u32(self.retention_hours);
        w.write_optional_i64(self.created_by);
        w.write_timestamp(self.created_at);
        w.write_bool(self.is_private);
        w.write_optional_i64(self.parent_id);
        w.write_bool(self.is_dm);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            name: r.read_string()?,
            display_name: r.read_string()?,
            description: r.read_optional_string()?,
            channel_type: r.read_u8()?,
            retention_hours: r.read_u32()?,
            created_by: r.read_optional_i64()?,
            created_at: r.read_timestamp()?,
            is_private: r.read_bool()?,
            parent_id: r.read_optional_i64()?,
            is_dm: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageSummary {
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
    pub reply_count: u32,
}

impl MessageSummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_optional_i64(self.parent_id);
        w.write_i64(self.thread_root_id);
        w.write_optional_i64(self.author_user_id);
        w.write_string(&self.author_nickname);
        w.write_string32(&self.content);
        w.write_timestamp(self.created_at);
        w.write_optional_i64(self.edited_at);
        w.write_optional_i64(self.deleted_at);
        w.write_u32(self.reply_count);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            parent_id: r.read_optional_i64()?,
            thread_root_id: r.read_i64()?,
            author_user_id: r.read_optional_i64()?,
            author_nickname: r.read_string()?,
            content: r.read_string32()?,
            created_at: r.read_timestamp()?,
            edited_at: r.read_optional_i64()?,
            deleted_at: r.read_optional_i64()?,
            reply_count: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub nickname: String,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub online: bool,
}

impl UserSummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_string(&self.nickname);
        w.write_bool(self.is_admin);
        w.write_bool(self.is_moderator);
        w.write_bool(self.online);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            nickname: r.read_string()?,
            is_admin: r.read_bool()?,
            is_moderator: r.read_bool()?,
            online: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKeySummary {
    pub id: i64,
    pub fingerprint: String,
    pub key_type: String,
    pub label: Option<String>,
    pub added_at: i64,
    pub last_used_at: Option<i64>,
}

impl SshKeySummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_string(&self.fingerprint);
        w.write_string(&self.key_type);
        w.write_optional_string(self.label.as_deref());
        w.write_timestamp(self.added_at);
        w.write_optional_i64(self.last_used_at);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            fingerprint: r.read_string()?,
            key_type: r.read_string()?,
            label: r.read_optional_string()?,
            added_at: r.read_timestamp()?,
            last_used_at: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanSummary {
    pub id: i64,
    pub ban_type: u8,
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub ip_cidr: Option<String>,
    pub reason: String,
    pub shadowban: bool,
    pub banned_at: i64,
    pub banned_until: Option<i64>,
    pub banned_by: i64,
}

impl BanSummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_u8(self.ban_type);
        w.write_optional_i64(self.user_id);
        w.write_optional_string(self.nickname.as_deref());
        w.write_optional_string(self.ip_cidr.as_deref());
        w.write_string(&self.reason);
        w.write_bool(self.shadowban);
        w.write_timestamp(self.banned_at);
        w.write_optional_i64(self.banned_until);
        w.write_i64(self.banned_by);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            ban_type: r.read_u8()?,
            user_id: r.read_optional_i64()?,
            nickname: r.read_optional_string()?,
            ip_cidr: r.read_optional_string()?,
            reason: r.read_string()?,
            shadowban: r.read_bool()?,
            banned_at: r.read_timestamp()?,
            banned_until: r.read_optional_i64()?,
            banned_by: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSummary {
    pub id: i64,
    pub hostname: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u32,
    pub uptime_seconds: u64,
    pub channel_count: u32,
    pub is_public: bool,
}

impl ServerSummary {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.id);
        w.write_string(&self.hostname);
        w.write_u16(self.port);
        w.write_string(&self.name);
        w.write_string(&self.description);
        w.write_u32(self.user_count);
        w.write_u64(self.uptime_seconds);
        w.write_u32(self.channel_count);
        w.write_bool(self.is_public);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            id: r.read_i64()?,
            hostname: r.read_string()?,
            port: r.read_u16()?,
            name: r.read_string()?,
            description: r.read_string()?,
            user_count: r.read_u32()?,
            uptime_seconds: r.read_u64()?,
            channel_count: r.read_u32()?,
            is_public: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnreadCount {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub count: u32,
}

impl UnreadCount {
    pub fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_u32(self.count);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            count: r.read_u32()?,
        })
    }
}

pub fn encode_array<T>(w: &mut Writer, items: &[T], encode_one: impl Fn(&T, &mut Writer)) {
    w.write_u16(items.len() as u16);
    for item in items {
        encode_one(item, w);
    }
}

pub fn decode_array<T>(
    r: &mut Reader,
    decode_one: impl Fn(&mut Reader) -> Result<T, ServerError>,
) -> Result<Vec<T>, ServerError> {
    let count = r.read_u16()? as usize;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(decode_one(r)?);
    }
    Ok(out)
}
