//! The `Message` enum: one variant per on-wire type, covering every request,
//! response and broadcast in spec §6. Encoding/decoding is built on the
//! `Reader`/`Writer` primitives and the shared fragments in `common`.

use super::common::{
    decode_array, encode_array, BanSummary, ChannelSummary, MessageSummary, ServerSummary,
    SshKeySummary, UnreadCount, UserSummary,
};
use super::primitives::{Reader, Writer};
use crate::error::ServerError;

/// On-wire type byte for every message. Requests occupy 0x01-0x5F, responses
/// and server-initiated broadcasts occupy 0x80-0xAD.
pub mod op {
    pub const AUTH_REQUEST: u8 = 0x01;
    pub const SET_NICKNAME: u8 = 0x02;
    pub const REGISTER_USER: u8 = 0x03;
    pub const LIST_CHANNELS: u8 = 0x04;
    pub const JOIN_CHANNEL: u8 = 0x05;
    pub const LEAVE_CHANNEL: u8 = 0x06;
    pub const CREATE_CHANNEL: u8 = 0x07;
    pub const CREATE_SUBCHANNEL: u8 = 0x08;
    pub const LIST_MESSAGES: u8 = 0x09;
    pub const POST_MESSAGE: u8 = 0x0A;
    pub const EDIT_MESSAGE: u8 = 0x0B;
    pub const DELETE_MESSAGE: u8 = 0x0C;
    pub const ADD_SSH_KEY: u8 = 0x0D;
    pub const CHANGE_PASSWORD: u8 = 0x0E;
    pub const GET_USER_INFO: u8 = 0x0F;
    pub const PING: u8 = 0x10;
    pub const DISCONNECT: u8 = 0x11;
    pub const UPDATE_SSH_KEY_LABEL: u8 = 0x12;
    pub const DELETE_SSH_KEY: u8 = 0x13;
    pub const LIST_SSH_KEYS: u8 = 0x14;
    pub const GET_SUBCHANNELS: u8 = 0x15;
    pub const LIST_USERS: u8 = 0x16;
    pub const LIST_CHANNEL_USERS: u8 = 0x17;
    pub const GET_UNREAD_COUNTS: u8 = 0x18;
    pub const START_DM: u8 = 0x19;
    pub const PROVIDE_PUBLIC_KEY: u8 = 0x1A;
    pub const ALLOW_UNENCRYPTED: u8 = 0x1B;
    pub const LOGOUT: u8 = 0x1C;
    pub const UPDATE_READ_STATE: u8 = 0x1D;

    pub const SUBSCRIBE_THREAD: u8 = 0x51;
    pub const UNSUBSCRIBE_THREAD: u8 = 0x52;
    pub const SUBSCRIBE_CHANNEL: u8 = 0x53;
    pub const UNSUBSCRIBE_CHANNEL: u8 = 0x54;
    pub const LIST_SERVERS: u8 = 0x55;
    pub const REGISTER_SERVER: u8 = 0x56;
    pub const HEARTBEAT: u8 = 0x57;
    pub const VERIFY_RESPONSE: u8 = 0x58;
    pub const BAN_USER: u8 = 0x59;
    pub const BAN_IP: u8 = 0x5A;
    pub const UNBAN_USER: u8 = 0x5B;
    pub const UNBAN_IP: u8 = 0x5C;
    pub const LIST_BANS: u8 = 0x5D;
    pub const DELETE_USER: u8 = 0x5E;
    pub const DELETE_CHANNEL: u8 = 0x5F;

    pub const AUTH_RESPONSE: u8 = 0x81;
    pub const NICKNAME_RESPONSE: u8 = 0x82;
    pub const REGISTER_RESPONSE: u8 = 0x83;
    pub const CHANNEL_LIST: u8 = 0x84;
    pub const JOIN_RESPONSE: u8 = 0x85;
    pub const LEAVE_RESPONSE: u8 = 0x86;
    pub const CHANNEL_CREATED: u8 = 0x87;
    pub const SUBCHANNEL_CREATED: u8 = 0x88;
    pub const MESSAGE_LIST: u8 = 0x89;
    pub const MESSAGE_POSTED: u8 = 0x8A;
    pub const MESSAGE_EDITED: u8 = 0x8B;
    pub const MESSAGE_DELETED: u8 = 0x8C;
    pub const NEW_MESSAGE: u8 = 0x8D;
    pub const PASSWORD_CHANGED: u8 = 0x8E;
    pub const USER_INFO: u8 = 0x8F;
    pub const PONG: u8 = 0x90;
    pub const ERROR: u8 = 0x91;
    pub const SSH_KEY_LABEL_UPDATED: u8 = 0x92;
    pub const SSH_KEY_DELETED: u8 = 0x93;
    pub const SSH_KEY_LIST: u8 = 0x94;
    pub const SSH_KEY_ADDED: u8 = 0x95;
    pub const SUBCHANNEL_LIST: u8 = 0x96;
    pub const UNREAD_COUNTS: u8 = 0x97;
    pub const SERVER_CONFIG: u8 = 0x98;
    pub const SUBSCRIBE_OK: u8 = 0x99;
    pub const USER_LIST: u8 = 0x9A;
    pub const SERVER_LIST: u8 = 0x9B;
    pub const REGISTER_ACK: u8 = 0x9C;
    pub const HEARTBEAT_ACK: u8 = 0x9D;
    pub const VERIFY_REGISTRATION: u8 = 0x9E;
    pub const USER_BANNED: u8 = 0x9F;
    pub const KEY_REQUIRED: u8 = 0xA1;
    pub const DM_READY: u8 = 0xA2;
    pub const DM_PENDING: u8 = 0xA3;
    pub const DM_REQUEST: u8 = 0xA4;
    pub const IP_BANNED: u8 = 0xA5;
    pub const USER_UNBANNED: u8 = 0xA6;
    pub const IP_UNBANNED: u8 = 0xA7;
    pub const BAN_LIST: u8 = 0xA8;
    pub const USER_DELETED: u8 = 0xA9;
    pub const CHANNEL_DELETED: u8 = 0xAA;
    pub const CHANNEL_USER_LIST: u8 = 0xAB;
    pub const CHANNEL_PRESENCE: u8 = 0xAC;
    pub const SERVER_PRESENCE: u8 = 0xAD;
}

/// `SUBSCRIBE_OK.kind` discriminant.
pub const SUBSCRIBE_KIND_THREAD: u8 = 0;
pub const SUBSCRIBE_KIND_CHANNEL: u8 = 1;

/// `BanSummary.ban_type` discriminant.
pub const BAN_TYPE_USER: u8 = 0;
pub const BAN_TYPE_IP: u8 = 1;

macro_rules! message_enum {
    ($($variant:ident $op:path),+ $(,)?) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($variant)),+
        }

        impl Message {
            pub fn msg_type(&self) -> u8 {
                match self {
                    $(Message::$variant(_) => $op),+
                }
            }

            pub fn encode(&self) -> Vec<u8> {
                let mut w = Writer::new();
                match self {
                    $(Message::$variant(m) => m.encode(&mut w)),+
                }
                w.into_bytes()
            }

            pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Self, ServerError> {
                let mut r = Reader::new(payload);
                match msg_type {
                    $($op => Ok(Message::$variant($variant::decode(&mut r)?)),)+
                    other => Err(ServerError::Protocol(format!("unknown message type 0x{:02x}", other))),
                }
            }
        }
    };
}

message_enum! {
    AuthRequest op::AUTH_REQUEST,
    SetNickname op::SET_NICKNAME,
    RegisterUser op::REGISTER_USER,
    ListChannels op::LIST_CHANNELS,
    JoinChannel op::JOIN_CHANNEL,
    LeaveChannel op::LEAVE_CHANNEL,
    CreateChannel op::CREATE_CHANNEL,
    CreateSubchannel op::CREATE_SUBCHANNEL,
    ListMessages op::LIST_MESSAGES,
    PostMessage op::POST_MESSAGE,
    EditMessage op::EDIT_MESSAGE,
    DeleteMessage op::DELETE_MESSAGE,
    AddSshKey op::ADD_SSH_KEY,
    ChangePassword op::CHANGE_PASSWORD,
    GetUserInfo op::GET_USER_INFO,
    Ping op::PING,
    Disconnect op::DISCONNECT,
    UpdateSshKeyLabel op::UPDATE_SSH_KEY_LABEL,
    DeleteSshKey op::DELETE_SSH_KEY,
    ListSshKeys op::LIST_SSH_KEYS,
    GetSubchannels op::GET_SUBCHANNELS,
    ListUsers op::LIST_USERS,
    ListChannelUsers op::LIST_CHANNEL_USERS,
    GetUnreadCounts op::GET_UNREAD_COUNTS,
    StartDm op::START_DM,
    ProvidePublicKey op::PROVIDE_PUBLIC_KEY,
    AllowUnencrypted op::ALLOW_UNENCRYPTED,
    Logout op::LOGOUT,
    UpdateReadState op::UPDATE_READ_STATE,
    SubscribeThread op::SUBSCRIBE_THREAD,
    UnsubscribeThread op::UNSUBSCRIBE_THREAD,
    SubscribeChannel op::SUBSCRIBE_CHANNEL,
    UnsubscribeChannel op::UNSUBSCRIBE_CHANNEL,
    ListServers op::LIST_SERVERS,
    RegisterServer op::REGISTER_SERVER,
    Heartbeat op::HEARTBEAT,
    VerifyResponse op::VERIFY_RESPONSE,
    BanUser op::BAN_USER,
    BanIp op::BAN_IP,
    UnbanUser op::UNBAN_USER,
    UnbanIp op::UNBAN_IP,
    ListBans op::LIST_BANS,
    DeleteUser op::DELETE_USER,
    DeleteChannel op::DELETE_CHANNEL,

    AuthResponse op::AUTH_RESPONSE,
    NicknameResponse op::NICKNAME_RESPONSE,
    RegisterResponse op::REGISTER_RESPONSE,
    ChannelList op::CHANNEL_LIST,
    JoinResponse op::JOIN_RESPONSE,
    LeaveResponse op::LEAVE_RESPONSE,
    ChannelCreated op::CHANNEL_CREATED,
    SubchannelCreated op::SUBCHANNEL_CREATED,
    MessageList op::MESSAGE_LIST,
    MessagePosted op::MESSAGE_POSTED,
    MessageEdited op::MESSAGE_EDITED,
    MessageDeleted op::MESSAGE_DELETED,
    NewMessage op::NEW_MESSAGE,
    PasswordChanged op::PASSWORD_CHANGED,
    UserInfo op::USER_INFO,
    Pong op::PONG,
    ErrorMessage op::ERROR,
    SshKeyLabelUpdated op::SSH_KEY_LABEL_UPDATED,
    SshKeyDeleted op::SSH_KEY_DELETED,
    SshKeyList op::SSH_KEY_LIST,
    SshKeyAdded op::SSH_KEY_ADDED,
    SubchannelList op::SUBCHANNEL_LIST,
    UnreadCounts op::UNREAD_COUNTS,
    ServerConfigMessage op::SERVER_CONFIG,
    SubscribeOk op::SUBSCRIBE_OK,
    UserList op::USER_LIST,
    ServerList op::SERVER_LIST,
    RegisterAck op::REGISTER_ACK,
    HeartbeatAck op::HEARTBEAT_ACK,
    VerifyRegistration op::VERIFY_REGISTRATION,
    UserBanned op::USER_BANNED,
    KeyRequired op::KEY_REQUIRED,
    DmReady op::DM_READY,
    DmPending op::DM_PENDING,
    DmRequest op::DM_REQUEST,
    IpBanned op::IP_BANNED,
    UserUnbanned op::USER_UNBANNED,
    IpUnbanned op::IP_UNBANNED,
    BanList op::BAN_LIST,
    UserDeleted op::USER_DELETED,
    ChannelDeleted op::CHANNEL_DELETED,
    ChannelUserList op::CHANNEL_USER_LIST,
    ChannelPresence op::CHANNEL_PRESENCE,
    ServerPresence op::SERVER_PRESENCE,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub nickname: String,
    pub password: String,
}

impl AuthRequest {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.nickname);
        w.write_string(&self.password);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            nickname: r.read_string()?,
            password: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetNickname {
    pub nickname: String,
}

impl SetNickname {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.nickname);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            nickname: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterUser {
    pub nickname: String,
    pub password: String,
}

impl RegisterUser {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.nickname);
        w.write_string(&self.password);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            nickname: r.read_string()?,
            password: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListChannels;

impl ListChannels {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinChannel {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
}

impl JoinChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveChannel {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
}

impl LeaveChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateChannel {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: u8,
    pub retention_hours: u32,
    pub is_private: bool,
}

impl CreateChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.name);
        w.write_string(&self.display_name);
        w.write_optional_string(self.description.as_deref());
        w.write_u8(self.channel_type);
        w.write_u32(self.retention_hours);
        w.write_bool(self.is_private);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            name: r.read_string()?,
            display_name: r.read_string()?,
            description: r.read_optional_string()?,
            channel_type: r.read_u8()?,
            retention_hours: r.read_u32()?,
            is_private: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubchannel {
    pub parent_id: i64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
}

impl CreateSubchannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.parent_id);
        w.write_string(&self.name);
        w.write_string(&self.display_name);
        w.write_optional_string(self.description.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            parent_id: r.read_i64()?,
            name: r.read_string()?,
            display_name: r.read_string()?,
            description: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListMessages {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub limit: u16,
    pub before_id: Option<i64>,
    pub after_id: Option<i64>,
}

impl ListMessages {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_optional_i64(self.parent_id);
        w.write_u16(self.limit);
        w.write_optional_i64(self.before_id);
        w.write_optional_i64(self.after_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            parent_id: r.read_optional_i64()?,
            limit: r.read_u16()?,
            before_id: r.read_optional_i64()?,
            after_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostMessage {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub content: String,
}

impl PostMessage {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_optional_i64(self.parent_id);
        w.write_string32(&self.content);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            parent_id: r.read_optional_i64()?,
            content: r.read_string32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditMessage {
    pub message_id: i64,
    pub content: String,
}

impl EditMessage {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.message_id);
        w.write_string32(&self.content);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            message_id: r.read_i64()?,
            content: r.read_string32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub message_id: i64,
}

impl DeleteMessage {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.message_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            message_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddSshKey {
    pub public_key: Vec<u8>,
    pub key_type: String,
    pub label: Option<String>,
}

impl AddSshKey {
    fn encode(&self, w: &mut Writer) {
        w.write_bytes32(&self.public_key);
        w.write_string(&self.key_type);
        w.write_optional_string(self.label.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            public_key: r.read_bytes32()?,
            key_type: r.read_string()?,
            label: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangePassword {
    pub old_password: String,
    pub new_password: String,
}

impl ChangePassword {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.old_password);
        w.write_string(&self.new_password);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            old_password: r.read_string()?,
            new_password: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetUserInfo {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
}

impl GetUserInfo {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_i64(self.user_id);
        w.write_optional_string(self.nickname.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            user_id: r.read_optional_i64()?,
            nickname: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ping;

impl Ping {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Disconnect;

impl Disconnect {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSshKeyLabel {
    pub key_id: i64,
    pub label: Option<String>,
}

impl UpdateSshKeyLabel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.key_id);
        w.write_optional_string(self.label.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            key_id: r.read_i64()?,
            label: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSshKey {
    pub key_id: i64,
}

impl DeleteSshKey {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.key_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            key_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListSshKeys;

impl ListSshKeys {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetSubchannels {
    pub parent_id: i64,
}

impl GetSubchannels {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.parent_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            parent_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListUsers {
    pub include_offline: bool,
}

impl ListUsers {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.include_offline);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            include_offline: r.read_trailing_bool_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListChannelUsers {
    pub channel_id: i64,
}

impl ListChannelUsers {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetUnreadCounts;

impl GetUnreadCounts {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartDm {
    pub target_user_id: Option<i64>,
    pub target_nickname: Option<String>,
    pub allow_unencrypted: bool,
}

impl StartDm {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_i64(self.target_user_id);
        w.write_optional_string(self.target_nickname.as_deref());
        w.write_bool(self.allow_unencrypted);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            target_user_id: r.read_optional_i64()?,
            target_nickname: r.read_optional_string()?,
            allow_unencrypted: r.read_trailing_bool_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvidePublicKey {
    pub dm_channel_id: i64,
    pub public_key: Vec<u8>,
}

impl ProvidePublicKey {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.dm_channel_id);
        w.write_bytes32(&self.public_key);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            dm_channel_id: r.read_i64()?,
            public_key: r.read_bytes32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllowUnencrypted {
    pub dm_channel_id: i64,
}

impl AllowUnencrypted {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.dm_channel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            dm_channel_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Logout;

impl Logout {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReadState {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub last_read_at: i64,
}

impl UpdateReadState {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_timestamp(self.last_read_at);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            last_read_at: r.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeThread {
    pub thread_root_id: i64,
}

impl SubscribeThread {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.thread_root_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            thread_root_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeThread {
    pub thread_root_id: i64,
}

impl UnsubscribeThread {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.thread_root_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            thread_root_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeChannel {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
}

impl SubscribeChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeChannel {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
}

impl UnsubscribeChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListServers;

impl ListServers {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterServer {
    pub hostname: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u32,
    pub uptime_seconds: u64,
    pub channel_count: u32,
    pub is_public: bool,
    pub heartbeat_interval: u32,
}

impl RegisterServer {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.hostname);
        w.write_u16(self.port);
        w.write_string(&self.name);
        w.write_string(&self.description);
        w.write_u32(self.user_count);
        w.write_u64(self.uptime_seconds);
        w.write_u32(self.channel_count);
        w.write_bool(self.is_public);
        w.write_u32(self.heartbeat_interval);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            hostname: r.read_string()?,
            port: r.read_u16()?,
            name: r.read_string()?,
            description: r.read_string()?,
            user_count: r.read_u32()?,
            uptime_seconds: r.read_u64()?,
            channel_count: r.read_u32()?,
            is_public: r.read_bool()?,
            heartbeat_interval: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub server_id: i64,
    pub user_count: u32,
    pub uptime_seconds: u64,
    pub channel_count: u32,
}

impl Heartbeat {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.server_id);
        w.write_u32(self.user_count);
        w.write_u64(self.uptime_seconds);
        w.write_u32(self.channel_count);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            server_id: r.read_i64()?,
            user_count: r.read_u32()?,
            uptime_seconds: r.read_u64()?,
            channel_count: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyResponse {
    pub challenge_id: i64,
    pub response: String,
}

impl VerifyResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.challenge_id);
        w.write_string(&self.response);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            challenge_id: r.read_i64()?,
            response: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanUser {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub reason: String,
    pub shadowban: bool,
    pub duration_secs: Option<i64>,
}

impl BanUser {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_i64(self.user_id);
        w.write_optional_string(self.nickname.as_deref());
        w.write_string(&self.reason);
        w.write_bool(self.shadowban);
        w.write_optional_i64(self.duration_secs);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            user_id: r.read_optional_i64()?,
            nickname: r.read_optional_string()?,
            reason: r.read_string()?,
            shadowban: r.read_bool()?,
            duration_secs: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanIp {
    pub ip_cidr: String,
    pub reason: String,
    pub shadowban: bool,
    pub duration_secs: Option<i64>,
}

impl BanIp {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.ip_cidr);
        w.write_string(&self.reason);
        w.write_bool(self.shadowban);
        w.write_optional_i64(self.duration_secs);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            ip_cidr: r.read_string()?,
            reason: r.read_string()?,
            shadowban: r.read_bool()?,
            duration_secs: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnbanUser {
    pub ban_id: i64,
}

impl UnbanUser {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.ban_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            ban_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnbanIp {
    pub ban_id: i64,
}

impl UnbanIp {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.ban_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            ban_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListBans;

impl ListBans {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteUser {
    pub user_id: i64,
}

impl DeleteUser {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.user_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            user_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteChannel {
    pub channel_id: i64,
}

impl DeleteChannel {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Responses & broadcasts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub success: bool,
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub is_admin: bool,
    pub error: Option<String>,
}

impl AuthResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_optional_i64(self.user_id);
        w.write_optional_string(self.nickname.as_deref());
        w.write_bool(self.is_admin);
        w.write_optional_string(self.error.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            user_id: r.read_optional_i64()?,
            nickname: r.read_optional_string()?,
            is_admin: r.read_bool()?,
            error: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NicknameResponse {
    pub success: bool,
    pub nickname: String,
    pub error: Option<String>,
}

impl NicknameResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_string(&self.nickname);
        w.write_optional_string(self.error.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            nickname: r.read_string()?,
            error: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterResponse {
    pub success: bool,
    pub user_id: Option<i64>,
    pub error: Option<String>,
}

impl RegisterResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_optional_i64(self.user_id);
        w.write_optional_string(self.error.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            user_id: r.read_optional_i64()?,
            error: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelList {
    pub channels: Vec<ChannelSummary>,
}

impl ChannelList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.channels, |c, w| c.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channels: decode_array(r, ChannelSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub success: bool,
    pub channel: Option<ChannelSummary>,
    pub error: Option<String>,
}

impl JoinResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_bool(self.channel.is_some());
        if let Some(channel) = &self.channel {
            channel.encode(w);
        }
        w.write_optional_string(self.error.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        let success = r.read_bool()?;
        let has_channel = r.read_bool()?;
        let channel = if has_channel {
            Some(ChannelSummary::decode(r)?)
        } else {
            None
        };
        Ok(Self {
            success,
            channel,
            error: r.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveResponse {
    pub success: bool,
}

impl LeaveResponse {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCreated {
    pub channel: ChannelSummary,
}

impl ChannelCreated {
    fn encode(&self, w: &mut Writer) {
        self.channel.encode(w);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel: ChannelSummary::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubchannelCreated {
    pub channel: ChannelSummary,
}

impl SubchannelCreated {
    fn encode(&self, w: &mut Writer) {
        self.channel.encode(w);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel: ChannelSummary::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageList {
    pub messages: Vec<MessageSummary>,
}

impl MessageList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.messages, |m, w| m.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            messages: decode_array(r, MessageSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePosted {
    pub success: bool,
    pub message_id: Option<i64>,
}

impl MessagePosted {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_optional_i64(self.message_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            message_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEdited {
    pub message_id: i64,
    pub content: String,
    pub edited_at: i64,
}

impl MessageEdited {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.message_id);
        w.write_string32(&self.content);
        w.write_timestamp(self.edited_at);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            message_id: r.read_i64()?,
            content: r.read_string32()?,
            edited_at: r.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDeleted {
    pub message_id: i64,
    pub deleted_at: i64,
}

impl MessageDeleted {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.message_id);
        w.write_timestamp(self.deleted_at);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            message_id: r.read_i64()?,
            deleted_at: r.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message: MessageSummary,
}

impl NewMessage {
    fn encode(&self, w: &mut Writer) {
        self.message.encode(w);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            message: MessageSummary::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordChanged {
    pub success: bool,
}

impl PasswordChanged {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub user: UserSummary,
}

impl UserInfo {
    fn encode(&self, w: &mut Writer) {
        self.user.encode(w);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            user: UserSummary::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pong;

impl Pong {
    fn encode(&self, _w: &mut Writer) {}
    fn decode(_r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self)
    }
}

/// Wire `Error(0x91)`. Named `ErrorMessage` to avoid colliding with
/// [`crate::error::ServerError`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

impl ErrorMessage {
    pub fn from_server_error(err: &ServerError) -> Self {
        Self {
            code: err.wire_code(),
            message: err.wire_message(),
        }
    }

    fn encode(&self, w: &mut Writer) {
        w.write_u16(self.code);
        w.write_string(&self.message);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            code: r.read_u16()?,
            message: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKeyLabelUpdated {
    pub success: bool,
    pub key_id: i64,
}

impl SshKeyLabelUpdated {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_i64(self.key_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            key_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKeyDeleted {
    pub success: bool,
    pub key_id: i64,
}

impl SshKeyDeleted {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_i64(self.key_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            key_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKeyList {
    pub keys: Vec<SshKeySummary>,
}

impl SshKeyList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.keys, |k, w| k.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            keys: decode_array(r, SshKeySummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKeyAdded {
    pub key: SshKeySummary,
}

impl SshKeyAdded {
    fn encode(&self, w: &mut Writer) {
        self.key.encode(w);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            key: SshKeySummary::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubchannelList {
    pub subchannels: Vec<ChannelSummary>,
}

impl SubchannelList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.subchannels, |c, w| c.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            subchannels: decode_array(r, ChannelSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnreadCounts {
    pub counts: Vec<UnreadCount>,
}

impl UnreadCounts {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.counts, |c, w| c.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            counts: decode_array(r, UnreadCount::decode)?,
        })
    }
}

/// Unsolicited broadcast sent right after a successful handshake, mirroring
/// `AppConfig.limits` so clients can self-throttle (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfigMessage {
    pub protocol_version: u8,
    pub max_message_rate: u32,
    pub max_channel_creates: u32,
    pub inactive_cleanup_days: u32,
    pub max_connections_per_ip: u32,
    pub max_message_length: u32,
    pub max_thread_subscriptions: u32,
    pub max_channel_subscriptions: u32,
    pub directory_enabled: bool,
}

impl ServerConfigMessage {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.protocol_version);
        w.write_u32(self.max_message_rate);
        w.write_u32(self.max_channel_creates);
        w.write_u32(self.inactive_cleanup_days);
        w.write_u32(self.max_connections_per_ip);
        w.write_u32(self.max_message_length);
        w.write_u32(self.max_thread_subscriptions);
        w.write_u32(self.max_channel_subscriptions);
        w.write_bool(self.directory_enabled);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            protocol_version: r.read_u8()?,
            max_message_rate: r.read_u32()?,
            max_channel_creates: r.read_u32()?,
            inactive_cleanup_days: r.read_u32()?,
            max_connections_per_ip: r.read_u32()?,
            max_message_length: r.read_u32()?,
            max_thread_subscriptions: r.read_u32()?,
            max_channel_subscriptions: r.read_u32()?,
            directory_enabled: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOk {
    pub kind: u8,
    pub id: i64,
    pub subchannel_id: Option<i64>,
}

impl SubscribeOk {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.kind);
        w.write_i64(self.id);
        w.write_optional_i64(self.subchannel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            kind: r.read_u8()?,
            id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserList {
    pub users: Vec<UserSummary>,
}

impl UserList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.users, |u, w| u.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            users: decode_array(r, UserSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerList {
    pub servers: Vec<ServerSummary>,
}

impl ServerList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.servers, |s, w| s.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            servers: decode_array(r, ServerSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterAck {
    pub success: bool,
    pub server_id: Option<i64>,
    pub challenge_id: Option<i64>,
}

impl RegisterAck {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
        w.write_optional_i64(self.server_id);
        w.write_optional_i64(self.challenge_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
            server_id: r.read_optional_i64()?,
            challenge_id: r.read_optional_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatAck {
    pub success: bool,
}

impl HeartbeatAck {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyRegistration {
    pub challenge_id: i64,
    pub challenge: String,
}

impl VerifyRegistration {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.challenge_id);
        w.write_string(&self.challenge);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            challenge_id: r.read_i64()?,
            challenge: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserBanned {
    pub ban_id: i64,
}

impl UserBanned {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.ban_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            ban_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRequired {
    pub dm_channel_id: i64,
}

impl KeyRequired {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.dm_channel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            dm_channel_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmReady {
    pub channel_id: i64,
    pub other_public_key: Option<Vec<u8>>,
}

impl DmReady {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_bytes(self.other_public_key.as_deref());
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            other_public_key: r.read_optional_bytes()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmPending {
    pub channel_id: i64,
    pub waiting_for_user_id: i64,
}

impl DmPending {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_i64(self.waiting_for_user_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            waiting_for_user_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmRequest {
    pub channel_id: i64,
    pub initiator_user_id: i64,
    pub initiator_nickname: String,
}

impl DmRequest {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_i64(self.initiator_user_id);
        w.write_string(&self.initiator_nickname);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            initiator_user_id: r.read_i64()?,
            initiator_nickname: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpBanned {
    pub ban_id: i64,
}

impl IpBanned {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.ban_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            ban_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserUnbanned {
    pub success: bool,
}

impl UserUnbanned {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpUnbanned {
    pub success: bool,
}

impl IpUnbanned {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanList {
    pub bans: Vec<BanSummary>,
}

impl BanList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.bans, |b, w| b.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            bans: decode_array(r, BanSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserDeleted {
    pub success: bool,
}

impl UserDeleted {
    fn encode(&self, w: &mut Writer) {
        w.write_bool(self.success);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            success: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDeleted {
    pub channel_id: i64,
}

impl ChannelDeleted {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUserList {
    pub users: Vec<UserSummary>,
}

impl ChannelUserList {
    fn encode(&self, w: &mut Writer) {
        encode_array(w, &self.users, |u, w| u.encode(w));
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            users: decode_array(r, UserSummary::decode)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPresence {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub user_id: i64,
    pub nickname: String,
    pub joined: bool,
}

impl ChannelPresence {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.channel_id);
        w.write_optional_i64(self.subchannel_id);
        w.write_i64(self.user_id);
        w.write_string(&self.nickname);
        w.write_bool(self.joined);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            channel_id: r.read_i64()?,
            subchannel_id: r.read_optional_i64()?,
            user_id: r.read_i64()?,
            nickname: r.read_string()?,
            joined: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerPresence {
    pub user_id: i64,
    pub nickname: String,
    pub online: bool,
}

impl ServerPresence {
    fn encode(&self, w: &mut Writer) {
        w.write_i64(self.user_id);
        w.write_string(&self.nickname);
        w.write_bool(self.online);
    }
    fn decode(r: &mut Reader) -> Result<Self, ServerError> {
        Ok(Self {
            user_id: r.read_i64()?,
            nickname: r.read_string()?,
            online: r.read_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let msg_type = msg.msg_type();
        let bytes = msg.encode();
        let decoded = Message::decode(msg_type, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_auth_request() {
        round_trip(Message::AuthRequest(AuthRequest {
            nickname: "alice".into(),
            password: "hunter2".into(),
        }));
    }

    #[test]
    fn round_trips_post_message_with_optionals() {
        round_trip(Message::PostMessage(PostMessage {
            channel_id: 42,
            subchannel_id: Some(7),
            parent_id: None,
            content: "hello world".into(),
        }));
    }

    #[test]
    fn round_trips_channel_list() {
        round_trip(Message::ChannelList(ChannelList {
            channels: vec![ChannelSummary {
                id: 1,
                name: "general".into(),
                display_name: "General".into(),
                description: None,
                channel_type: 0,
                retention_hours: 0,
                created_by: Some(1),
                created_at: 1000,
                is_private: false,
                parent_id: None,
                is_dm: false,
            }],
        }));
    }

    #[test]
    fn round_trips_error_message() {
        round_trip(Message::ErrorMessage(ErrorMessage {
            code: 4000,
            message: "channel not found".into(),
        }));
    }

    #[test]
    fn empty_requests_round_trip_with_no_payload() {
        round_trip(Message::Ping(Ping));
        round_trip(Message::ListChannels(ListChannels));
        round_trip(Message::Logout(Logout));
    }

    #[test]
    fn list_users_defaults_include_offline_false_on_eof() {
        let decoded = Message::decode(op::LIST_USERS, &[]).unwrap();
        assert_eq!(
            decoded,
            Message::ListUsers(ListUsers {
                include_offline: false
            })
        );
    }

    #[test]
    fn unknown_message_type_is_a_protocol_error() {
        let err = Message::decode(0xFE, &[]).unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[test]
    fn join_response_without_channel_round_trips() {
        round_trip(Message::JoinResponse(JoinResponse {
            success: false,
            channel: None,
            error: Some("no such channel".into()),
        }));
    }
}
