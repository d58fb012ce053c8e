//! Request dispatcher: one handler per `op` code, dispatching decoded
//! requests against the in-memory store, the persistent store, the session
//! registry, the subscription manager and the rate limiter.
//!
//! The read loop owns decode/auth/rate-limit framing (see `transport`); this
//! module only holds the handler bodies and the permission/session-state
//! rules they share. Every handler returns the frame to reply to the caller
//! with; broadcasts to other sessions are a side effect performed inline via
//! `self.sessions`.

use std::sync::Arc;

use crate::auth;
use crate::db::{self, Store as Db};
use crate::error::{ServerError, ServerResult};
use crate::id::SnowflakeGenerator;
use crate::models::*;
use crate::ratelimit::{self, BanVerdict, RateLimiter};
use crate::session::SessionRegistry;
use crate::store::MemoryStore;
use crate::subscription::SubscriptionManager;
use crate::wire::message::*;
use crate::wire::primitives::{validate_content, validate_nickname};

pub struct Dispatcher {
    pub db: Arc<Db>,
    pub mem: Arc<MemoryStore>,
    pub sessions: Arc<SessionRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ids: Arc<SnowflakeGenerator>,
    pub protocol_version: u8,
    /// Announced unsolicited after session start (spec §6: "0x98
    /// ServerConfig (unsolicited after successful session start)").
    pub server_config: ServerConfigMessage,
}

impl Dispatcher {
    /// Entry point called once per decoded frame. Unauthenticated sessions
    /// may only reach a small allow-list; everything else needs at least a
    /// nickname, and admin-only ops additionally need `is_admin`.
    pub async fn dispatch(&self, session_id: i64, msg: Message) -> Message {
        let Some(session) = self.sessions.get_session(session_id) else {
            return error_message(&ServerError::Internal(anyhow::anyhow!("session vanished mid-dispatch")));
        };

        if !is_allowed_unauthenticated(&msg) && session.state == SessionState::Unauthenticated {
            return error_message(&ServerError::AuthRequired);
        }
        if requires_admin(&msg) {
            let is_admin = match session.user_id {
                Some(uid) => self.user_is_admin(uid).await.unwrap_or(false),
                None => false,
            };
            if !is_admin {
                return error_message(&ServerError::Forbidden("admin privileges required".into()));
            }
        }

        let result = self.handle(session_id, &session, msg).await;
        self.sessions.update_session(session_id, |s| s.last_activity = now_ms());
        match result {
            Ok(reply) => reply,
            Err(e) => error_message(&e),
        }
    }

    async fn user_is_admin(&self, user_id: i64) -> ServerResult<bool> {
        Ok(db::users::find_by_id(&self.db.read, user_id).await?.is_some_and(|u| u.is_admin()))
    }

    async fn handle(&self, session_id: i64, session: &Session, msg: Message) -> ServerResult<Message> {
        match msg {
            Message::AuthRequest(req) => self.auth_request(session_id, req).await,
            Message::SetNickname(req) => self.set_nickname(session_id, session, req).await,
            Message::RegisterUser(req) => self.register_user(session_id, req).await,
            Message::ListChannels(_) => self.list_channels().await,
            Message::JoinChannel(req) => self.join_channel(session_id, session, req).await,
            Message::LeaveChannel(req) => self.leave_channel(session_id, session, req).await,
            Message::CreateChannel(req) => self.create_channel(session, req).await,
            Message::CreateSubchannel(req) => self.create_subchannel(session, req).await,
            Message::ListMessages(req) => self.list_messages(req).await,
            Message::PostMessage(req) => self.post_message(session_id, session, req).await,
            Message::EditMessage(req) => self.edit_message(session, req).await,
            Message::DeleteMessage(req) => self.delete_message(session, req).await,
            Message::AddSshKey(req) => self.add_ssh_key(session, req).await,
            Message::ChangePassword(req) => self.change_password(session, req).await,
            Message::GetUserInfo(req) => self.get_user_info(req).await,
            Message::Ping(_) => Ok(Message::Pong(Pong)),
            Message::Disconnect(_) => Ok(Message::Pong(Pong)),
            Message::UpdateSshKeyLabel(req) => self.update_ssh_key_label(session, req).await,
            Message::DeleteSshKey(req) => self.delete_ssh_key(session, req).await,
            Message::ListSshKeys(_) => self.list_ssh_keys(session).await,
            Message::GetSubchannels(req) => self.get_subchannels(req).await,
            Message::ListUsers(req) => self.list_users(req).await,
            Message::ListChannelUsers(req) => self.list_channel_users(req).await,
            Message::GetUnreadCounts(_) => self.get_unread_counts(session).await,
            Message::StartDm(req) => self.start_dm(session_id, session, req).await,
            Message::ProvidePublicKey(req) => self.provide_public_key(session, req).await,
            Message::AllowUnencrypted(req) => self.allow_unencrypted(session, req).await,
            Message::Logout(_) => self.logout(session_id, session).await,
            Message::UpdateReadState(req) => self.update_read_state(session, req).await,
            Message::SubscribeThread(req) => self.subscribe_thread(session_id, req).await,
            Message::UnsubscribeThread(req) => self.unsubscribe_thread(session_id, req).await,
            Message::SubscribeChannel(req) => self.subscribe_channel(session_id, req).await,
            Message::UnsubscribeChannel(req) => self.unsubscribe_channel(session_id, req).await,
            Message::ListServers(_) => self.list_servers().await,
            Message::RegisterServer(req) => self.register_server(req).await,
            Message::Heartbeat(req) => self.heartbeat(req).await,
            Message::VerifyResponse(_) => Ok(Message::HeartbeatAck(HeartbeatAck { success: true })),
            Message::BanUser(req) => self.ban_user(session, req).await,
            Message::BanIp(req) => self.ban_ip(session, req).await,
            Message::UnbanUser(req) => self.unban_user(req).await,
            Message::UnbanIp(req) => self.unban_ip(req).await,
            Message::ListBans(_) => self.list_bans().await,
            Message::DeleteUser(req) => self.delete_user(req).await,
            Message::DeleteChannel(req) => self.delete_channel(req).await,
            other => Err(ServerError::Protocol(format!("{:?} is not a client-originated request", other.msg_type()))),
        }
    }

    // ─── Identity ─────────────────────────────────────────────────────────

    async fn auth_request(&self, session_id: i64, req: AuthRequest) -> ServerResult<Message> {
        validate_nickname(&req.nickname)?;
        let Some(user) = db::users::find_by_nickname(&self.db.read, &req.nickname).await? else {
            return Ok(Message::AuthResponse(AuthResponse {
                success: false,
                user_id: None,
                nickname: None,
                is_admin: false,
                error: Some("no such user".into()),
            }));
        };
        if !auth::verify_password(&req.password, &user.password_hash) {
            return Ok(Message::AuthResponse(AuthResponse {
                success: false,
                user_id: None,
                nickname: None,
                is_admin: false,
                error: Some("invalid credentials".into()),
            }));
        }
        let ban_verdict = ratelimit::check_user_ban(&self.db, Some(user.id), &user.nickname).await?;
        if let BanVerdict::Banned { reason } = ban_verdict {
            return Err(ServerError::Banned(reason));
        }
        let mut writer = self.db.writer.lock().await;
        db::users::touch_last_seen(&mut writer, user.id, now_ms()).await?;
        drop(writer);
        self.sessions.update_session(session_id, |s| {
            s.user_id = Some(user.id);
            s.nickname = user.nickname.clone();
            s.state = SessionState::Authenticated;
            s.shadowbanned = matches!(ban_verdict, BanVerdict::Shadowbanned);
        });
        Ok(Message::AuthResponse(AuthResponse {
            success: true,
            user_id: Some(user.id),
            nickname: Some(user.nickname),
            is_admin: user.is_admin(),
            error: None,
        }))
    }

    async fn set_nickname(&self, session_id: i64, session: &Session, req: SetNickname) -> ServerResult<Message> {
        validate_nickname(&req.nickname)?;
        let ban_verdict = ratelimit::check_user_ban(&self.db, session.user_id, &req.nickname).await?;
        if let BanVerdict::Banned { reason } = ban_verdict {
            return Err(ServerError::Banned(reason));
        }
        self.sessions.update_session(session_id, |s| {
            s.nickname = req.nickname.clone();
            if s.state == SessionState::Unauthenticated {
                s.state = SessionState::Anonymous;
            }
            if matches!(ban_verdict, BanVerdict::Shadowbanned) {
                s.shadowbanned = true;
            }
        });
        Ok(Message::NicknameResponse(NicknameResponse {
            success: true,
            nickname: req.nickname,
            error: None,
        }))
    }

    async fn register_user(&self, session_id: i64, req: RegisterUser) -> ServerResult<Message> {
        validate_nickname(&req.nickname)?;
        if db::users::find_by_nickname(&self.db.read, &req.nickname).await?.is_some() {
            return Ok(Message::RegisterResponse(RegisterResponse {
                success: false,
                user_id: None,
                error: Some("nickname already taken".into()),
            }));
        }
        let hash = auth::hash_password(&req.password)?;
        let id = self.ids.next_id();
        let now = now_ms();
        let mut writer = self.db.writer.lock().await;
        db::users::insert(&mut writer, id, &req.nickname, &hash, now).await?;
        drop(writer);
        self.sessions.update_session(session_id, |s| {
            s.user_id = Some(id);
            s.nickname = req.nickname.clone();
            s.state = SessionState::Authenticated;
        });
        Ok(Message::RegisterResponse(RegisterResponse {
            success: true,
            user_id: Some(id),
            error: None,
        }))
    }

    async fn logout(&self, session_id: i64, session: &Session) -> ServerResult<Message> {
        self.sessions.update_session(session_id, |s| {
            s.user_id = None;
            s.state = SessionState::Anonymous;
        });
        let _ = session;
        Ok(Message::Pong(Pong))
    }

    async fn change_password(&self, session: &Session, req: ChangePassword) -> ServerResult<Message> {
        let Some(user_id) = session.user_id else {
            return Err(ServerError::AuthRequired);
        };
        let user = db::users::find_by_id(&self.db.read, user_id).await?.ok_or(ServerError::UserNotFound)?;
        if !auth::verify_password(&req.old_password, &user.password_hash) {
            return Ok(Message::PasswordChanged(PasswordChanged { success: false }));
        }
        let hash = auth::hash_password(&req.new_password)?;
        let mut writer = self.db.writer.lock().await;
        db::users::update_password(&mut writer, user_id, &hash).await?;
        Ok(Message::PasswordChanged(PasswordChanged { success: true }))
    }

    async fn get_user_info(&self, req: GetUserInfo) -> ServerResult<Message> {
        let user = match (req.user_id, req.nickname) {
            (Some(id), _) => db::users::find_by_id(&self.db.read, id).await?,
            (None, Some(nick)) => db::users::find_by_nickname(&self.db.read, &nick).await?,
            (None, None) => None,
        }
        .ok_or(ServerError::UserNotFound)?;
        let online = !self.sessions.sessions_for_user(user.id).is_empty();
        Ok(Message::UserInfo(UserInfo {
            user: UserSummary {
                id: user.id,
                nickname: user.nickname,
                is_admin: user.is_admin(),
                is_moderator: user.is_moderator(),
                online,
            },
        }))
    }

    async fn list_users(&self, req: ListUsers) -> ServerResult<Message> {
        let online_ids = self.sessions.online_user_ids();
        let users = db::users::list_all(&self.db.read)
            .await?
            .into_iter()
            .filter(|u| req.include_offline || online_ids.contains(&u.id))
            .map(|u| UserSummary {
                online: online_ids.contains(&u.id),
                is_admin: u.is_admin(),
                is_moderator: u.is_moderator(),
                id: u.id,
                nickname: u.nickname,
            })
            .collect();
        Ok(Message::UserList(UserList { users }))
    }

    async fn delete_user(&self, req: DeleteUser) -> ServerResult<Message> {
        let mut writer = self.db.writer.lock().await;
        db::users::delete(&mut writer, req.user_id).await?;
        Ok(Message::UserDeleted(UserDeleted { success: true }))
    }

    // ─── SSH keys ───────────────────────────────────────────────────────────

    async fn add_ssh_key(&self, session: &Session, req: AddSshKey) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let fingerprint = auth::ssh_fingerprint(&req.public_key);
        if db::ssh_keys::find_by_fingerprint(&self.db.read, &fingerprint).await?.is_some() {
            return Err(ServerError::Validation("key already registered".into()));
        }
        let id = self.ids.next_id();
        let now = now_ms();
        let mut writer = self.db.writer.lock().await;
        db::ssh_keys::insert(&mut writer, id, user_id, &fingerprint, &req.public_key, &req.key_type, req.label.as_deref(), now).await?;
        Ok(Message::SshKeyAdded(SshKeyAdded {
            key: SshKeySummary {
                id,
                fingerprint,
                key_type: req.key_type,
                label: req.label,
                added_at: now,
                last_used_at: None,
            },
        }))
    }

    async fn update_ssh_key_label(&self, session: &Session, req: UpdateSshKeyLabel) -> ServerResult<Message> {
        session.user_id.ok_or(ServerError::AuthRequired)?;
        let mut writer = self.db.writer.lock().await;
        db::ssh_keys::update_label(&mut writer, req.key_id, req.label.as_deref()).await?;
        Ok(Message::SshKeyLabelUpdated(SshKeyLabelUpdated { success: true, key_id: req.key_id }))
    }

    async fn delete_ssh_key(&self, session: &Session, req: DeleteSshKey) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let mut writer = self.db.writer.lock().await;
        let deleted = db::ssh_keys::delete(&mut writer, req.key_id, user_id).await?;
        Ok(Message::SshKeyDeleted(SshKeyDeleted { success: deleted, key_id: req.key_id }))
    }

    async fn list_ssh_keys(&self, session: &Session) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let keys = db::ssh_keys::list_for_user(&self.db.read, user_id)
            .await?
            .into_iter()
            .map(|k| SshKeySummary {
                id: k.id,
                fingerprint: k.fingerprint,
                key_type: k.key_type,
                label: k.label,
                added_at: k.added_at,
                last_used_at: k.last_used_at,
            })
            .collect();
        Ok(Message::SshKeyList(SshKeyList { keys }))
    }

    // ─── Channels ───────────────────────────────────────────────────────────

    async fn list_channels(&self) -> ServerResult<Message> {
        let channels = self.mem.list_channels().into_iter().filter(|c| !c.is_subchannel() && !c.is_dm).map(channel_summary).collect();
        Ok(Message::ChannelList(ChannelList { channels }))
    }

    async fn get_subchannels(&self, req: GetSubchannels) -> ServerResult<Message> {
        let subchannels = self.mem.subchannels_of(req.parent_id).into_iter().map(channel_summary).collect();
        Ok(Message::SubchannelList(SubchannelList { subchannels }))
    }

    async fn create_channel(&self, session: &Session, req: CreateChannel) -> ServerResult<Message> {
        session.user_id.ok_or(ServerError::AuthRequired)?;
        if db::channels::find_by_name(&self.db.read, &req.name).await?.is_some() {
            return Err(ServerError::Validation("channel name already in use".into()));
        }
        let id = self.ids.next_id();
        let now = now_ms();
        let mut writer = self.db.writer.lock().await;
        db::channels::insert(
            &mut writer,
            id,
            &req.name,
            &req.display_name,
            req.description.as_deref(),
            req.channel_type as i64,
            req.retention_hours as i64,
            session.user_id,
            now,
            req.is_private,
            None,
            false,
        )
        .await?;
        drop(writer);
        let channel = Channel {
            id,
            name: req.name,
            display_name: req.display_name,
            description: req.description,
            channel_type: req.channel_type as i64,
            retention_hours: req.retention_hours as i64,
            created_by: session.user_id,
            created_at: now,
            is_private: req.is_private,
            parent_id: None,
            is_dm: false,
        };
        self.mem.insert_channel(channel.clone());
        let summary = channel_summary(channel);
        self.sessions.broadcast_server_wide(&to_frame(self.protocol_version, Message::ChannelCreated(ChannelCreated { channel: summary.clone() }))).await;
        Ok(Message::ChannelCreated(ChannelCreated { channel: summary }))
    }

    async fn create_subchannel(&self, session: &Session, req: CreateSubchannel) -> ServerResult<Message> {
        session.user_id.ok_or(ServerError::AuthRequired)?;
        let parent = self.mem.get_channel(req.parent_id).ok_or(ServerError::ChannelNotFound)?;
        let id = self.ids.next_id();
        let now = now_ms();
        let name = format!("{}/{}", parent.name, req.name);
        let mut writer = self.db.writer.lock().await;
        db::channels::insert(
            &mut writer,
            id,
            &name,
            &req.display_name,
            req.description.as_deref(),
            parent.channel_type,
            parent.retention_hours,
            session.user_id,
            now,
            parent.is_private,
            Some(parent.id),
            false,
        )
        .await?;
        drop(writer);
        let channel = Channel {
            id,
            name,
            display_name: req.display_name,
            description: req.description,
            channel_type: parent.channel_type,
            retention_hours: parent.retention_hours,
            created_by: session.user_id,
            created_at: now,
            is_private: parent.is_private,
            parent_id: Some(parent.id),
            is_dm: false,
        };
        self.mem.insert_channel(channel.clone());
        let summary = channel_summary(channel);
        self.sessions.broadcast_to_channel(parent.id, &to_frame(self.protocol_version, Message::SubchannelCreated(SubchannelCreated { channel: summary.clone() })), None).await;
        Ok(Message::SubchannelCreated(SubchannelCreated { channel: summary }))
    }

    async fn delete_channel(&self, req: DeleteChannel) -> ServerResult<Message> {
        let mut writer = self.db.writer.lock().await;
        db::channels::delete(&mut writer, req.channel_id).await?;
        drop(writer);
        self.mem.remove_channel(req.channel_id);
        self.sessions
            .broadcast_server_wide(&to_frame(self.protocol_version, Message::ChannelDeleted(ChannelDeleted { channel_id: req.channel_id })))
            .await;
        Ok(Message::ChannelDeleted(ChannelDeleted { channel_id: req.channel_id }))
    }

    async fn join_channel(&self, session_id: i64, session: &Session, req: JoinChannel) -> ServerResult<Message> {
        let channel = self.mem.get_channel(req.channel_id).ok_or(ServerError::ChannelNotFound)?;
        if channel.is_private || channel.is_dm {
            let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
            if !db::dm::has_access(&self.db.read, channel.id, user_id).await? {
                return Err(ServerError::Forbidden("no access to this channel".into()));
            }
        }
        self.sessions.join_channel(session_id, channel.id);
        self.subscriptions.subscribe_channel(session_id, channel.id)?;
        self.sessions.presence_on_join(channel.id, req.subchannel_id, session_id, session.user_id.unwrap_or(0), &session.nickname).await;
        Ok(Message::JoinResponse(JoinResponse {
            success: true,
            channel: Some(channel_summary(channel)),
            error: None,
        }))
    }

    async fn leave_channel(&self, session_id: i64, session: &Session, req: LeaveChannel) -> ServerResult<Message> {
        self.sessions.leave_channel(session_id, req.channel_id);
        self.subscriptions.unsubscribe_channel(session_id, req.channel_id);
        self.sessions.presence_on_leave(req.channel_id, req.subchannel_id, session_id, session.user_id.unwrap_or(0), &session.nickname).await;
        Ok(Message::LeaveResponse(LeaveResponse { success: true }))
    }

    async fn list_channel_users(&self, req: ListChannelUsers) -> ServerResult<Message> {
        let member_ids = self.sessions.channel_members(req.channel_id);
        let mut users = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if let Some(s) = self.sessions.get_session(id) {
                let (is_admin, is_moderator) = match s.user_id {
                    Some(uid) => db::users::find_by_id(&self.db.read, uid)
                        .await?
                        .map(|u| (u.is_admin(), u.is_moderator()))
                        .unwrap_or((false, false)),
                    None => (false, false),
                };
                users.push(UserSummary {
                    id: s.user_id.unwrap_or(0),
                    nickname: s.nickname,
                    is_admin,
                    is_moderator,
                    online: true,
                });
            }
        }
        Ok(Message::ChannelUserList(ChannelUserList { users }))
    }

    // ─── Messages ───────────────────────────────────────────────────────────

    async fn list_messages(&self, req: ListMessages) -> ServerResult<Message> {
        let messages = if let Some(parent_id) = req.parent_id {
            self.mem.direct_replies(parent_id)
        } else {
            self.mem.root_messages(req.channel_id, req.subchannel_id, req.limit as usize)
        }
        .into_iter()
        .map(|m| live_message_summary(&m))
        .collect();
        Ok(Message::MessageList(MessageList { messages }))
    }

    async fn post_message(&self, session_id: i64, session: &Session, req: PostMessage) -> ServerResult<Message> {
        validate_content(&req.content)?;
        self.rate_limiter.check_message_rate(session_id)?;
        let channel = self.mem.get_channel(req.channel_id).ok_or(ServerError::ChannelNotFound)?;

        let thread_root_id = match req.parent_id {
            Some(parent_id) => {
                let parent = self.mem.get_message(parent_id).ok_or(ServerError::ThreadNotFound)?;
                parent.thread_root_id
            }
            None => 0, // patched below once we know our own id
        };
        let id = self.ids.next_id();
        let thread_root_id = if thread_root_id == 0 { id } else { thread_root_id };

        let now = now_ms();
        let row = MessageRow {
            id,
            channel_id: channel.id,
            subchannel_id: req.subchannel_id,
            parent_id: req.parent_id,
            thread_root_id,
            author_user_id: session.user_id,
            author_nickname: session.nickname.clone(),
            content: req.content,
            created_at: now,
            edited_at: None,
            deleted_at: None,
        };
        let msg = self.mem.insert_message(row);

        // Shadowbanned posters see an ordinary success reply but their
        // content never reaches anyone else (spec.md §9: "silently drop
        // broadcasts emitted by the offender to others").
        if !session.shadowbanned {
            let broadcast = Message::NewMessage(NewMessage { message: live_message_summary(&msg) });
            let frame = to_frame(self.protocol_version, broadcast);
            self.sessions.broadcast_to_channel(channel.id, &frame, Some(session_id)).await;
            if req.parent_id.is_some() {
                let subscribers = self.subscriptions.thread_subscribers(thread_root_id);
                self.sessions.broadcast_to_thread_subscribers(subscribers, &frame, Some(session_id)).await;
            }
        }

        Ok(Message::MessagePosted(MessagePosted { success: true, message_id: Some(id) }))
    }

    async fn edit_message(&self, session: &Session, req: EditMessage) -> ServerResult<Message> {
        validate_content(&req.content)?;
        let msg = self.mem.get_message(req.message_id).ok_or(ServerError::MessageNotFound)?;
        self.authorize_on_own_message(session, msg.author_user_id).await?;
        let now = now_ms();
        self.mem.edit_message(req.message_id, req.content.clone(), now);

        let mut writer = self.db.writer.lock().await;
        db::messages::insert_version(&mut writer, req.message_id, &req.content, &session.nickname, now, MESSAGE_VERSION_EDITED).await?;
        drop(writer);

        if !session.shadowbanned {
            let broadcast = Message::MessageEdited(MessageEdited { message_id: req.message_id, content: req.content.clone(), edited_at: now });
            let frame = to_frame(self.protocol_version, broadcast);
            self.sessions.broadcast_to_channel(msg.channel_id, &frame, None).await;
            let subscribers = self.subscriptions.thread_subscribers(msg.thread_root_id);
            self.sessions.broadcast_to_thread_subscribers(subscribers, &frame, None).await;
        }

        Ok(Message::MessageEdited(MessageEdited { message_id: req.message_id, content: req.content, edited_at: now }))
    }

    async fn delete_message(&self, session: &Session, req: DeleteMessage) -> ServerResult<Message> {
        let msg = self.mem.get_message(req.message_id).ok_or(ServerError::MessageNotFound)?;
        self.authorize_on_own_message(session, msg.author_user_id).await?;
        let now = now_ms();
        self.mem.delete_message(req.message_id, now);

        let mut writer = self.db.writer.lock().await;
        db::messages::insert_version(&mut writer, req.message_id, "", &session.nickname, now, MESSAGE_VERSION_DELETED).await?;
        drop(writer);

        if !session.shadowbanned {
            let broadcast = Message::MessageDeleted(MessageDeleted { message_id: req.message_id, deleted_at: now });
            let frame = to_frame(self.protocol_version, broadcast);
            self.sessions.broadcast_to_channel(msg.channel_id, &frame, None).await;
            let subscribers = self.subscriptions.thread_subscribers(msg.thread_root_id);
            self.sessions.broadcast_to_thread_subscribers(subscribers, &frame, None).await;
        }

        Ok(Message::MessageDeleted(MessageDeleted { message_id: req.message_id, deleted_at: now }))
    }

    /// Authors may always edit/delete their own message; anyone else needs
    /// admin or moderator flags (admin override per handler contract).
    async fn authorize_on_own_message(&self, session: &Session, author_user_id: Option<i64>) -> ServerResult<()> {
        if session.user_id.is_some() && session.user_id == author_user_id {
            return Ok(());
        }
        let Some(user_id) = session.user_id else {
            return Err(ServerError::AuthRequired);
        };
        let user = db::users::find_by_id(&self.db.read, user_id).await?.ok_or(ServerError::UserNotFound)?;
        if user.is_admin() || user.is_moderator() {
            return Ok(());
        }
        Err(ServerError::Forbidden("not the author of this message".into()))
    }

    // ─── Read state / unread counts ─────────────────────────────────────────

    async fn update_read_state(&self, session: &Session, req: UpdateReadState) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let mut writer = self.db.writer.lock().await;
        db::read_state::upsert(&mut writer, user_id, req.channel_id, req.subchannel_id.unwrap_or(0), req.last_read_at, now_ms()).await?;
        Ok(Message::Pong(Pong))
    }

    async fn get_unread_counts(&self, session: &Session) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let states = db::read_state::list_for_user(&self.db.read, user_id).await?;
        let mut counts = Vec::with_capacity(states.len());
        for state in states {
            let subchannel_id = if state.subchannel_id == 0 { None } else { Some(state.subchannel_id) };
            let unread = self
                .mem
                .root_messages(state.channel_id, subchannel_id, usize::MAX)
                .into_iter()
                .filter(|m| m.created_at > state.last_read_at)
                .count() as u32;
            counts.push(UnreadCount { channel_id: state.channel_id, subchannel_id, count: unread });
        }
        Ok(Message::UnreadCounts(UnreadCounts { counts }))
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    async fn subscribe_thread(&self, session_id: i64, req: SubscribeThread) -> ServerResult<Message> {
        self.subscriptions.subscribe_thread(session_id, req.thread_root_id)?;
        Ok(Message::SubscribeOk(SubscribeOk { kind: SUBSCRIBE_KIND_THREAD, id: req.thread_root_id, subchannel_id: None }))
    }

    async fn unsubscribe_thread(&self, session_id: i64, req: UnsubscribeThread) -> ServerResult<Message> {
        self.subscriptions.unsubscribe_thread(session_id, req.thread_root_id);
        Ok(Message::Pong(Pong))
    }

    async fn subscribe_channel(&self, session_id: i64, req: SubscribeChannel) -> ServerResult<Message> {
        self.subscriptions.subscribe_channel(session_id, req.channel_id)?;
        Ok(Message::SubscribeOk(SubscribeOk { kind: SUBSCRIBE_KIND_CHANNEL, id: req.channel_id, subchannel_id: req.subchannel_id }))
    }

    async fn unsubscribe_channel(&self, session_id: i64, req: UnsubscribeChannel) -> ServerResult<Message> {
        self.subscriptions.unsubscribe_channel(session_id, req.channel_id);
        Ok(Message::Pong(Pong))
    }

    // ─── Direct messages ─────────────────────────────────────────────────────

    async fn start_dm(&self, session_id: i64, session: &Session, req: StartDm) -> ServerResult<Message> {
        let initiator_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let target = match (req.target_user_id, &req.target_nickname) {
            (Some(id), _) => db::users::find_by_id(&self.db.read, id).await?,
            (None, Some(nick)) => db::users::find_by_nickname(&self.db.read, nick).await?,
            (None, None) => None,
        }
        .ok_or(ServerError::UserNotFound)?;

        if let Some(existing) = db::dm::find_dm_channel(&self.db.read, initiator_id, target.id).await? {
            return Ok(Message::DmReady(DmReady { channel_id: existing.id, other_public_key: target.encryption_public_key }));
        }

        let initiator = db::users::find_by_id(&self.db.read, initiator_id).await?.ok_or(ServerError::UserNotFound)?;
        let both_have_keys = initiator.encryption_public_key.is_some() && target.encryption_public_key.is_some();
        if !both_have_keys && !req.allow_unencrypted {
            let invite_id = self.ids.next_id();
            let now = now_ms();
            let mut writer = self.db.writer.lock().await;
            db::dm::insert_invite(&mut writer, invite_id, initiator_id, target.id, false, now).await?;
            drop(writer);
            for target_session in self.sessions.sessions_for_user(target.id) {
                let frame = to_frame(
                    self.protocol_version,
                    Message::DmRequest(DmRequest { channel_id: invite_id, initiator_user_id: initiator_id, initiator_nickname: session.nickname.clone() }),
                );
                self.sessions.connection(target_session).map(|c| tokio::spawn(async move { let _ = c.write_bytes(&frame).await; }));
            }
            return Ok(Message::DmPending(DmPending { channel_id: invite_id, waiting_for_user_id: target.id }));
        }

        let channel_id = self.ids.next_id();
        let now = now_ms();
        let mut writer = self.db.writer.lock().await;
        db::channels::insert(&mut writer, channel_id, &format!("dm-{channel_id}"), "Direct Message", None, CHANNEL_TYPE_CHAT, 0, Some(initiator_id), now, true, None, true).await?;
        db::dm::grant_access(&mut writer, channel_id, initiator_id, now).await?;
        db::dm::grant_access(&mut writer, channel_id, target.id, now).await?;
        drop(writer);
        self.mem.insert_channel(Channel {
            id: channel_id,
            name: format!("dm-{channel_id}"),
            display_name: "Direct Message".into(),
            description: None,
            channel_type: CHANNEL_TYPE_CHAT,
            retention_hours: 0,
            created_by: Some(initiator_id),
            created_at: now,
            is_private: true,
            parent_id: None,
            is_dm: true,
        });
        self.sessions.join_channel(session_id, channel_id);
        Ok(Message::DmReady(DmReady { channel_id, other_public_key: target.encryption_public_key }))
    }

    /// The missing party in a pending `StartDM` handshake supplies their
    /// encryption key. If this completes the invite (both sides now have a
    /// key), finalize the DM exactly as the direct `StartDM` path would:
    /// create the channel, grant access to both users, delete the invite,
    /// and emit `DmReady` to both sides (spec §4.10.1, §8 DM lifecycle
    /// scenario).
    async fn provide_public_key(&self, session: &Session, req: ProvidePublicKey) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let mut writer = self.db.writer.lock().await;
        db::users::set_encryption_public_key(&mut writer, user_id, &req.public_key).await?;
        drop(writer);

        let Some(invite) = db::dm::find_invite_by_id(&self.db.read, req.dm_channel_id).await? else {
            return Ok(Message::KeyRequired(KeyRequired { dm_channel_id: req.dm_channel_id }));
        };
        if invite.initiator_user_id != user_id && invite.target_user_id != user_id {
            return Ok(Message::KeyRequired(KeyRequired { dm_channel_id: req.dm_channel_id }));
        }

        let initiator = db::users::find_by_id(&self.db.read, invite.initiator_user_id).await?.ok_or(ServerError::UserNotFound)?;
        let target = db::users::find_by_id(&self.db.read, invite.target_user_id).await?.ok_or(ServerError::UserNotFound)?;
        if initiator.encryption_public_key.is_none() || target.encryption_public_key.is_none() {
            return Ok(Message::KeyRequired(KeyRequired { dm_channel_id: req.dm_channel_id }));
        }

        let channel_id = self.ids.next_id();
        let now = now_ms();
        let mut writer = self.db.writer.lock().await;
        db::channels::insert(
            &mut writer,
            channel_id,
            &format!("dm-{channel_id}"),
            "Direct Message",
            None,
            CHANNEL_TYPE_CHAT,
            0,
            Some(invite.initiator_user_id),
            now,
            true,
            None,
            true,
        )
        .await?;
        db::dm::grant_access(&mut writer, channel_id, invite.initiator_user_id, now).await?;
        db::dm::grant_access(&mut writer, channel_id, invite.target_user_id, now).await?;
        db::dm::delete_invite(&mut writer, invite.id).await?;
        drop(writer);

        self.mem.insert_channel(Channel {
            id: channel_id,
            name: format!("dm-{channel_id}"),
            display_name: "Direct Message".into(),
            description: None,
            channel_type: CHANNEL_TYPE_CHAT,
            retention_hours: 0,
            created_by: Some(invite.initiator_user_id),
            created_at: now,
            is_private: true,
            parent_id: None,
            is_dm: true,
        });

        let reply = Message::DmReady(DmReady { channel_id, other_public_key: target.encryption_public_key.clone() });
        let to_initiator = Message::DmReady(DmReady { channel_id, other_public_key: target.encryption_public_key });
        let to_target = Message::DmReady(DmReady { channel_id, other_public_key: initiator.encryption_public_key });
        for sid in self.sessions.sessions_for_user(invite.initiator_user_id) {
            self.sessions.join_channel(sid, channel_id);
            let frame = to_frame(self.protocol_version, to_initiator.clone());
            if let Some(conn) = self.sessions.connection(sid) {
                let _ = conn.write_bytes(&frame).await;
            }
        }
        for sid in self.sessions.sessions_for_user(invite.target_user_id) {
            self.sessions.join_channel(sid, channel_id);
            let frame = to_frame(self.protocol_version, to_target.clone());
            if let Some(conn) = self.sessions.connection(sid) {
                let _ = conn.write_bytes(&frame).await;
            }
        }

        Ok(reply)
    }

    async fn allow_unencrypted(&self, session: &Session, req: AllowUnencrypted) -> ServerResult<Message> {
        let user_id = session.user_id.ok_or(ServerError::AuthRequired)?;
        let mut writer = self.db.writer.lock().await;
        db::dm::grant_access(&mut writer, req.dm_channel_id, user_id, now_ms()).await?;
        Ok(Message::DmReady(DmReady { channel_id: req.dm_channel_id, other_public_key: None }))
    }

    // ─── Bans ─────────────────────────────────────────────────────────────

    async fn ban_user(&self, session: &Session, req: BanUser) -> ServerResult<Message> {
        let id = self.ids.next_id();
        let now = now_ms();
        let ban = Ban {
            id,
            ban_type: BAN_TYPE_USER,
            user_id: req.user_id,
            nickname: req.nickname.clone(),
            ip_cidr: None,
            reason: req.reason,
            shadowban: req.shadowban,
            banned_at: now,
            banned_until: req.duration_secs.map(|d| now + d * 1000),
            banned_by: session.user_id.unwrap_or(0),
        };
        let mut writer = self.db.writer.lock().await;
        db::bans::insert(&mut writer, &ban).await?;
        drop(writer);
        if req.shadowban {
            for sid in self.matching_sessions(req.user_id, req.nickname.as_deref()) {
                self.sessions.update_session(sid, |s| s.shadowbanned = true);
            }
        } else {
            for sid in self.matching_sessions(req.user_id, req.nickname.as_deref()) {
                if let Some(conn) = self.sessions.connection(sid) {
                    conn.close().await;
                }
                self.sessions.deregister(sid);
            }
        }
        Ok(Message::UserBanned(UserBanned { ban_id: id }))
    }

    async fn ban_ip(&self, session: &Session, req: BanIp) -> ServerResult<Message> {
        let id = self.ids.next_id();
        let now = now_ms();
        let ban = Ban {
            id,
            ban_type: BAN_TYPE_IP,
            user_id: None,
            nickname: None,
            ip_cidr: Some(req.ip_cidr),
            reason: req.reason,
            shadowban: req.shadowban,
            banned_at: now,
            banned_until: req.duration_secs.map(|d| now + d * 1000),
            banned_by: session.user_id.unwrap_or(0),
        };
        let mut writer = self.db.writer.lock().await;
        db::bans::insert(&mut writer, &ban).await?;
        Ok(Message::IpBanned(IpBanned { ban_id: id }))
    }

    fn matching_sessions(&self, user_id: Option<i64>, nickname: Option<&str>) -> Vec<i64> {
        match user_id {
            Some(uid) => self.sessions.sessions_for_user(uid),
            None => self
                .sessions
                .all_session_ids()
                .into_iter()
                .filter(|id| self.sessions.get_session(*id).is_some_and(|s| Some(s.nickname.as_str()) == nickname))
                .collect(),
        }
    }

    async fn unban_user(&self, req: UnbanUser) -> ServerResult<Message> {
        // `ban_id` doubles as a (user_id,nickname)-agnostic token here: callers
        // that only have the ban's user_id look it up via list_bans first.
        let mut writer = self.db.writer.lock().await;
        let success = db::bans::remove_user_ban(&mut writer, Some(req.ban_id), "").await?;
        Ok(Message::UserUnbanned(UserUnbanned { success }))
    }

    async fn unban_ip(&self, req: UnbanIp) -> ServerResult<Message> {
        let bans = db::bans::list_active(&self.db.read, now_ms()).await?;
        let Some(ban) = bans.into_iter().find(|b| b.id == req.ban_id) else {
            return Ok(Message::IpUnbanned(IpUnbanned { success: false }));
        };
        let Some(cidr) = ban.ip_cidr else {
            return Ok(Message::IpUnbanned(IpUnbanned { success: false }));
        };
        let mut writer = self.db.writer.lock().await;
        let success = db::bans::remove_ip_ban(&mut writer, &cidr).await?;
        Ok(Message::IpUnbanned(IpUnbanned { success }))
    }

    async fn list_bans(&self) -> ServerResult<Message> {
        let bans = db::bans::list_active(&self.db.read, now_ms())
            .await?
            .into_iter()
            .map(|b| BanSummary {
                id: b.id,
                ban_type: b.ban_type as u8,
                user_id: b.user_id,
                nickname: b.nickname,
                ip_cidr: b.ip_cidr,
                reason: b.reason,
                shadowban: b.shadowban,
                banned_at: b.banned_at,
                banned_until: b.banned_until,
                banned_by: b.banned_by,
            })
            .collect();
        Ok(Message::BanList(BanList { bans }))
    }

    // ─── Server directory ───────────────────────────────────────────────────

    async fn list_servers(&self) -> ServerResult<Message> {
        let servers = db::servers::list_public(&self.db.read)
            .await?
            .into_iter()
            .map(|s| ServerSummary {
                id: s.id,
                hostname: s.hostname,
                port: s.port as u16,
                name: s.name,
                description: s.description,
                user_count: s.user_count as u32,
                uptime_seconds: s.uptime_seconds as u64,
                channel_count: s.channel_count as u32,
                is_public: s.is_public,
            })
            .collect();
        Ok(Message::ServerList(ServerList { servers }))
    }

    async fn register_server(&self, req: RegisterServer) -> ServerResult<Message> {
        let now = now_ms();
        let row = DiscoveredServer {
            id: 0,
            hostname: req.hostname,
            port: req.port as i64,
            name: req.name,
            description: req.description,
            user_count: req.user_count as i64,
            uptime_seconds: req.uptime_seconds as i64,
            channel_count: req.channel_count as i64,
            last_heartbeat: now,
            heartbeat_interval: req.heartbeat_interval as i64,
            is_public: req.is_public,
            source_ip: String::new(),
            discovered_via: "register".into(),
        };
        let mut writer = self.db.writer.lock().await;
        let id = db::servers::upsert(&mut writer, &row).await?;
        Ok(Message::RegisterAck(RegisterAck { success: true, server_id: Some(id), challenge_id: None }))
    }

    async fn heartbeat(&self, req: Heartbeat) -> ServerResult<Message> {
        let _ = req;
        Ok(Message::HeartbeatAck(HeartbeatAck { success: true }))
    }
}

/// Requests an `Unauthenticated` session may issue before picking a
/// nickname or authenticating.
fn is_allowed_unauthenticated(msg: &Message) -> bool {
    matches!(
        msg,
        Message::SetNickname(_)
            | Message::AuthRequest(_)
            | Message::RegisterUser(_)
            | Message::Ping(_)
            | Message::Disconnect(_)
            | Message::ListChannels(_)
            | Message::ListMessages(_)
            | Message::GetSubchannels(_)
    )
}

fn requires_admin(msg: &Message) -> bool {
    matches!(
        msg,
        Message::BanUser(_)
            | Message::BanIp(_)
            | Message::UnbanUser(_)
            | Message::UnbanIp(_)
            | Message::ListBans(_)
            | Message::DeleteUser(_)
            | Message::DeleteChannel(_)
    )
}

fn error_message(err: &ServerError) -> Message {
    Message::ErrorMessage(ErrorMessage::from_server_error(err))
}

fn channel_summary(c: Channel) -> ChannelSummary {
    ChannelSummary {
        id: c.id,
        name: c.name,
        display_name: c.display_name,
        description: c.description,
        channel_type: c.channel_type as u8,
        retention_hours: c.retention_hours as u32,
        created_by: c.created_by,
        created_at: c.created_at,
        is_private: c.is_private,
        parent_id: c.parent_id,
        is_dm: c.is_dm,
    }
}

fn live_message_summary(m: &crate::store::LiveMessage) -> MessageSummary {
    let row = m.to_row();
    MessageSummary {
        id: row.id,
        channel_id: row.channel_id,
        subchannel_id: row.subchannel_id,
        parent_id: row.parent_id,
        thread_root_id: row.thread_root_id,
        author_user_id: row.author_user_id,
        author_nickname: row.author_nickname,
        content: row.content,
        created_at: row.created_at,
        edited_at: row.edited_at,
        deleted_at: row.deleted_at,
        reply_count: m.reply_count.load(std::sync::atomic::Ordering::SeqCst),
    }
}

fn to_frame(protocol_version: u8, msg: Message) -> crate::wire::Frame {
    crate::wire::Frame::new(protocol_version, msg.msg_type(), msg.encode())
}
