//! The persistent store (spec §4.4): one writer connection, a read pool, a
//! hand-rolled migration engine, and CRUD for every entity in spec §3.
//!
//! SQLite in WAL mode gives us a single-file durable store with the
//! concurrency shape the spec wants: many readers, exactly one writer. sqlx
//! pools don't let us pin a single unshared connection, so the writer is a
//! bare `SqliteConnection` behind a `tokio::sync::Mutex` — its critical
//! section spans `.await` (the query), so this has to be a tokio mutex, not
//! `parking_lot`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{ServerError, ServerResult};
use crate::models::*;

pub type ReadPool = SqlitePool;

/// The persistent store. `read` serves concurrent `SELECT`s; `writer` is the
/// single connection every mutation goes through, matching spec §4.4's "one
/// writer connection (unshared, never pooled)".
pub struct Store {
    pub read: ReadPool,
    pub writer: Mutex<SqliteConnection>,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

async fn configure(conn_options: SqliteConnectOptions) -> SqliteConnectOptions {
    conn_options
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
}

impl Store {
    /// Open (creating if absent) the database at `path`, back it up if it
    /// already exists and there are pending migrations, run migrations, and
    /// return a store with the writer connection and read pool wired up.
    pub async fn open(path: &str, read_max_connections: u32, read_max_idle: u32) -> ServerResult<Self> {
        let existed = Path::new(path).exists();

        let writer_opts = configure(
            SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
                .map_err(|e| ServerError::Internal(anyhow::anyhow!(e)))?
                .create_if_missing(true),
        )
        .await;
        let mut writer = SqliteConnection::connect_with(&writer_opts).await?;

        let pending = migrations::pending_versions(&mut writer).await?;
        if existed && !pending.is_empty() {
            backup_database_file(path)?;
        }
        migrations::run(&mut writer, &pending).await?;

        let read_opts = configure(
            SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
                .map_err(|e| ServerError::Internal(anyhow::anyhow!(e)))?
                .create_if_missing(true),
        )
        .await;
        let read = SqlitePoolOptions::new()
            .max_connections(read_max_connections)
            .min_connections(read_max_idle.min(read_max_connections))
            .max_lifetime(Duration::from_secs(5 * 60))
            .connect_with(read_opts)
            .await?;

        Ok(Self {
            read,
            writer: Mutex::new(writer),
        })
    }
}

fn backup_database_file(path: &str) -> ServerResult<()> {
    let backup_path = format!("{path}.bak.{}", now_ms());
    if let Err(e) = std::fs::copy(path, &backup_path) {
        tracing::warn!(error = %e, path, "failed to back up database before migrating");
    } else {
        tracing::info!(backup_path, "backed up database before applying migrations");
    }
    Ok(())
}

// ─── Migration engine (spec §4.4 "migration engine contract") ──────────────

pub mod migrations {
    use super::*;

    pub struct Migration {
        pub version: i64,
        pub sql: &'static str,
    }

    /// Ordered by version. Per-version DDL text is out of core scope per
    /// spec.md §1, but a working schema has to exist for the CRUD layer
    /// below to operate against, so version 1 lays out the full schema of
    /// spec.md §3/§6 in one shot; later versions are left as the hook point
    /// a real deployment would use for incremental changes.
    fn all() -> Vec<Migration> {
        vec![Migration {
            version: 1,
            sql: include_str!("../migrations/0001_initial_schema.sql"),
        }]
    }

    async fn current_version(conn: &mut SqliteConnection) -> ServerResult<i64> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        )
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(r) => Ok(r.get::<i64, _>("version")),
            None => {
                sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
                    .execute(&mut *conn)
                    .await?;
                Ok(0)
            }
        }
    }

    /// The migrations that still need to run, in version order.
    pub async fn pending_versions(conn: &mut SqliteConnection) -> ServerResult<Vec<Migration>> {
        let current = current_version(conn).await?;
        let mut pending: Vec<Migration> = all().into_iter().filter(|m| m.version > current).collect();
        pending.sort_by_key(|m| m.version);
        Ok(pending)
    }

    /// Apply each pending migration in its own transaction, updating the
    /// version row on commit. Any failure aborts startup — migrations never
    /// partially apply.
    pub async fn run(conn: &mut SqliteConnection, pending: &[Migration]) -> ServerResult<()> {
        for migration in pending {
            let mut tx = conn.begin().await?;
            for statement in split_statements(migration.sql) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("UPDATE schema_version SET version = ?")
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version = migration.version, "applied migration");
        }
        Ok(())
    }

    /// Splits a migration file on statement-terminating semicolons. Good
    /// enough for the DDL-only statements our migrations contain — none of
    /// them embed a `;` inside a string literal or trigger body.
    fn split_statements(sql: &'static str) -> impl Iterator<Item = &'static str> {
        sql.split(';').map(str::trim).filter(|s| !s.is_empty())
    }
}

// ─── Channels ───────────────────────────────────────────────────────────────

pub mod channels {
    use super::*;

    pub async fn insert(
        writer: &mut SqliteConnection,
        id: i64,
        name: &str,
        display_name: &str,
        description: Option<&str>,
        channel_type: i64,
        retention_hours: i64,
        created_by: Option<i64>,
        created_at: i64,
        is_private: bool,
        parent_id: Option<i64>,
        is_dm: bool,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO channels (id, name, display_name, description, channel_type, \
             retention_hours, created_by, created_at, is_private, parent_id, is_dm) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(display_name)
        .bind(description)
        .bind(channel_type)
        .bind(retention_hours)
        .bind(created_by)
        .bind(created_at)
        .bind(is_private)
        .bind(parent_id)
        .bind(is_dm)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn list_all(read: &ReadPool) -> ServerResult<Vec<Channel>> {
        Ok(sqlx::query_as::<_, Channel>("SELECT * FROM channels ORDER BY id").fetch_all(read).await?)
    }

    pub async fn find_by_name(read: &ReadPool, name: &str) -> ServerResult<Option<Channel>> {
        Ok(sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE name = ?")
            .bind(name)
            .fetch_optional(read)
            .await?)
    }

    pub async fn delete(writer: &mut SqliteConnection, id: i64) -> ServerResult<()> {
        sqlx::query("DELETE FROM channels WHERE id = ?").bind(id).execute(writer).await?;
        Ok(())
    }
}

// ─── Users ──────────────────────────────────────────────────────────────────

pub mod users {
    use super::*;

    pub async fn insert(
        writer: &mut SqliteConnection,
        id: i64,
        nickname: &str,
        password_hash: &str,
        created_at: i64,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO users (id, nickname, user_flags, password_hash, created_at, last_seen) \
             VALUES (?, ?, 0, ?, ?, ?)",
        )
        .bind(id)
        .bind(nickname)
        .bind(password_hash)
        .bind(created_at)
        .bind(created_at)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn find_by_nickname(read: &ReadPool, nickname: &str) -> ServerResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE nickname = ?")
            .bind(nickname)
            .fetch_optional(read)
            .await?)
    }

    pub async fn find_by_id(read: &ReadPool, id: i64) -> ServerResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(read)
            .await?)
    }

    pub async fn list_all(read: &ReadPool) -> ServerResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY nickname").fetch_all(read).await?)
    }

    pub async fn touch_last_seen(writer: &mut SqliteConnection, id: i64, now: i64) -> ServerResult<()> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(writer)
            .await?;
        Ok(())
    }

    pub async fn update_password(writer: &mut SqliteConnection, id: i64, hash: &str) -> ServerResult<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(writer)
            .await?;
        Ok(())
    }

    pub async fn set_encryption_public_key(
        writer: &mut SqliteConnection,
        id: i64,
        key: &[u8],
    ) -> ServerResult<()> {
        sqlx::query("UPDATE users SET encryption_public_key = ? WHERE id = ?")
            .bind(key)
            .bind(id)
            .execute(writer)
            .await?;
        Ok(())
    }

    /// Deleting a user anonymizes their authored messages rather than
    /// cascading — spec §3: `author_user_id ← NULL`, nickname preserved.
    pub async fn delete(writer: &mut SqliteConnection, id: i64) -> ServerResult<()> {
        let mut tx = writer.begin().await?;
        sqlx::query("UPDATE messages SET author_user_id = NULL WHERE author_user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

pub mod messages {
    use super::*;

    fn path_for(created_at: i64, parent_path: Option<&str>) -> String {
        let segment = format!("{created_at:010}.");
        match parent_path {
            Some(parent) => format!("{parent}{segment}"),
            None => segment,
        }
    }

    pub async fn insert(
        writer: &mut SqliteConnection,
        row: &MessageRow,
    ) -> ServerResult<()> {
        let parent_path: Option<String> = match row.parent_id {
            Some(parent_id) => {
                sqlx::query("SELECT path FROM messages WHERE id = ?")
                    .bind(parent_id)
                    .fetch_optional(&mut *writer)
                    .await?
                    .map(|r| r.get::<String, _>("path"))
            }
            None => None,
        };
        let path = path_for(row.created_at, parent_path.as_deref());

        sqlx::query(
            "INSERT INTO messages (id, channel_id, subchannel_id, parent_id, thread_root_id, \
             author_user_id, author_nickname, content, created_at, edited_at, deleted_at, path) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id)
        .bind(row.channel_id)
        .bind(row.subchannel_id)
        .bind(row.parent_id)
        .bind(row.thread_root_id)
        .bind(row.author_user_id)
        .bind(&row.author_nickname)
        .bind(&row.content)
        .bind(row.created_at)
        .bind(row.edited_at)
        .bind(row.deleted_at)
        .bind(path)
        .execute(writer)
        .await?;
        Ok(())
    }

    /// Batch-insert snapshot rows (spec §4.4: multi-row `INSERT OR REPLACE`,
    /// batch size 500, one transaction per batch). Rows must already be
    /// sorted ascending by id (caller guarantees this via Snowflake order)
    /// so parents always land before their children.
    pub async fn batch_upsert(writer: &mut SqliteConnection, rows: &[MessageRow]) -> ServerResult<()> {
        const BATCH_SIZE: usize = 500;
        for chunk in rows.chunks(BATCH_SIZE) {
            let mut tx = writer.begin().await?;
            for row in chunk {
                let parent_path: Option<String> = match row.parent_id {
                    Some(parent_id) => sqlx::query("SELECT path FROM messages WHERE id = ?")
                        .bind(parent_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .map(|r| r.get::<String, _>("path")),
                    None => None,
                };
                let path = path_for(row.created_at, parent_path.as_deref());
                sqlx::query(
                    "INSERT OR REPLACE INTO messages (id, channel_id, subchannel_id, parent_id, \
                     thread_root_id, author_user_id, author_nickname, content, created_at, \
                     edited_at, deleted_at, path) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                     COALESCE((SELECT path FROM messages WHERE id = ?), ?))",
                )
                .bind(row.id)
                .bind(row.channel_id)
                .bind(row.subchannel_id)
                .bind(row.parent_id)
                .bind(row.thread_root_id)
                .bind(row.author_user_id)
                .bind(&row.author_nickname)
                .bind(&row.content)
                .bind(row.created_at)
                .bind(row.edited_at)
                .bind(row.deleted_at)
                .bind(row.id)
                .bind(path)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn insert_version(
        writer: &mut SqliteConnection,
        message_id: i64,
        content: &str,
        author_nickname: &str,
        created_at: i64,
        version_type: i64,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO message_versions (message_id, content, author_nickname, created_at, version_type) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(content)
        .bind(author_nickname)
        .bind(created_at)
        .bind(version_type)
        .execute(writer)
        .await?;
        Ok(())
    }

    /// Root messages for a channel/subchannel, newest-first, with keyset
    /// pagination. `parent_id IS NULL` per spec §4.4.
    pub async fn list_roots(
        read: &ReadPool,
        channel_id: i64,
        subchannel_id: Option<i64>,
        limit: i64,
        before_id: Option<i64>,
        after_id: Option<i64>,
    ) -> ServerResult<Vec<MessageRow>> {
        let mut sql = String::from(
            "SELECT * FROM messages WHERE channel_id = ? AND parent_id IS NULL AND deleted_at IS NULL",
        );
        sql.push_str(match subchannel_id {
            Some(_) => " AND subchannel_id = ?",
            None => " AND subchannel_id IS NULL",
        });
        if before_id.is_some() {
            sql.push_str(" AND id < ?");
        }
        if after_id.is_some() {
            sql.push_str(" AND id > ?");
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, MessageRow>(&sql).bind(channel_id);
        if let Some(s) = subchannel_id {
            query = query.bind(s);
        }
        if let Some(b) = before_id {
            query = query.bind(b);
        }
        if let Some(a) = after_id {
            query = query.bind(a);
        }
        query = query.bind(limit);
        Ok(query.fetch_all(read).await?)
    }

    /// Depth-first descendant walk under a thread root, using the
    /// path-based ordering of spec §4.4.
    pub async fn list_thread(read: &ReadPool, thread_root_id: i64) -> ServerResult<Vec<MessageRow>> {
        Ok(sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE thread_root_id = ? AND deleted_at IS NULL ORDER BY path",
        )
        .bind(thread_root_id)
        .fetch_all(read)
        .await?)
    }

    pub async fn find(read: &ReadPool, id: i64) -> ServerResult<Option<MessageRow>> {
        Ok(sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(read)
            .await?)
    }

    /// Expired root messages (spec §4.4): cascades to descendants via FK.
    pub async fn cleanup_expired(writer: &mut SqliteConnection, now: i64) -> ServerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE parent_id IS NULL AND channel_id IN \
             (SELECT id FROM channels) AND \
             (? - created_at) > (SELECT retention_hours * 3600000 FROM channels WHERE channels.id = messages.channel_id)",
        )
        .bind(now)
        .execute(writer)
        .await?;
        Ok(result.rows_affected())
    }
}

// ─── SSH keys ───────────────────────────────────────────────────────────────

pub mod ssh_keys {
    use super::*;

    pub async fn insert(
        writer: &mut SqliteConnection,
        id: i64,
        user_id: i64,
        fingerprint: &str,
        public_key: &[u8],
        key_type: &str,
        label: Option<&str>,
        added_at: i64,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO ssh_keys (id, user_id, fingerprint, public_key, key_type, label, added_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(fingerprint)
        .bind(public_key)
        .bind(key_type)
        .bind(label)
        .bind(added_at)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn list_for_user(read: &ReadPool, user_id: i64) -> ServerResult<Vec<SshKey>> {
        Ok(sqlx::query_as::<_, SshKey>("SELECT * FROM ssh_keys WHERE user_id = ? ORDER BY added_at")
            .bind(user_id)
            .fetch_all(read)
            .await?)
    }

    pub async fn find_by_fingerprint(read: &ReadPool, fingerprint: &str) -> ServerResult<Option<SshKey>> {
        Ok(sqlx::query_as::<_, SshKey>("SELECT * FROM ssh_keys WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(read)
            .await?)
    }

    pub async fn update_label(
        writer: &mut SqliteConnection,
        id: i64,
        label: Option<&str>,
    ) -> ServerResult<()> {
        sqlx::query("UPDATE ssh_keys SET label = ? WHERE id = ?")
            .bind(label)
            .bind(id)
            .execute(writer)
            .await?;
        Ok(())
    }

    pub async fn touch_last_used(writer: &mut SqliteConnection, id: i64, now: i64) -> ServerResult<()> {
        sqlx::query("UPDATE ssh_keys SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(writer)
            .await?;
        Ok(())
    }

    pub async fn delete(writer: &mut SqliteConnection, id: i64, user_id: i64) -> ServerResult<bool> {
        let result = sqlx::query("DELETE FROM ssh_keys WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(writer)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ─── Bans ───────────────────────────────────────────────────────────────────

pub mod bans {
    use super::*;

    pub async fn insert(writer: &mut SqliteConnection, ban: &Ban) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO bans (id, ban_type, user_id, nickname, ip_cidr, reason, shadowban, \
             banned_at, banned_until, banned_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ban.id)
        .bind(ban.ban_type)
        .bind(ban.user_id)
        .bind(&ban.nickname)
        .bind(&ban.ip_cidr)
        .bind(&ban.reason)
        .bind(ban.shadowban)
        .bind(ban.banned_at)
        .bind(ban.banned_until)
        .bind(ban.banned_by)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn list_active(read: &ReadPool, now: i64) -> ServerResult<Vec<Ban>> {
        Ok(sqlx::query_as::<_, Ban>(
            "SELECT * FROM bans WHERE banned_until IS NULL OR banned_until > ? ORDER BY banned_at DESC",
        )
        .bind(now)
        .fetch_all(read)
        .await?)
    }

    /// First active ban whose CIDR covers `ip` (spec §4.4). CIDR matching is
    /// done in Rust, not SQL, since SQLite has no native inet type.
    pub async fn find_active_ip_ban(
        read: &ReadPool,
        ip: std::net::IpAddr,
        now: i64,
    ) -> ServerResult<Option<Ban>> {
        let candidates = sqlx::query_as::<_, Ban>(
            "SELECT * FROM bans WHERE ban_type = ? AND (banned_until IS NULL OR banned_until > ?)",
        )
        .bind(BAN_TYPE_IP)
        .bind(now)
        .fetch_all(read)
        .await?;
        Ok(candidates
            .into_iter()
            .find(|b| b.ip_cidr.as_deref().is_some_and(|cidr| cidr_contains(cidr, ip))))
    }

    pub async fn find_active_user_ban(
        read: &ReadPool,
        user_id: Option<i64>,
        nickname: &str,
        now: i64,
    ) -> ServerResult<Option<Ban>> {
        let candidates = sqlx::query_as::<_, Ban>(
            "SELECT * FROM bans WHERE ban_type = ? AND (banned_until IS NULL OR banned_until > ?)",
        )
        .bind(BAN_TYPE_USER)
        .bind(now)
        .fetch_all(read)
        .await?;
        Ok(candidates.into_iter().find(|b| match (user_id, &b.user_id) {
            (Some(uid), Some(banned_uid)) if uid == *banned_uid => true,
            _ => b.nickname.as_deref() == Some(nickname),
        }))
    }

    pub async fn remove_user_ban(writer: &mut SqliteConnection, user_id: Option<i64>, nickname: &str) -> ServerResult<bool> {
        let result = sqlx::query(
            "DELETE FROM bans WHERE ban_type = ? AND ((user_id IS NOT NULL AND user_id = ?) OR nickname = ?)",
        )
        .bind(BAN_TYPE_USER)
        .bind(user_id)
        .bind(nickname)
        .execute(writer)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_ip_ban(writer: &mut SqliteConnection, ip_cidr: &str) -> ServerResult<bool> {
        let result = sqlx::query("DELETE FROM bans WHERE ban_type = ? AND ip_cidr = ?")
            .bind(BAN_TYPE_IP)
            .bind(ip_cidr)
            .execute(writer)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Minimal CIDR containment check sufficient for IPv4/IPv6 literals and
    /// `/n` prefixes; a bare address is treated as `/32` or `/128`.
    fn cidr_contains(cidr: &str, ip: std::net::IpAddr) -> bool {
        let (net_str, prefix_len) = match cidr.split_once('/') {
            Some((net, len)) => (net, len.parse::<u32>().unwrap_or(32)),
            None => (cidr, if ip.is_ipv6() { 128 } else { 32 }),
        };
        let Ok(net) = net_str.parse::<std::net::IpAddr>() else {
            return false;
        };
        match (net, ip) {
            (std::net::IpAddr::V4(net), std::net::IpAddr::V4(addr)) => {
                let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len.min(32)) };
                (u32::from(net) & mask) == (u32::from(addr) & mask)
            }
            (std::net::IpAddr::V6(net), std::net::IpAddr::V6(addr)) => {
                let mask = if prefix_len == 0 { 0 } else { u128::MAX << (128 - prefix_len.min(128)) };
                (u128::from(net) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

// ─── DM invites & channel access ────────────────────────────────────────────

pub mod dm {
    use super::*;

    pub async fn insert_invite(
        writer: &mut SqliteConnection,
        id: i64,
        initiator_user_id: i64,
        target_user_id: i64,
        is_encrypted: bool,
        created_at: i64,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO dm_invites (id, initiator_user_id, target_user_id, is_encrypted, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(initiator_user_id)
        .bind(target_user_id)
        .bind(is_encrypted)
        .bind(created_at)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn find_invite(
        read: &ReadPool,
        initiator_user_id: i64,
        target_user_id: i64,
    ) -> ServerResult<Option<DmInvite>> {
        Ok(sqlx::query_as::<_, DmInvite>(
            "SELECT * FROM dm_invites WHERE initiator_user_id = ? AND target_user_id = ?",
        )
        .bind(initiator_user_id)
        .bind(target_user_id)
        .fetch_optional(read)
        .await?)
    }

    pub async fn find_invite_by_id(read: &ReadPool, id: i64) -> ServerResult<Option<DmInvite>> {
        Ok(sqlx::query_as::<_, DmInvite>("SELECT * FROM dm_invites WHERE id = ?")
            .bind(id)
            .fetch_optional(read)
            .await?)
    }

    pub async fn delete_invite(writer: &mut SqliteConnection, id: i64) -> ServerResult<()> {
        sqlx::query("DELETE FROM dm_invites WHERE id = ?").bind(id).execute(writer).await?;
        Ok(())
    }

    pub async fn grant_access(
        writer: &mut SqliteConnection,
        channel_id: i64,
        user_id: i64,
        now: i64,
    ) -> ServerResult<()> {
        sqlx::query("INSERT INTO channel_access (channel_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(channel_id)
            .bind(user_id)
            .bind(now)
            .execute(writer)
            .await?;
        Ok(())
    }

    pub async fn has_access(read: &ReadPool, channel_id: i64, user_id: i64) -> ServerResult<bool> {
        let row = sqlx::query("SELECT 1 FROM channel_access WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .fetch_optional(read)
            .await?;
        Ok(row.is_some())
    }

    /// Find an existing DM channel between two users, if one exists.
    pub async fn find_dm_channel(read: &ReadPool, user_a: i64, user_b: i64) -> ServerResult<Option<Channel>> {
        Ok(sqlx::query_as::<_, Channel>(
            "SELECT c.* FROM channels c \
             JOIN channel_access a ON a.channel_id = c.id AND a.user_id = ? \
             JOIN channel_access b ON b.channel_id = c.id AND b.user_id = ? \
             WHERE c.is_dm = 1",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(read)
        .await?)
    }
}

// ─── Read state ─────────────────────────────────────────────────────────────

pub mod read_state {
    use super::*;

    pub async fn upsert(
        writer: &mut SqliteConnection,
        user_id: i64,
        channel_id: i64,
        subchannel_id: i64,
        last_read_at: i64,
        now: i64,
    ) -> ServerResult<()> {
        sqlx::query(
            "INSERT INTO user_channel_state (user_id, channel_id, subchannel_id, last_read_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, channel_id, subchannel_id) \
             DO UPDATE SET last_read_at = excluded.last_read_at, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(channel_id)
        .bind(subchannel_id)
        .bind(last_read_at)
        .bind(now)
        .execute(writer)
        .await?;
        Ok(())
    }

    pub async fn list_for_user(read: &ReadPool, user_id: i64) -> ServerResult<Vec<UserChannelState>> {
        Ok(sqlx::query_as::<_, UserChannelState>(
            "SELECT * FROM user_channel_state WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(read)
        .await?)
    }
}

// ─── Server directory ───────────────────────────────────────────────────────

pub mod servers {
    use super::*;

    pub async fn upsert(writer: &mut SqliteConnection, row: &DiscoveredServer) -> ServerResult<i64> {
        sqlx::query(
            "INSERT INTO discovered_servers (hostname, port, name, description, user_count, \
             uptime_seconds, channel_count, last_heartbeat, heartbeat_interval, is_public, \
             source_ip, discovered_via) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(hostname, port) DO UPDATE SET \
             name = excluded.name, description = excluded.description, \
             user_count = excluded.user_count, uptime_seconds = excluded.uptime_seconds, \
             channel_count = excluded.channel_count, last_heartbeat = excluded.last_heartbeat, \
             heartbeat_interval = excluded.heartbeat_interval, is_public = excluded.is_public",
        )
        .bind(&row.hostname)
        .bind(row.port)
        .bind(&row.name)
        .bind(&row.description)
        .bind(row.user_count)
        .bind(row.uptime_seconds)
        .bind(row.channel_count)
        .bind(row.last_heartbeat)
        .bind(row.heartbeat_interval)
        .bind(row.is_public)
        .bind(&row.source_ip)
        .bind(&row.discovered_via)
        .execute(&mut *writer)
        .await?;

        let id: i64 = sqlx::query("SELECT id FROM discovered_servers WHERE hostname = ? AND port = ?")
            .bind(&row.hostname)
            .bind(row.port)
            .fetch_one(writer)
            .await?
            .get("id");
        Ok(id)
    }

    pub async fn list_public(read: &ReadPool) -> ServerResult<Vec<DiscoveredServer>> {
        Ok(sqlx::query_as::<_, DiscoveredServer>(
            "SELECT * FROM discovered_servers WHERE is_public = 1 ORDER BY name",
        )
        .fetch_all(read)
        .await?)
    }

    /// Stale servers (spec §4.4: `now - last_heartbeat > 3 * heartbeat_interval`).
    pub async fn cleanup_stale(writer: &mut SqliteConnection, now: i64) -> ServerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM discovered_servers WHERE (? - last_heartbeat) > (3 * heartbeat_interval)",
        )
        .bind(now)
        .execute(writer)
        .await?;
        Ok(result.rows_affected())
    }
}
