//! Migration engine round trip against a real sqlite file on disk.
//!
//! Covers spec §4.4's engine contract (apply cleanly, track version, don't
//! re-apply) and spec §8 property 8: that data inserted before a migration
//! survives it, and that the post-migration schema's constraints — not-null
//! defaults, foreign keys, unique indexes, cascade deletes — actually hold.

use superchat_server::db::Store;
use superchat_server::models::MessageRow;

#[tokio::test]
async fn fresh_database_lands_on_latest_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.sqlite3");
    let path = path.to_str().unwrap();

    let store = Store::open(path, 4, 1).await.expect("open should apply migrations cleanly");

    let row: (i64,) = sqlx::query_as("SELECT version FROM schema_version")
        .fetch_one(&store.read)
        .await
        .unwrap();
    assert_eq!(row.0, 1);

    // Every table the initial schema migration creates should exist.
    for table in ["channels", "users", "messages", "message_versions", "bans", "dm_invites"] {
        let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&store.read)
            .await
            .unwrap();
        assert_eq!(exists.0, 1, "expected table {table} to exist after migration");
    }
}

#[tokio::test]
async fn reopening_an_already_migrated_database_does_not_rerun_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.sqlite3");
    let path = path.to_str().unwrap();

    {
        let mut store = Store::open(path, 4, 1).await.unwrap();
        let mut writer = store.writer.get_mut();
        superchat_server::db::channels::insert(
            &mut writer, 1, "general", "General", None, 0, 0, None, 1_700_000_000_000, false, None, false,
        )
        .await
        .unwrap();
    }

    // Reopening must preserve the data and not error re-applying version 1.
    let store = Store::open(path, 4, 1).await.expect("reopen should see version already applied");
    let channels = superchat_server::db::channels::list_all(&store.read).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "general");

    let row: (i64,) = sqlx::query_as("SELECT version FROM schema_version").fetch_one(&store.read).await.unwrap();
    assert_eq!(row.0, 1);
}

/// spec §3: `Message.parent_id` and `thread_root_id` cascade on the parent
/// `Message`. A root with replies must take its whole subtree with it when
/// deleted directly (the 7-day hard-delete sweep in `store.rs` does this one
/// row at a time; this exercises the schema-level cascade itself).
#[tokio::test]
async fn deleting_a_parent_message_cascades_to_its_replies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cascade-message.sqlite3");
    let path = path.to_str().unwrap();
    let mut store = Store::open(path, 4, 1).await.unwrap();
    let mut writer = store.writer.get_mut();

    superchat_server::db::channels::insert(&mut writer, 1, "general", "General", None, 0, 0, None, 1_700_000_000_000, false, None, false)
        .await
        .unwrap();

    let root = MessageRow {
        id: 1001,
        channel_id: 1,
        subchannel_id: None,
        parent_id: None,
        thread_root_id: 1001,
        author_user_id: None,
        author_nickname: "alice".into(),
        content: "hi".into(),
        created_at: 1_700_000_001_000,
        edited_at: None,
        deleted_at: None,
    };
    superchat_server::db::messages::insert(&mut writer, &root).await.unwrap();

    let reply = MessageRow {
        id: 1002,
        channel_id: 1,
        subchannel_id: None,
        parent_id: Some(1001),
        thread_root_id: 1001,
        author_user_id: None,
        author_nickname: "bob".into(),
        content: "yo".into(),
        created_at: 1_700_000_002_000,
        edited_at: None,
        deleted_at: None,
    };
    superchat_server::db::messages::insert(&mut writer, &reply).await.unwrap();

    // Delete the root directly (not through the soft-delete path) to
    // exercise the FK cascade itself rather than app-level logic.
    sqlx::query("DELETE FROM messages WHERE id = ?").bind(1001_i64).execute(&mut *writer).await.unwrap();

    let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages").fetch_one(&mut *writer).await.unwrap();
    assert_eq!(remaining.0, 0, "reply should have been cascade-deleted along with its parent");
}

/// spec §3/§6: deleting a `Channel` cascades to its `Message`s and
/// `ChannelAccess` rows.
#[tokio::test]
async fn deleting_a_channel_cascades_to_messages_and_channel_access() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cascade-channel.sqlite3");
    let path = path.to_str().unwrap();
    let mut store = Store::open(path, 4, 1).await.unwrap();
    let mut writer = store.writer.get_mut();

    superchat_server::db::channels::insert(&mut writer, 1, "dm-1-2", "dm", None, 0, 0, None, 1_700_000_000_000, true, None, true)
        .await
        .unwrap();
    superchat_server::db::users::insert(&mut writer, 1, "alice", "hash", 1_700_000_000_000).await.unwrap();
    superchat_server::db::users::insert(&mut writer, 2, "bob", "hash", 1_700_000_000_000).await.unwrap();
    superchat_server::db::dm::grant_access(&mut writer, 1, 1, 1_700_000_000_000).await.unwrap();
    superchat_server::db::dm::grant_access(&mut writer, 1, 2, 1_700_000_000_000).await.unwrap();

    let message = MessageRow {
        id: 2001,
        channel_id: 1,
        subchannel_id: None,
        parent_id: None,
        thread_root_id: 2001,
        author_user_id: Some(1),
        author_nickname: "alice".into(),
        content: "hey".into(),
        created_at: 1_700_000_001_000,
        edited_at: None,
        deleted_at: None,
    };
    superchat_server::db::messages::insert(&mut writer, &message).await.unwrap();

    superchat_server::db::channels::delete(&mut writer, 1).await.unwrap();

    let messages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE channel_id = ?")
        .bind(1_i64)
        .fetch_one(&mut *writer)
        .await
        .unwrap();
    assert_eq!(messages.0, 0, "messages should cascade-delete with their channel");

    let access: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM channel_access WHERE channel_id = ?")
        .bind(1_i64)
        .fetch_one(&mut *writer)
        .await
        .unwrap();
    assert_eq!(access.0, 0, "channel_access rows should cascade-delete with their channel");
}

/// spec §3: `Channel.name` is unique and `SSHKey.fingerprint` is unique.
#[tokio::test]
async fn unique_indexes_reject_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unique.sqlite3");
    let path = path.to_str().unwrap();
    let mut store = Store::open(path, 4, 1).await.unwrap();
    let mut writer = store.writer.get_mut();

    superchat_server::db::channels::insert(&mut writer, 1, "general", "General", None, 0, 0, None, 1_700_000_000_000, false, None, false)
        .await
        .unwrap();
    let dup_channel = superchat_server::db::channels::insert(
        &mut writer, 2, "general", "General Again", None, 0, 0, None, 1_700_000_000_000, false, None, false,
    )
    .await;
    assert!(dup_channel.is_err(), "inserting a second channel with the same name must fail the unique index");

    superchat_server::db::users::insert(&mut writer, 1, "alice", "hash", 1_700_000_000_000).await.unwrap();
    superchat_server::db::users::insert(&mut writer, 2, "bob", "hash", 1_700_000_000_000).await.unwrap();
    superchat_server::db::ssh_keys::insert(&mut writer, 1, 1, "SHA256:abc", b"key-a", "ed25519", None, 1_700_000_000_000)
        .await
        .unwrap();
    let dup_key = superchat_server::db::ssh_keys::insert(&mut writer, 2, 2, "SHA256:abc", b"key-b", "ed25519", None, 1_700_000_000_000).await;
    assert!(dup_key.is_err(), "inserting a second ssh key with the same fingerprint must fail the unique index");
}

/// spec §3/§6: foreign keys are enforced (`PRAGMA foreign_keys = ON`),
/// verified against `messages.channel_id → channels.id`.
#[tokio::test]
async fn foreign_keys_are_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fk.sqlite3");
    let path = path.to_str().unwrap();
    let mut store = Store::open(path, 4, 1).await.unwrap();
    let mut writer = store.writer.get_mut();

    let orphan = MessageRow {
        id: 3001,
        channel_id: 999, // no such channel was ever inserted
        subchannel_id: None,
        parent_id: None,
        thread_root_id: 3001,
        author_user_id: None,
        author_nickname: "alice".into(),
        content: "hi".into(),
        created_at: 1_700_000_000_000,
        edited_at: None,
        deleted_at: None,
    };
    let result = superchat_server::db::messages::insert(&mut writer, &orphan).await;
    assert!(result.is_err(), "inserting a message against a non-existent channel must fail the foreign key check");
}

/// spec §6: `channels` carries schema-level defaults for `is_dm`,
/// `is_private`, `channel_type`, and `retention_hours` so a bare insert
/// without those columns still lands on spec-correct values.
#[tokio::test]
async fn channel_defaults_match_spec() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defaults.sqlite3");
    let path = path.to_str().unwrap();
    let mut store = Store::open(path, 4, 1).await.unwrap();
    let mut writer = store.writer.get_mut();

    sqlx::query("INSERT INTO channels (id, name, display_name, created_at) VALUES (?, ?, ?, ?)")
        .bind(1_i64)
        .bind("general")
        .bind("General")
        .bind(1_700_000_000_000_i64)
        .execute(&mut *writer)
        .await
        .unwrap();

    let row: (i64, i64, i64, i64) =
        sqlx::query_as("SELECT is_dm, is_private, channel_type, retention_hours FROM channels WHERE id = ?")
            .bind(1_i64)
            .fetch_one(&mut *writer)
            .await
            .unwrap();
    assert_eq!(row, (0, 0, 1, 168), "is_dm/is_private/channel_type/retention_hours defaults must match spec §6");
}

/// spec §4.4/§8 property 8: data inserted pre-migration survives re-opening
/// the store (which re-runs the migration engine's version check but must
/// not touch existing rows), and the constraints above still hold against
/// that surviving data on the reopened connection.
#[tokio::test]
async fn pre_migration_data_survives_and_constraints_still_hold_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("survive.sqlite3");
    let path = path.to_str().unwrap();

    {
        let mut store = Store::open(path, 4, 1).await.unwrap();
        let mut writer = store.writer.get_mut();
        superchat_server::db::channels::insert(&mut writer, 1, "general", "General", None, 0, 0, None, 1_700_000_000_000, false, None, false)
            .await
            .unwrap();
        superchat_server::db::users::insert(&mut writer, 1, "alice", "hash", 1_700_000_000_000).await.unwrap();
        let message = MessageRow {
            id: 4001,
            channel_id: 1,
            subchannel_id: None,
            parent_id: None,
            thread_root_id: 4001,
            author_user_id: Some(1),
            author_nickname: "alice".into(),
            content: "hi".into(),
            created_at: 1_700_000_001_000,
            edited_at: None,
            deleted_at: None,
        };
        superchat_server::db::messages::insert(&mut writer, &message).await.unwrap();
    }

    let mut store = Store::open(path, 4, 1).await.expect("reopen must not disturb existing rows");
    let channels = superchat_server::db::channels::list_all(&store.read).await.unwrap();
    assert_eq!(channels.len(), 1);
    let message = superchat_server::db::messages::find(&store.read, 4001).await.unwrap();
    assert!(message.is_some(), "message inserted before reopen must survive it");

    // Constraints are still live against the reopened connection, not just
    // the original one.
    let mut writer = store.writer.get_mut();
    let dup = superchat_server::db::channels::insert(&mut writer, 2, "general", "General Again", None, 0, 0, None, 1_700_000_000_000, false, None, false)
        .await;
    assert!(dup.is_err(), "unique index on channel name must still hold after reopen");
}
