//! Snapshot flush + reload round trip: a message only living in the
//! in-memory store becomes durable once flushed, and a soft-deleted message
//! past its retention window disappears from both stores on reload.

use superchat_server::db::{self, Store};
use superchat_server::models::{Channel, MessageRow};
use superchat_server::store::MemoryStore;

async fn open_store_with_channel(path: &str) -> (Store, i64) {
    let store = Store::open(path, 4, 1).await.unwrap();
    let channel_id = 1;
    {
        let mut writer = store.writer.lock().await;
        db::channels::insert(&mut writer, channel_id, "general", "General", None, 0, 0, None, 1_700_000_000_000, false, None, false)
            .await
            .unwrap();
    }
    (store, channel_id)
}

#[tokio::test]
async fn dirty_message_survives_snapshot_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.sqlite3");
    let path = path.to_str().unwrap();

    let (db_store, channel_id) = open_store_with_channel(path).await;
    let mem = MemoryStore::new();
    mem.insert_channel(Channel {
        id: channel_id,
        name: "general".into(),
        display_name: "General".into(),
        description: None,
        channel_type: 0,
        retention_hours: 0,
        created_by: None,
        created_at: 1_700_000_000_000,
        is_private: false,
        parent_id: None,
        is_dm: false,
    });

    let row = MessageRow {
        id: 100,
        channel_id,
        subchannel_id: None,
        parent_id: None,
        thread_root_id: 100,
        author_user_id: None,
        author_nickname: "alice".into(),
        content: "hello from memory".into(),
        created_at: 1_700_000_001_000,
        edited_at: None,
        deleted_at: None,
    };
    mem.insert_message(row);
    assert_eq!(mem.dirty_count(), 1);

    // Flush exactly like `snapshot_once` does: candidates -> batch_upsert -> clear_dirty.
    let candidates = mem.snapshot_candidates(0);
    assert_eq!(candidates.len(), 1);
    let rows: Vec<_> = candidates.iter().map(|m| m.to_row()).collect();
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    {
        let mut writer = db_store.writer.lock().await;
        db::messages::batch_upsert(&mut writer, &rows).await.unwrap();
    }
    mem.clear_dirty(&ids);
    assert_eq!(mem.dirty_count(), 0);

    // A fresh in-memory store rebuilt from disk should see the same message.
    let reloaded = MemoryStore::load_from(&db_store).await.unwrap();
    let msg = reloaded.get_message(100).expect("message should have survived the flush and reload");
    assert_eq!(*msg.content.read(), "hello from memory");
}

#[tokio::test]
async fn hard_deleted_message_is_gone_after_retention_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retention.sqlite3");
    let path = path.to_str().unwrap();

    let (db_store, channel_id) = open_store_with_channel(path).await;
    let mem = MemoryStore::new();
    mem.insert_channel(Channel {
        id: channel_id,
        name: "general".into(),
        display_name: "General".into(),
        description: None,
        channel_type: 0,
        retention_hours: 24 * 365,
        created_by: None,
        created_at: 1_700_000_000_000,
        is_private: false,
        parent_id: None,
        is_dm: false,
    });

    let created_at = 1_700_000_000_000;
    mem.insert_message(MessageRow {
        id: 200,
        channel_id,
        subchannel_id: None,
        parent_id: None,
        thread_root_id: 200,
        author_user_id: None,
        author_nickname: "bob".into(),
        content: "soon to be deleted".into(),
        created_at,
        edited_at: None,
        deleted_at: None,
    });

    // Flush once so the row exists on disk, then soft-delete it far enough
    // in the past that it's past any retention cutoff.
    let rows: Vec<_> = mem.snapshot_candidates(0).iter().map(|m| m.to_row()).collect();
    {
        let mut writer = db_store.writer.lock().await;
        db::messages::batch_upsert(&mut writer, &rows).await.unwrap();
    }
    mem.clear_dirty(&[200]);

    let long_ago = created_at - 8 * 24 * 60 * 60 * 1000;
    mem.delete_message(200, long_ago);
    mem.clear_dirty(&[200]); // pretend the soft-delete itself was already snapshotted

    let cutoff = created_at; // well after `long_ago`, simulating 7+ days of retention elapsed
    let expired = mem.hard_delete_expired(cutoff);
    assert_eq!(expired, vec![200]);
    assert!(mem.get_message(200).is_none(), "hard-deleted messages must drop out of the live view immediately");

    // The row itself is left on disk for audit (only its `deleted_at` marks
    // it gone); on reload `list_roots`'s `deleted_at IS NULL` filter is what
    // actually keeps it out of the rebuilt in-memory store.
    let still_on_disk = db::messages::find(&db_store.read, 200).await.unwrap();
    assert!(still_on_disk.is_some());

    let reloaded = MemoryStore::load_from(&db_store).await.unwrap();
    assert!(reloaded.get_message(200).is_none(), "soft-deleted message must not reappear on reload");
}
