//! The in-memory store (spec §4.5): the authoritative runtime view of
//! channels, messages and their thread/reply indexes, behind a single
//! readers-writer lock. Sessions live in the session registry
//! ([`crate::session`]), not here — they're ephemeral and never snapshotted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::db::{self, Store as Db};
use crate::models::{Channel, MessageRow};

/// A live, in-memory message. `reply_count` is an atomic so handlers can
/// bump it without re-acquiring the store write lock for the common case of
/// "a reply landed under me".
#[derive(Debug)]
pub struct LiveMessage {
    pub id: i64,
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub thread_root_id: i64,
    pub author_user_id: Option<i64>,
    pub author_nickname: String,
    pub content: RwLock<String>,
    pub created_at: i64,
    pub edited_at: RwLock<Option<i64>>,
    pub deleted_at: RwLock<Option<i64>>,
    pub reply_count: AtomicU32,
}

impl LiveMessage {
    fn from_row(row: MessageRow) -> Self {
        Self {
            id: row.id,
            channel_id: row.channel_id,
            subchannel_id: row.subchannel_id,
            parent_id: row.parent_id,
            thread_root_id: row.thread_root_id,
            author_user_id: row.author_user_id,
            author_nickname: row.author_nickname,
            content: RwLock::new(row.content),
            created_at: row.created_at,
            edited_at: RwLock::new(row.edited_at),
            deleted_at: RwLock::new(row.deleted_at),
            reply_count: AtomicU32::new(0),
        }
    }

    pub fn to_row(&self) -> MessageRow {
        MessageRow {
            id: self.id,
            channel_id: self.channel_id,
            subchannel_id: self.subchannel_id,
            parent_id: self.parent_id,
            thread_root_id: self.thread_root_id,
            author_user_id: self.author_user_id,
            author_nickname: self.author_nickname.clone(),
            content: self.content.read().clone(),
            created_at: self.created_at,
            edited_at: *self.edited_at.read(),
            deleted_at: *self.deleted_at.read(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.read().is_some()
    }
}

/// Sorted-by-created_at index. A `Vec` is fine: inserts happen in
/// approximately-id order already (Snowflake ids are monotonic), so the
/// occasional out-of-order insert costs a linear shift, not a full re-sort.
#[derive(Default)]
struct Index(Vec<i64>);

impl Index {
    fn insert(&mut self, messages: &HashMap<i64, Arc<LiveMessage>>, id: i64) {
        let created_at = messages[&id].created_at;
        let pos = self
            .0
            .partition_point(|existing| messages[existing].created_at <= created_at);
        self.0.insert(pos, id);
    }

    fn remove(&mut self, id: i64) {
        self.0.retain(|&x| x != id);
    }
}

struct Inner {
    channels: HashMap<i64, Channel>,
    messages: HashMap<i64, Arc<LiveMessage>>,
    by_channel: HashMap<(i64, Option<i64>), Index>,
    by_parent: HashMap<i64, Index>,
    by_thread: HashMap<i64, Index>,
    dirty: HashSet<i64>,
}

/// The authoritative concurrent view described by spec §4.5. All reads and
/// writes go through a single `parking_lot::RwLock` — cheap enough that we
/// don't shard it, and the spec requires snapshot reads to be consistent
/// across the channel/message/index triad.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                channels: HashMap::new(),
                messages: HashMap::new(),
                by_channel: HashMap::new(),
                by_parent: HashMap::new(),
                by_thread: HashMap::new(),
                dirty: HashSet::new(),
            }),
        }
    }

    /// Startup load (spec §4.5): channels, then all non-deleted messages in
    /// `created_at` ascending order, building every index and recomputing
    /// reply counts. Sessions are never restored.
    pub async fn load_from(db: &Db) -> crate::error::ServerResult<Self> {
        let store = Self::new();
        let channels = db::channels::list_all(&db.read).await?;
        {
            let mut inner = store.inner.write();
            for channel in channels {
                inner.channels.insert(channel.id, channel);
            }
        }

        let mut all_roots_and_replies: Vec<MessageRow> = Vec::new();
        for channel_id in store.inner.read().channels.keys().copied().collect::<Vec<_>>() {
            all_roots_and_replies.extend(db::messages::list_roots(&db.read, channel_id, None, i64::MAX, None, None).await?);
        }
        all_roots_and_replies.sort_by_key(|m| m.created_at);

        {
            let mut inner = store.inner.write();
            for row in all_roots_and_replies {
                let id = row.id;
                let msg = Arc::new(LiveMessage::from_row(row));
                inner.messages.insert(id, msg);
                insert_into_indexes(&mut inner, id);
            }
            recompute_reply_counts(&mut inner);
        }
        Ok(store)
    }

    // ─── Channels ───────────────────────────────────────────────────────

    pub fn insert_channel(&self, channel: Channel) {
        self.inner.write().channels.insert(channel.id, channel);
    }

    pub fn remove_channel(&self, id: i64) {
        let mut inner = self.inner.write();
        inner.channels.remove(&id);
        let stale: Vec<i64> = inner
            .messages
            .values()
            .filter(|m| m.channel_id == id)
            .map(|m| m.id)
            .collect();
        for msg_id in stale {
            remove_from_indexes(&mut inner, msg_id);
            inner.messages.remove(&msg_id);
            inner.dirty.remove(&msg_id);
        }
    }

    pub fn get_channel(&self, id: i64) -> Option<Channel> {
        self.inner.read().channels.get(&id).cloned()
    }

    pub fn list_channels(&self) -> Vec<Channel> {
        self.inner.read().channels.values().cloned().collect()
    }

    pub fn subchannels_of(&self, parent_id: i64) -> Vec<Channel> {
        self.inner
            .read()
            .channels
            .values()
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect()
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Insert a freshly-posted message, wiring up its indexes and bumping
    /// every ancestor's reply count (direct parent, grandparent, ... up to
    /// the thread root) since `reply_count` tracks the full descendant
    /// subtree, not just direct children. Returns the reply count the
    /// caller should broadcast.
    pub fn insert_message(&self, row: MessageRow) -> Arc<LiveMessage> {
        let mut inner = self.inner.write();
        let id = row.id;
        let mut ancestor = row.parent_id;
        let msg = Arc::new(LiveMessage::from_row(row));
        inner.messages.insert(id, msg.clone());
        insert_into_indexes(&mut inner, id);
        inner.dirty.insert(id);
        while let Some(pid) = ancestor {
            let Some(parent) = inner.messages.get(&pid) else { break };
            parent.reply_count.fetch_add(1, Ordering::SeqCst);
            ancestor = parent.parent_id;
        }
        msg
    }

    pub fn get_message(&self, id: i64) -> Option<Arc<LiveMessage>> {
        self.inner.read().messages.get(&id).cloned()
    }

    pub fn edit_message(&self, id: i64, content: String, edited_at: i64) -> Option<Arc<LiveMessage>> {
        let inner = self.inner.write();
        let msg = inner.messages.get(&id)?.clone();
        *msg.content.write() = content;
        *msg.edited_at.write() = Some(edited_at);
        drop(inner);
        self.inner.write().dirty.insert(id);
        Some(msg)
    }

    /// Soft-delete: sets `deleted_at`, marks dirty, and decrements every
    /// ancestor's reply count if this was a reply (spec §4.10.1), mirroring
    /// `insert_message`'s full-subtree bump.
    pub fn delete_message(&self, id: i64, deleted_at: i64) -> Option<Arc<LiveMessage>> {
        let mut inner = self.inner.write();
        let msg = inner.messages.get(&id)?.clone();
        if msg.is_deleted() {
            return Some(msg);
        }
        *msg.deleted_at.write() = Some(deleted_at);
        inner.dirty.insert(id);
        let mut ancestor = msg.parent_id;
        while let Some(pid) = ancestor {
            let Some(parent) = inner.messages.get(&pid) else { break };
            parent.reply_count.fetch_sub(1, Ordering::SeqCst);
            ancestor = parent.parent_id;
        }
        Some(msg)
    }

    pub fn root_messages(&self, channel_id: i64, subchannel_id: Option<i64>, limit: usize) -> Vec<Arc<LiveMessage>> {
        let inner = self.inner.read();
        let Some(index) = inner.by_channel.get(&(channel_id, subchannel_id)) else {
            return Vec::new();
        };
        index
            .0
            .iter()
            .rev()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.parent_id.is_none() && !m.is_deleted())
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn thread_messages(&self, thread_root_id: i64) -> Vec<Arc<LiveMessage>> {
        let inner = self.inner.read();
        let Some(index) = inner.by_thread.get(&thread_root_id) else {
            return Vec::new();
        };
        index
            .0
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| !m.is_deleted())
            .cloned()
            .collect()
    }

    pub fn direct_replies(&self, parent_id: i64) -> Vec<Arc<LiveMessage>> {
        let inner = self.inner.read();
        let Some(index) = inner.by_parent.get(&parent_id) else {
            return Vec::new();
        };
        index
            .0
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| !m.is_deleted())
            .cloned()
            .collect()
    }

    // ─── Snapshot loop plumbing (spec §4.5 steps a-f) ────────────────────

    /// Step (a): copy the dirty id set and the referenced message objects
    /// under the read lock, skipping ones whose `deleted_at` already passed
    /// the 7-day retention cutoff (they're hard-deleted in step f instead of
    /// snapshotted again).
    pub fn snapshot_candidates(&self, hard_delete_cutoff: i64) -> Vec<Arc<LiveMessage>> {
        let inner = self.inner.read();
        inner
            .dirty
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| !m.deleted_at.read().is_some_and(|d| d < hard_delete_cutoff))
            .cloned()
            .collect()
    }

    /// Step (e): clear dirty bits for ids that were successfully written.
    pub fn clear_dirty(&self, ids: &[i64]) {
        let mut inner = self.inner.write();
        for id in ids {
            inner.dirty.remove(id);
        }
    }

    /// Step (f): hard-delete messages whose `deleted_at` is older than the
    /// retention cutoff. The persisted row survives for audit purposes.
    pub fn hard_delete_expired(&self, cutoff: i64) -> Vec<i64> {
        let mut inner = self.inner.write();
        let expired: Vec<i64> = inner
            .messages
            .values()
            .filter(|m| m.deleted_at.read().is_some_and(|d| d < cutoff))
            .map(|m| m.id)
            .collect();
        for id in &expired {
            remove_from_indexes(&mut inner, *id);
            inner.messages.remove(id);
            inner.dirty.remove(id);
        }
        expired
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.read().dirty.len()
    }
}

fn insert_into_indexes(inner: &mut Inner, id: i64) {
    let (channel_id, subchannel_id, parent_id, thread_root_id) = {
        let m = &inner.messages[&id];
        (m.channel_id, m.subchannel_id, m.parent_id, m.thread_root_id)
    };
    inner
        .by_channel
        .entry((channel_id, subchannel_id))
        .or_default()
        .insert(&inner.messages, id);
    if let Some(parent_id) = parent_id {
        inner.by_parent.entry(parent_id).or_default().insert(&inner.messages, id);
    }
    inner.by_thread.entry(thread_root_id).or_default().insert(&inner.messages, id);
}

fn remove_from_indexes(inner: &mut Inner, id: i64) {
    let Some(m) = inner.messages.get(&id) else { return };
    let (channel_id, subchannel_id, parent_id, thread_root_id) =
        (m.channel_id, m.subchannel_id, m.parent_id, m.thread_root_id);
    if let Some(idx) = inner.by_channel.get_mut(&(channel_id, subchannel_id)) {
        idx.remove(id);
    }
    if let Some(parent_id) = parent_id {
        if let Some(idx) = inner.by_parent.get_mut(&parent_id) {
            idx.remove(id);
        }
    }
    if let Some(idx) = inner.by_thread.get_mut(&thread_root_id) {
        idx.remove(id);
    }
}

/// Recompute every message's `reply_count` from the parent index, used only
/// at startup load (spec §4.5: "reply counts... recomputed from the reply
/// index at load"). Counts the full non-deleted descendant subtree (spec
/// §8 property 5: "direct + transitive"), not just direct children.
fn recompute_reply_counts(inner: &mut Inner) {
    let mut counts: HashMap<i64, u32> = HashMap::new();
    for msg in inner.messages.values() {
        if msg.is_deleted() {
            continue;
        }
        let mut ancestor = msg.parent_id;
        while let Some(pid) = ancestor {
            *counts.entry(pid).or_default() += 1;
            ancestor = inner.messages.get(&pid).and_then(|p| p.parent_id);
        }
    }
    for msg in inner.messages.values() {
        msg.reply_count.store(counts.get(&msg.id).copied().unwrap_or(0), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, channel_id: i64, parent_id: Option<i64>, thread_root_id: i64, created_at: i64) -> MessageRow {
        MessageRow {
            id,
            channel_id,
            subchannel_id: None,
            parent_id,
            thread_root_id,
            author_user_id: Some(1),
            author_nickname: "alice".into(),
            content: "hi".into(),
            created_at,
            edited_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn reply_count_tracks_post_and_delete() {
        let store = MemoryStore::new();
        store.insert_message(row(1001, 1, None, 1001, 1000));
        store.insert_message(row(1002, 1, Some(1001), 1001, 1001));
        assert_eq!(store.get_message(1001).unwrap().reply_count.load(Ordering::SeqCst), 1);

        store.delete_message(1002, 2000);
        assert_eq!(store.get_message(1001).unwrap().reply_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_replies_count_transitively() {
        let store = MemoryStore::new();
        store.insert_message(row(1, 1, None, 1, 100));
        store.insert_message(row(2, 1, Some(1), 1, 101));
        store.insert_message(row(3, 1, Some(2), 1, 102));
        // root (1) counts both its direct child (2) and its grandchild (3);
        // the middle node (2) counts only its own child (3).
        assert_eq!(store.get_message(1).unwrap().reply_count.load(Ordering::SeqCst), 2);
        assert_eq!(store.get_message(2).unwrap().reply_count.load(Ordering::SeqCst), 1);
        assert_eq!(store.thread_messages(1).len(), 3);

        store.delete_message(3, 5_000);
        assert_eq!(store.get_message(1).unwrap().reply_count.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_message(2).unwrap().reply_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn root_messages_respects_channel_and_ordering() {
        let store = MemoryStore::new();
        store.insert_message(row(1, 1, None, 1, 100));
        store.insert_message(row(2, 1, None, 2, 200));
        store.insert_message(row(3, 2, None, 3, 150));
        let roots = store.root_messages(1, None, 10);
        assert_eq!(roots.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn hard_delete_after_retention_cutoff_removes_from_memory() {
        let store = MemoryStore::new();
        store.insert_message(row(1, 1, None, 1, 100));
        store.delete_message(1, 5_000);
        assert!(store.hard_delete_expired(6_000).is_empty());
        let expired = store.hard_delete_expired(10_000);
        assert_eq!(expired, vec![1]);
        assert!(store.get_message(1).is_none());
    }
}
