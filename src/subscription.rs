//! Per-session thread/channel subscription sets and their caps.
//!
//! Subscribing is independent from channel membership: a session can join a
//! channel (gaining presence/broadcast delivery) without subscribing to any
//! of its threads, and can subscribe to a thread in a channel it has since
//! left. Membership lives in `session`; this module only tracks the opt-in
//! sets used to decide whether a `NewMessage`/`MessageEdited` broadcast
//! reaches a given session.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::error::ServerError;

pub const DEFAULT_MAX_THREAD_SUBSCRIPTIONS: usize = 50;
pub const DEFAULT_MAX_CHANNEL_SUBSCRIPTIONS: usize = 20;

#[derive(Default)]
struct Subs {
    threads: HashSet<i64>,
    channels: HashSet<i64>,
}

pub struct SubscriptionManager {
    max_threads: usize,
    max_channels: usize,
    by_session: DashMap<i64, Subs>,
    thread_subscribers: DashMap<i64, HashSet<i64>>,
    channel_subscribers: DashMap<i64, HashSet<i64>>,
}

impl SubscriptionManager {
    pub fn new(max_thread_subscriptions: usize, max_channel_subscriptions: usize) -> Self {
        Self {
            max_threads: max_thread_subscriptions,
            max_channels: max_channel_subscriptions,
            by_session: DashMap::new(),
            thread_subscribers: DashMap::new(),
            channel_subscribers: DashMap::new(),
        }
    }

    /// Idempotent: subscribing twice to the same thread is a no-op success,
    /// not a cap violation.
    pub fn subscribe_thread(&self, session_id: i64, thread_root_id: i64) -> Result<(), ServerError> {
        let mut entry = self.by_session.entry(session_id).or_default();
        if entry.threads.contains(&thread_root_id) {
            return Ok(());
        }
        if entry.threads.len() >= self.max_threads {
            return Err(ServerError::ThreadSubscriptionCapExceeded);
        }
        entry.threads.insert(thread_root_id);
        drop(entry);
        self.thread_subscribers.entry(thread_root_id).or_default().insert(session_id);
        Ok(())
    }

    pub fn unsubscribe_thread(&self, session_id: i64, thread_root_id: i64) {
        if let Some(mut entry) = self.by_session.get_mut(&session_id) {
            entry.threads.remove(&thread_root_id);
        }
        if let Some(mut set) = self.thread_subscribers.get_mut(&thread_root_id) {
            set.remove(&session_id);
        }
    }

    pub fn subscribe_channel(&self, session_id: i64, channel_id: i64) -> Result<(), ServerError> {
        let mut entry = self.by_session.entry(session_id).or_default();
        if entry.channels.contains(&channel_id) {
            return Ok(());
        }
        if entry.channels.len() >= self.max_channels {
            return Err(ServerError::ChannelSubscriptionCapExceeded);
        }
        entry.channels.insert(channel_id);
        drop(entry);
        self.channel_subscribers.entry(channel_id).or_default().insert(session_id);
        Ok(())
    }

    pub fn unsubscribe_channel(&self, session_id: i64, channel_id: i64) {
        if let Some(mut entry) = self.by_session.get_mut(&session_id) {
            entry.channels.remove(&channel_id);
        }
        if let Some(mut set) = self.channel_subscribers.get_mut(&channel_id) {
            set.remove(&session_id);
        }
    }

    pub fn thread_subscribers(&self, thread_root_id: i64) -> Vec<i64> {
        self.thread_subscribers.get(&thread_root_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn channel_subscribers(&self, channel_id: i64) -> Vec<i64> {
        self.channel_subscribers.get(&channel_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Called on disconnect to release every set a session held, so cap
    /// accounting and subscriber lists never leak entries for dead sessions.
    pub fn clear_session(&self, session_id: i64) {
        if let Some((_, subs)) = self.by_session.remove(&session_id) {
            for thread_root_id in subs.threads {
                if let Some(mut set) = self.thread_subscribers.get_mut(&thread_root_id) {
                    set.remove(&session_id);
                }
            }
            for channel_id in subs.channels {
                if let Some(mut set) = self.channel_subscribers.get_mut(&channel_id) {
                    set.remove(&session_id);
                }
            }
        }
    }

    pub fn thread_subscription_count(&self, session_id: i64) -> usize {
        self.by_session.get(&session_id).map(|s| s.threads.len()).unwrap_or(0)
    }

    pub fn channel_subscription_count(&self, session_id: i64) -> usize {
        self.by_session.get(&session_id).map(|s| s.channels.len()).unwrap_or(0)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_THREAD_SUBSCRIPTIONS, DEFAULT_MAX_CHANNEL_SUBSCRIPTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_twice_is_a_no_op() {
        let mgr = SubscriptionManager::default();
        mgr.subscribe_thread(1, 100).unwrap();
        mgr.subscribe_thread(1, 100).unwrap();
        assert_eq!(mgr.thread_subscription_count(1), 1);
        assert_eq!(mgr.thread_subscribers(100), vec![1]);
    }

    #[test]
    fn thread_cap_is_enforced_independently_of_channel_cap() {
        let mgr = SubscriptionManager::new(2, 2);
        mgr.subscribe_thread(1, 1).unwrap();
        mgr.subscribe_thread(1, 2).unwrap();
        assert!(mgr.subscribe_thread(1, 3).is_err());
        assert!(mgr.subscribe_channel(1, 1).is_ok());
    }

    #[test]
    fn clear_session_releases_all_subscriptions() {
        let mgr = SubscriptionManager::default();
        mgr.subscribe_thread(1, 100).unwrap();
        mgr.subscribe_channel(1, 5).unwrap();
        mgr.clear_session(1);
        assert_eq!(mgr.thread_subscription_count(1), 0);
        assert!(mgr.thread_subscribers(100).is_empty());
        assert!(mgr.channel_subscribers(5).is_empty());
    }

    #[test]
    fn unsubscribe_then_resubscribe_succeeds_under_cap() {
        let mgr = SubscriptionManager::new(1, 1);
        mgr.subscribe_thread(1, 1).unwrap();
        assert!(mgr.subscribe_thread(1, 2).is_err());
        mgr.unsubscribe_thread(1, 1);
        assert!(mgr.subscribe_thread(1, 2).is_ok());
    }
}
