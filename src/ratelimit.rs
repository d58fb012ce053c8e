//! Message rate limiting, per-IP connection caps, and ban enforcement.
//!
//! Bans are checked at two points: once on accept (IP bans, before any bytes
//! are read) and once on identity resolution (user bans, once a nickname or
//! authenticated user id is known — anonymous sessions can't be user-banned
//! until they pick a nickname). A shadowban is not a ban from the offender's
//! point of view: their writes still succeed and echo back to them, but the
//! dispatcher excludes them from fan-out to everyone else.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::db::Store;
use crate::error::ServerError;
use crate::models::{now_ms, Ban};

/// Token-bucket-ish fixed window: `count` posts seen since `window_start`,
/// reset once `window_start` is more than a minute old. Simpler than a true
/// token bucket and matches the "N per minute" framing of the limit.
struct Window {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_messages_per_min: u32,
    max_connections_per_ip: u32,
    by_session: Mutex<HashMap<i64, Window>>,
    connections_by_ip: Mutex<HashMap<IpAddr, u32>>,
}

impl RateLimiter {
    pub fn new(max_messages_per_min: u32, max_connections_per_ip: u32) -> Self {
        Self {
            max_messages_per_min,
            max_connections_per_ip,
            by_session: Mutex::new(HashMap::new()),
            connections_by_ip: Mutex::new(HashMap::new()),
        }
    }

    /// Call when a new socket is accepted, before the session is registered.
    /// Returns an error if this IP is already at its connection cap.
    pub fn try_accept_connection(&self, ip: IpAddr) -> Result<(), ServerError> {
        let mut map = self.connections_by_ip.lock();
        let count = map.entry(ip).or_insert(0);
        if *count >= self.max_connections_per_ip {
            return Err(ServerError::ConnectionCapExceeded);
        }
        *count += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let mut map = self.connections_by_ip.lock();
        if let Some(count) = map.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&ip);
            }
        }
    }

    /// Call once per `POST_MESSAGE`. Returns an error once the session has
    /// posted `max_messages_per_min` messages within the trailing minute.
    pub fn check_message_rate(&self, session_id: i64) -> Result<(), ServerError> {
        let mut map = self.by_session.lock();
        let now = Instant::now();
        let window = map.entry(session_id).or_insert_with(|| Window { window_start: now, count: 0 });
        if now.duration_since(window.window_start) >= Duration::from_secs(60) {
            window.window_start = now;
            window.count = 0;
        }
        if window.count >= self.max_messages_per_min {
            return Err(ServerError::RateLimited);
        }
        window.count += 1;
        Ok(())
    }

    pub fn clear_session(&self, session_id: i64) {
        self.by_session.lock().remove(&session_id);
    }
}

/// Outcome of checking an identity (nickname + optional user id) against the
/// active ban list: either clear, hard-banned, or shadowbanned.
pub enum BanVerdict {
    Clear,
    Banned { reason: String },
    Shadowbanned,
}

/// Looks up whether `ip` is covered by an active IP ban. Checked before the
/// handshake completes on every transport.
pub async fn check_ip_ban(store: &Store, ip: IpAddr) -> Result<Option<Ban>, ServerError> {
    let now = now_ms();
    Ok(crate::db::bans::find_active_ip_ban(&store.read, ip, now).await?)
}

/// Looks up whether a resolved identity is covered by an active user ban,
/// matching on user id (if authenticated) or nickname (works for anonymous
/// sessions that picked a previously-banned nickname).
pub async fn check_user_ban(store: &Store, user_id: Option<i64>, nickname: &str) -> Result<BanVerdict, ServerError> {
    let now = now_ms();
    let Some(ban) = crate::db::bans::find_active_user_ban(&store.read, user_id, nickname, now).await? else {
        return Ok(BanVerdict::Clear);
    };
    if ban.shadowban {
        Ok(BanVerdict::Shadowbanned)
    } else {
        Ok(BanVerdict::Banned { reason: ban.reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_rate_resets_after_window() {
        let limiter = RateLimiter::new(2, 10);
        limiter.check_message_rate(1).unwrap();
        limiter.check_message_rate(1).unwrap();
        assert!(limiter.check_message_rate(1).is_err());
    }

    #[test]
    fn connection_cap_releases_on_disconnect() {
        let limiter = RateLimiter::new(10, 1);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        limiter.try_accept_connection(ip).unwrap();
        assert!(limiter.try_accept_connection(ip).is_err());
        limiter.release_connection(ip);
        assert!(limiter.try_accept_connection(ip).is_ok());
    }

    #[test]
    fn per_session_limits_are_independent() {
        let limiter = RateLimiter::new(1, 10);
        limiter.check_message_rate(1).unwrap();
        assert!(limiter.check_message_rate(1).is_err());
        limiter.check_message_rate(2).unwrap();
    }
}
