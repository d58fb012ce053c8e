//! Lock-free Snowflake-style ID generator (spec §4.3).
//!
//! Layout: 41 bits timestamp-since-epoch | 10 bits worker-id | 12 bits sequence.
//! The whole `{timestamp, sequence}` pair lives in one `AtomicU64` word so a
//! single compare-and-swap either advances the sequence within the current
//! millisecond or rolls over into the next one — there is no lock, and no
//! two calls can observe the same `(timestamp, sequence)` pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in milliseconds since the Unix epoch.
pub const EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;

/// Packs `(timestamp_ms_since_epoch, sequence)` into a single word so it can
/// be updated atomically.
#[inline]
fn pack_state(timestamp: u64, sequence: u64) -> u64 {
    (timestamp << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK)
}

#[inline]
fn unpack_state(state: u64) -> (u64, u64) {
    (state >> SEQUENCE_BITS, state & SEQUENCE_MASK)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

/// Process-wide monotonic ID generator. Cheap to clone (it's just an `Arc`
/// in callers' hands — construct once and share).
pub struct SnowflakeGenerator {
    worker_id: u64,
    /// Packed `(timestamp_since_epoch, sequence)`.
    state: AtomicU64,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: (worker_id as u64) & ((1 << WORKER_BITS) - 1),
            state: AtomicU64::new(pack_state(0, 0)),
        }
    }

    /// Produce the next id. Strictly greater than every id this generator
    /// has previously produced, even across a backward clock jump.
    pub fn next_id(&self) -> i64 {
        loop {
            let now = now_ms().saturating_sub(EPOCH_MS);
            let current = self.state.load(Ordering::Acquire);
            let (last_ts, last_seq) = unpack_state(current);

            let (new_ts, new_seq) = if now > last_ts {
                (now, 0)
            } else if now == last_ts {
                if last_seq == SEQUENCE_MASK {
                    // Sequence exhausted this millisecond: spin until the
                    // clock genuinely advances rather than overflow into a
                    // smaller id.
                    (last_ts + 1, 0)
                } else {
                    (last_ts, last_seq + 1)
                }
            } else {
                // Clock moved backward. Never go below the last timestamp we
                // already used — advance the internal clock past it and
                // exhaust the sequence space there instead of waiting idle.
                if last_seq == SEQUENCE_MASK {
                    (last_ts + 1, 0)
                } else {
                    (last_ts, last_seq + 1)
                }
            };

            let new_state = pack_state(new_ts, new_seq);
            if self
                .state
                .compare_exchange_weak(
                    current,
                    new_state,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return ((new_ts as i64) << TIMESTAMP_SHIFT)
                    | ((self.worker_id as i64) << WORKER_SHIFT)
                    | (new_seq as i64);
            }
            // Lost the race; reload and retry.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ids_strictly_increase_single_threaded() {
        let gen = SnowflakeGenerator::new(0);
        let mut last = gen.next_id();
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert!(id > last, "id {} did not exceed previous id {}", id, last);
            last = id;
        }
    }

    #[test]
    fn ids_strictly_increase_concurrently() {
        let gen = Arc::new(SnowflakeGenerator::new(3));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gen = gen.clone();
            handles.push(thread::spawn(move || {
                let mut ids = Vec::with_capacity(2_000);
                for _ in 0..2_000 {
                    ids.push(gen.next_id());
                }
                ids
            }));
        }
        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique_count = {
            let mut sorted = all.clone();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.len()
        };
        assert_eq!(unique_count, all.len(), "duplicate ids produced");
        all.sort_unstable();
        for w in all.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn worker_id_is_masked_to_ten_bits() {
        let gen = SnowflakeGenerator::new(0xFFFF);
        assert_eq!(gen.worker_id, 0x3FF);
    }
}
