//! Short-lived locks for claim-style read-modify-write operations.
//!
//! Locks expire on their own: a holder that never releases (crashed task, forgotten guard)
//! blocks the resource for at most the configured TTL.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;

/// Lock acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("already being processed")]
    InProgress { key: String },
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    token: u64,
    expires_at: SystemTime,
}

/// Expiring mutexes keyed by resource id.
#[derive(Debug, Default)]
pub struct ClaimLocks {
    entries: Arc<DashMap<String, LockEntry>>,
    next_token: AtomicU64,
}

impl ClaimLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key` unless a live holder exists.
    pub fn acquire(
        &self,
        key: impl Into<String>,
        now: SystemTime,
        ttl: Duration,
    ) -> Result<ClaimGuard, ClaimError> {
        let key = key.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = LockEntry {
            token,
            expires_at: now + ttl,
        };

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return Err(ClaimError::InProgress { key });
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Ok(ClaimGuard {
            entries: Arc::clone(&self.entries),
            key,
            token,
        })
    }

    /// Whether a live holder exists for `key`.
    pub fn is_held(&self, key: &str, now: SystemTime) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Drop expired entries left behind by holders that outlived their TTL.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

/// Releases its lock on drop, unless the lock already expired and was taken over.
#[derive(Debug)]
pub struct ClaimGuard {
    entries: Arc<DashMap<String, LockEntry>>,
    key: String,
    token: u64,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.entries
            .remove_if(&self.key, |_, entry| entry.token == self.token);
    }
}

/// Lock key for claiming the grant of `player_id` for `encounter_id`.
pub fn grant_claim_key(player_id: &str, encounter_id: impl std::fmt::Display) -> String {
    format!("grant:{player_id}:{encounter_id}")
}

/// Lock key for opening chests of `player_id`.
pub fn chest_claim_key(player_id: &str) -> String {
    format!("chest:{player_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn second_holder_is_rejected_until_release() {
        let locks = ClaimLocks::new();
        let guard = locks.acquire("grant:a:1", at(0), TTL).unwrap();
        let err = locks.acquire("grant:a:1", at(1), TTL).unwrap_err();
        assert_eq!(err.to_string(), "already being processed");
        assert!(locks.acquire("grant:b:1", at(1), TTL).is_ok());

        drop(guard);
        assert!(!locks.is_held("grant:a:1", at(1)));
        assert!(locks.acquire("grant:a:1", at(1), TTL).is_ok());
    }

    #[test]
    fn expired_lock_can_be_taken_over() {
        let locks = ClaimLocks::new();
        let stale = locks.acquire("k", at(0), TTL).unwrap();
        let fresh = locks.acquire("k", at(11), TTL).unwrap();

        // The stale guard must not release the new holder's lock.
        drop(stale);
        assert!(locks.is_held("k", at(12)));
        drop(fresh);
        assert!(!locks.is_held("k", at(12)));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let locks = ClaimLocks::new();
        let old = locks.acquire("old", at(0), TTL).unwrap();
        let live = locks.acquire("live", at(5), TTL).unwrap();
        std::mem::forget(old);
        assert_eq!(locks.purge_expired(at(12)), 1);
        assert!(locks.is_held("live", at(12)));
        drop(live);
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        let locks = Arc::new(ClaimLocks::new());
        let now = SystemTime::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = Arc::clone(&locks);
                std::thread::spawn(move || locks.acquire("contended", now, TTL).map(std::mem::forget))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(winners, 1);
    }
}
