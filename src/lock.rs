use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::Ms;

/// How long an acquired lock survives if its holder never releases it
/// (crashed task, dropped future). Generous enough to cover a full
/// scheduling run over a large draw.
pub const LOCK_TTL_MS: Ms = 75_000;

#[derive(Clone, Copy)]
struct LockSlot {
    expires_at: Ms,
    token: Ulid,
}

/// Creation-is-truth advisory locks: whoever inserts the key holds the
/// lock. A stale entry (TTL passed) is reclaimed in place rather than
/// requiring a separate cleanup step.
#[derive(Default)]
pub struct LockTable {
    inner: Arc<DashMap<String, LockSlot>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock. Returns a guard that releases on drop, or
    /// `None` if another holder's entry is still live.
    pub fn acquire(&self, key: impl Into<String>, now: Ms) -> Option<LockGuard> {
        let key = key.into();
        let token = Ulid::new();
        let slot = LockSlot {
            expires_at: now + LOCK_TTL_MS,
            token,
        };
        match self.inner.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().expires_at > now {
                    return None;
                }
                // Stale — previous holder died. Reclaim.
                e.insert(slot);
            }
            Entry::Vacant(v) => {
                v.insert(slot);
            }
        }
        Some(LockGuard {
            key,
            token,
            table: Arc::clone(&self.inner),
        })
    }

    pub fn is_held(&self, key: &str, now: Ms) -> bool {
        self.inner
            .get(key)
            .is_some_and(|slot| slot.expires_at > now)
    }

    /// Drop entries whose TTL has passed. Returns how many were removed.
    pub fn purge_stale(&self, now: Ms) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, slot| slot.expires_at > now);
        before - self.inner.len()
    }
}

/// Releases the lock on drop. Only removes the entry it created: if the
/// guard outlived its TTL and someone else reclaimed the key, their lock
/// is left alone.
pub struct LockGuard {
    key: String,
    token: Ulid,
    table: Arc<DashMap<String, LockSlot>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table
            .remove_if(&self.key, |_, slot| slot.token == self.token);
    }
}
