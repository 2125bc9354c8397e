//! Poison-tolerant lock access for the in-memory cache.
//!
//! A panic while a channel lock is held must not turn every later cache call
//! into a panic; the guard is recovered and the event is logged instead.

use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(result: LockResult<G>, channel: &'static str, op: &'static str, kind: &str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            channel,
            lock_kind = kind,
            result = "poisoned_recovered",
            "Recovered from poisoned paste cache lock; entries may be stale"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    channel: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), channel, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    channel: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), channel, op, "rwlock.write")
}
