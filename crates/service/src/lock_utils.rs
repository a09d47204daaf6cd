use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Poisoned locks are recovered with `into_inner()`: a panic in one request must
/// not take config reads or telemetry inserts down for every later request.
fn recover<G>(result: LockResult<G>, name: &str, action: &str) -> G {
    result.unwrap_or_else(|poisoned| {
        log::warn!("event=lock_poisoned lock={} action={}", name, action);
        poisoned.into_inner()
    })
}

pub(crate) fn lock_recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    recover(mutex.lock(), name, "recover")
}

pub(crate) fn read_recover<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), name, "recover_read")
}

pub(crate) fn write_recover<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), name, "recover_write")
}
