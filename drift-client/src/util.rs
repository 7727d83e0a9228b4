//! Small shared helpers.

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering from panic poisoning. The panic that
/// poisoned the lock was already reported where it happened.
pub(crate) fn relock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
