// Mutex access shared by the controllers, the store and the server

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the guard if a previous holder panicked.
/// Every value behind these mutexes stays valid across a partial update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
