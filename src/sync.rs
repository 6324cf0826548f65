//! Small helpers shared by the threaded components

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Sender, TrySendError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand `event` to every subscriber without ever blocking.
///
/// A full queue loses this event; a dropped receiver is unsubscribed.
pub(crate) fn broadcast<T: Clone>(subscribers: &mut Vec<Sender<T>>, event: T, source: &str) {
    subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("{source}: subscriber queue full, event dropped");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}
