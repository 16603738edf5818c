//! Main thread identity.
//!
//! The engine loop calls [`mark_main_thread`] once at startup. Operations that
//! would block on the GPU (downloads, SDF generation) refuse to run on that
//! thread.

use std::sync::OnceLock;
use std::thread::ThreadId;

static MAIN_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// Record the calling thread as the main thread. Later calls are ignored.
pub fn mark_main_thread() {
    let current = std::thread::current().id();
    if MAIN_THREAD.set(current).is_err() && MAIN_THREAD.get() != Some(&current) {
        log::warn!("Main thread is already registered, ignoring {current:?}");
    }
}

/// Whether the calling thread is the registered main thread.
///
/// Returns `false` when no main thread has been registered.
pub fn is_main_thread() -> bool {
    MAIN_THREAD.get() == Some(&std::thread::current().id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_is_never_main() {
        let handle = std::thread::spawn(is_main_thread);
        assert!(!handle.join().unwrap());
    }
}
