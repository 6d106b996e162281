//! Engine collaborator interfaces
//!
//! The decode and mux engines are opaque capability providers consumed
//! through the traits in [`decode`] and [`mux`]. Their internal global
//! state (codec tables, allocator bookkeeping) is not reentrant, so the
//! minimal atomic operations (open codec, decode or encode one unit,
//! close codec) run under the process-wide advisory lock below. The lock
//! is never held across packet I/O, buffer conversion, or delivery.

pub mod decode;
pub mod mux;
pub mod symphonia;

use std::sync::{Mutex, MutexGuard};

/// Process-wide advisory lock for non-reentrant engine calls.
static ENGINE_LOCK: Mutex<()> = Mutex::new(());

/// Bounded try-lock attempts before falling back to a blocking acquire.
const SPIN_ATTEMPTS: u32 = 64;

/// Acquire the engine lock.
///
/// A short bounded spin covers the common uncontended case without a
/// syscall; under contention this degrades to an ordinary blocking lock,
/// so acquisition can never livelock. Fairness is the OS mutex's problem.
pub fn engine_lock() -> MutexGuard<'static, ()> {
    for _ in 0..SPIN_ATTEMPTS {
        if let Ok(guard) = ENGINE_LOCK.try_lock() {
            return guard;
        }
        std::hint::spin_loop();
    }
    ENGINE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_engine_lock_uncontended() {
        let guard = engine_lock();
        drop(guard);
        // Reacquirable immediately after release
        let _guard = engine_lock();
    }

    #[test]
    fn test_engine_lock_contended_threads_all_complete() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let _guard = engine_lock();
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }
}
