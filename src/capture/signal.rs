// Frame hand-off between the capture callback thread and the render loop
//
// A single pending flag guarded by a mutex, with one condition variable.
// The capture side sets the flag, the render loop waits for it and clears it.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::CaptureError;

/// What happened to a frame notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The slot was empty; the render loop will pick this frame up
    Delivered,
    /// A notification was already pending, so a frame may be dropped
    Dropped,
}

/// Single-slot "new frame available" notification
pub struct FrameReadySignal {
    pending: Mutex<bool>,
    ready: Condvar,
    notifications: AtomicU64,
    drops: AtomicU64,
}

impl FrameReadySignal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            ready: Condvar::new(),
            notifications: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// Mark a frame as available and wake the render loop.
    ///
    /// Called from the capture device's own thread. If the previous
    /// notification has not been consumed yet the call is counted as a drop
    /// and reported, but the waiter is still woken.
    pub fn notify(&self) -> NotifyOutcome {
        let mut pending = self.pending.lock();
        self.notifications.fetch_add(1, Ordering::Relaxed);

        let outcome = if *pending {
            let total = self.drops.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "[Capture] Frame available while previous frame still pending, frame could be dropped ({} total)",
                total
            );
            NotifyOutcome::Dropped
        } else {
            *pending = true;
            NotifyOutcome::Delivered
        };

        self.ready.notify_one();
        outcome
    }

    /// Block until a frame is available or `timeout` elapses, then clear the flag.
    ///
    /// Spurious wakeups are absorbed; only the deadline ends the wait.
    pub fn await_and_clear(&self, timeout: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();

        while !*pending {
            if self.ready.wait_until(&mut pending, deadline).timed_out() && !*pending {
                return Err(CaptureError::WaitTimeout(timeout));
            }
        }

        *pending = false;
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock()
    }

    /// Number of notifications that arrived while one was already pending
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn notification_count(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

impl Default for FrameReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn notify_then_await_clears_flag() {
        let signal = FrameReadySignal::new();
        assert_eq!(signal.notify(), NotifyOutcome::Delivered);
        assert!(signal.is_pending());

        signal.await_and_clear(Duration::from_millis(10)).unwrap();
        assert!(!signal.is_pending());
        assert_eq!(signal.drop_count(), 0);
    }

    #[test]
    fn await_without_frame_times_out() {
        let signal = FrameReadySignal::new();
        let started = Instant::now();
        let err = signal.await_and_clear(Duration::from_millis(30)).unwrap_err();

        assert!(matches!(err, CaptureError::WaitTimeout(d) if d == Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn second_notify_is_recorded_as_drop_without_losing_wakeup() {
        let signal = FrameReadySignal::new();
        assert_eq!(signal.notify(), NotifyOutcome::Delivered);
        assert_eq!(signal.notify(), NotifyOutcome::Dropped);
        assert_eq!(signal.drop_count(), 1);
        assert_eq!(signal.notification_count(), 2);

        // Both notifications collapse into one pending frame.
        signal.await_and_clear(Duration::from_millis(10)).unwrap();
        assert!(signal.await_and_clear(Duration::from_millis(10)).is_err());

        // The slot is usable again afterwards.
        assert_eq!(signal.notify(), NotifyOutcome::Delivered);
        signal.await_and_clear(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn notify_from_other_thread_wakes_waiter() {
        let signal = Arc::new(FrameReadySignal::new());
        let producer = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                signal.notify()
            })
        };

        signal.await_and_clear(Duration::from_secs(2)).unwrap();
        assert_eq!(producer.join().unwrap(), NotifyOutcome::Delivered);
    }
}
