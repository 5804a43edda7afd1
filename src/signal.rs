//! Signal handling and cooperative cancellation.
//!
//! Two primitives live here:
//!
//! - [`interrupt_channel`] pairs an [`InterruptHandle`] (cloned into the
//!   SIGINT/SIGTERM handler) with an [`InterruptReceiver`] that the supervising
//!   thread polls while it waits on the child process. The handler never touches
//!   supervisor state directly; it only delivers into the channel.
//! - [`StopSignal`] wakes background loops (sampler, uploader) as soon as a stop
//!   is requested instead of letting them sleep out a full interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TaskwardenError};

/// Exit status used when a second interrupt arrives before the first was handled.
const FORCED_EXIT_CODE: i32 = 130;

/// Creates a connected interrupt handle/receiver pair.
pub fn interrupt_channel() -> (InterruptHandle, InterruptReceiver) {
    let (tx, rx) = mpsc::channel();
    let handle = InterruptHandle {
        tx,
        delivered: Arc::new(AtomicUsize::new(0)),
    };
    let receiver = InterruptReceiver { rx: Mutex::new(rx) };
    (handle, receiver)
}

/// Sending side of the interrupt channel.
///
/// Cheap to clone and safe to call from any thread, including the ctrlc
/// handler thread.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    tx: mpsc::Sender<()>,
    delivered: Arc<AtomicUsize>,
}

impl InterruptHandle {
    /// Delivers an interrupt. Returns how many interrupts have been delivered
    /// through this channel so far, including this one.
    pub fn interrupt(&self) -> usize {
        let count = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(()).is_err() {
            debug!("interrupt delivered after the supervisor went away");
        }
        count
    }

    /// Number of interrupts delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

/// Receiving side of the interrupt channel, owned by the supervisor.
#[derive(Debug)]
pub struct InterruptReceiver {
    rx: Mutex<mpsc::Receiver<()>>,
}

impl InterruptReceiver {
    /// Blocks for at most `timeout` waiting for an interrupt.
    ///
    /// Returns `true` if an interrupt was received. A disconnected channel
    /// (every handle dropped) can never deliver, so it just sleeps out the
    /// timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                drop(rx);
                std::thread::sleep(timeout);
                false
            }
        }
    }

    /// Non-blocking check for a pending interrupt.
    pub fn try_take(&self) -> bool {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }
}

/// Registers the process-wide SIGINT/SIGTERM handler.
///
/// The first signal is forwarded to `handle` so the supervisor can send its
/// termination notice and clean up. A second signal while the first is still
/// being handled exits immediately.
///
/// # Errors
///
/// Returns an error if a handler is already registered for this process.
pub fn install_handler(handle: InterruptHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        let count = handle.interrupt();
        if count > 1 {
            warn!("second interrupt received, exiting immediately");
            std::process::exit(FORCED_EXIT_CODE);
        }
        warn!("interrupt received, shutting down");
    })
    .map_err(|e| TaskwardenError::SignalHandler(e.to_string()))
}

/// Cooperative stop flag for background loops.
///
/// Waiters block on a condition variable, so [`StopSignal::request`] wakes
/// them immediately. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes every waiter. Idempotent.
    pub fn request(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps until `deadline` or until a stop is requested, whichever comes
    /// first. Returns `true` if a stop was requested.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
    }

    /// Like [`StopSignal::wait_until`] with a relative timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_receiver_sees_nothing_initially() {
        let (_handle, receiver) = interrupt_channel();
        assert!(!receiver.try_take());
        assert!(!receiver.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_interrupt_is_received() {
        let (handle, receiver) = interrupt_channel();
        assert_eq!(handle.interrupt(), 1);
        assert!(receiver.try_take());
        // Consumed
        assert!(!receiver.try_take());
    }

    #[test]
    fn test_clones_share_delivery_count() {
        let (handle, _receiver) = interrupt_channel();
        let clone = handle.clone();
        handle.interrupt();
        clone.interrupt();
        assert_eq!(handle.delivered(), 2);
        assert_eq!(clone.delivered(), 2);
    }

    #[test]
    fn test_interrupt_from_another_thread_wakes_waiter() {
        let (handle, receiver) = interrupt_channel();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.interrupt();
        });
        assert!(receiver.wait(Duration::from_secs(5)));
        sender.join().unwrap();
    }

    #[test]
    fn test_disconnected_receiver_times_out() {
        let (handle, receiver) = interrupt_channel();
        drop(handle);
        let started = Instant::now();
        assert!(!receiver.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_signal_starts_clear() {
        let stop = StopSignal::new();
        assert!(!stop.is_requested());
        assert!(!stop.wait_for(Duration::from_millis(5)));
    }

    #[test]
    fn test_stop_signal_request_is_idempotent() {
        let stop = StopSignal::new();
        stop.request();
        stop.request();
        assert!(stop.is_requested());
        assert!(stop.wait_for(Duration::from_secs(60)));
    }

    #[test]
    fn test_stop_signal_wakes_long_wait_early() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait_for(Duration::from_secs(60)));
        thread::sleep(Duration::from_millis(20));
        stop.request();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
