//! Per-object monitors. Every object can be locked reentrantly and carries a
//! condition for `wait`/`notify`; monitors are materialized lazily in a
//! registry keyed by object handle.

use crate::error::VmError;
use crate::heap::HeapRef;
use crate::keys::ThreadId;
use crate::throw_exception;
use dashmap::DashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    entry_count: usize,
}

/// A reentrant mutex plus condition variable, the two halves sharing one
/// state lock so `wait` can release and re-acquire atomically.
#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    /// Signalled when the monitor is released.
    unlocked: Condvar,
    /// Signalled by `notify`/`notifyAll`.
    notified: Condvar,
}

/// What ended a `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the monitor, blocking until it is free. Reentrant for the
    /// owning thread.
    pub fn enter(&self, thread: ThreadId) {
        let mut state = self.state.lock().unwrap();
        if state.owner == Some(thread) {
            state.entry_count += 1;
            return;
        }
        while state.owner.is_some() {
            state = self.unlocked.wait(state).unwrap();
        }
        state.owner = Some(thread);
        state.entry_count = 1;
    }

    /// Releases one entry. Fails if the calling thread does not own the
    /// monitor.
    pub fn exit(&self, thread: ThreadId) -> Result<(), VmError> {
        let mut state = self.state.lock().unwrap();
        if state.owner != Some(thread) {
            throw_exception!(IllegalMonitorState, "current thread is not the owner")?;
        }
        state.entry_count -= 1;
        if state.entry_count == 0 {
            state.owner = None;
            self.unlocked.notify_one();
        }
        Ok(())
    }

    /// Fully releases the monitor, blocks on the condition (optionally with a
    /// timeout) and re-acquires with the saved entry count before returning.
    /// Spurious wakeups surface as `Notified`; callers must tolerate them.
    pub fn wait(&self, thread: ThreadId, timeout: Option<Duration>) -> Result<WaitOutcome, VmError> {
        let mut state = self.state.lock().unwrap();
        if state.owner != Some(thread) {
            throw_exception!(IllegalMonitorState, "current thread is not the owner")?;
        }
        let saved_count = state.entry_count;
        state.owner = None;
        state.entry_count = 0;
        self.unlocked.notify_one();

        let outcome = match timeout {
            Some(duration) => {
                let (guard, timeout_result) =
                    self.notified.wait_timeout(state, duration).unwrap();
                state = guard;
                if timeout_result.timed_out() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Notified
                }
            }
            None => {
                state = self.notified.wait(state).unwrap();
                WaitOutcome::Notified
            }
        };

        while state.owner.is_some() {
            state = self.unlocked.wait(state).unwrap();
        }
        state.owner = Some(thread);
        state.entry_count = saved_count;
        Ok(outcome)
    }

    pub fn notify(&self, thread: ThreadId) -> Result<(), VmError> {
        let state = self.state.lock().unwrap();
        if state.owner != Some(thread) {
            throw_exception!(IllegalMonitorState, "current thread is not the owner")?;
        }
        self.notified.notify_one();
        Ok(())
    }

    pub fn notify_all(&self, thread: ThreadId) -> Result<(), VmError> {
        let state = self.state.lock().unwrap();
        if state.owner != Some(thread) {
            throw_exception!(IllegalMonitorState, "current thread is not the owner")?;
        }
        self.notified.notify_all();
        Ok(())
    }

    pub fn is_owned_by(&self, thread: ThreadId) -> bool {
        self.state.lock().unwrap().owner == Some(thread)
    }
}

/// Maps object handles to their monitors.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    monitors: DashMap<HeapRef, Arc<Monitor>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn monitor(&self, object: HeapRef) -> Arc<Monitor> {
        self.monitors
            .entry(object)
            .or_insert_with(|| Arc::new(Monitor::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reentrant_enter_and_exit() {
        let monitor = Monitor::new();
        let thread = ThreadId::from_u64(1);
        monitor.enter(thread);
        monitor.enter(thread);
        assert!(monitor.is_owned_by(thread));
        monitor.exit(thread).unwrap();
        assert!(monitor.is_owned_by(thread));
        monitor.exit(thread).unwrap();
        assert!(!monitor.is_owned_by(thread));
    }

    #[test]
    fn exit_without_ownership_fails() {
        let monitor = Monitor::new();
        assert!(monitor.exit(ThreadId::from_u64(7)).is_err());
    }

    #[test]
    fn wait_times_out_and_reacquires() {
        let monitor = Monitor::new();
        let thread = ThreadId::from_u64(1);
        monitor.enter(thread);
        monitor.enter(thread);
        let outcome = monitor
            .wait(thread, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // Entry count restored across the wait.
        monitor.exit(thread).unwrap();
        monitor.exit(thread).unwrap();
        assert!(!monitor.is_owned_by(thread));
    }

    #[test]
    fn contended_enter_serializes() {
        let monitor = Arc::new(Monitor::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for id in 0..4u64 {
            let monitor = monitor.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                let thread = ThreadId::from_u64(id + 1);
                for _ in 0..100 {
                    monitor.enter(thread);
                    let inside = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(inside, 0, "monitor admitted two threads");
                    counter.fetch_sub(1, Ordering::SeqCst);
                    monitor.exit(thread).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn notify_wakes_waiter() {
        let monitor = Arc::new(Monitor::new());
        let waiter = {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                let thread = ThreadId::from_u64(1);
                monitor.enter(thread);
                let outcome = monitor.wait(thread, None).unwrap();
                monitor.exit(thread).unwrap();
                outcome
            })
        };

        let notifier = ThreadId::from_u64(2);
        // Keep notifying until the waiter observed it; wait releases the
        // monitor so enter() here can interleave.
        loop {
            monitor.enter(notifier);
            monitor.notify_all(notifier).unwrap();
            monitor.exit(notifier).unwrap();
            if waiter.is_finished() {
                break;
            }
            std::thread::yield_now();
        }
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Notified);
    }
}
