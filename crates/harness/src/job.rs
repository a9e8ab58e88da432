//! Generic job lifecycle primitives shared by the correctness matrix and
//! the performance sampler.
//!
//! A job moves through `Created -> Running -> (Completed | Failed)`. The
//! pieces here are deliberately small: an atomic state cell, a sticky
//! first-error slot, an interruptible stop signal for soak jobs, and an
//! epoch-anchored monotonic clock for sample timestamps.

use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Configured but not yet running.
    Created,
    /// Workers are dispatched (or dispatching).
    Running,
    /// All workers finished their budget.
    Completed,
    /// Scheduling error or timeout; collected results stay queryable.
    Failed,
}

/// Atomic holder for a `JobState`, readable from any thread.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(JobState::Created as u8))
    }

    pub fn set(&self, state: JobState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> JobState {
        match self.0.load(Ordering::SeqCst) {
            0 => JobState::Created,
            1 => JobState::Running,
            2 => JobState::Completed,
            _ => JobState::Failed,
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// First-failure-wins error slot.
///
/// Worker threads record unexpected failures here; once set, the value is
/// never overwritten. Later errors are still logged so they are not lost
/// entirely.
#[derive(Debug, Default)]
pub struct ExceptionSlot(Mutex<Option<String>>);

impl ExceptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Only the first one sticks.
    pub fn record(&self, error: &dyn Display) {
        let mut slot = self.0.lock().expect("exception slot poisoned");
        if slot.is_none() {
            *slot = Some(error.to_string());
        } else {
            warn!(error = %error, "discarding non-first job error");
        }
    }

    /// The sticky error, or `None` when the job has seen no failure.
    pub fn get(&self) -> Option<String> {
        self.0.lock().expect("exception slot poisoned").clone()
    }

    /// The sticky error as the empty-string wire convention.
    pub fn get_or_empty(&self) -> String {
        self.get().unwrap_or_default()
    }
}

/// Cooperative stop signal checked between correctness sweeps.
///
/// There is no way to cancel an in-flight cryptographic call; triggering
/// the signal only stops workers from starting further sweeps, and wakes
/// any worker currently in its inter-sweep sleep.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask workers to stop after their current sweep.
    pub fn trigger(&self) {
        let mut stopped = self.stopped.lock().expect("stop signal poisoned");
        *stopped = true;
        self.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock().expect("stop signal poisoned")
    }

    /// Sleep for up to `duration`, returning early when triggered.
    /// Returns `false` if the signal fired (workers should exit).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock().expect("stop signal poisoned");
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _timeout) = self
                .cv
                .wait_timeout(stopped, deadline - now)
                .expect("stop signal poisoned");
            stopped = guard;
        }
        false
    }
}

/// Millisecond clock anchored to the UNIX epoch at job start but driven
/// by a monotonic source, so `end >= start` holds for every sample even
/// if the wall clock steps.
#[derive(Debug, Clone)]
pub struct JobClock {
    epoch_ms: u64,
    origin: Instant,
}

impl JobClock {
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    /// Current time in milliseconds since the UNIX epoch.
    pub fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

impl Default for JobClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), JobState::Created);
        cell.set(JobState::Running);
        assert_eq!(cell.get(), JobState::Running);
        cell.set(JobState::Failed);
        assert_eq!(cell.get(), JobState::Failed);
    }

    #[test]
    fn test_exception_slot_first_wins() {
        let slot = ExceptionSlot::new();
        assert_eq!(slot.get(), None);
        slot.record(&"first failure");
        slot.record(&"second failure");
        assert_eq!(slot.get().as_deref(), Some("first failure"));
        assert_eq!(slot.get_or_empty(), "first failure");
    }

    #[test]
    fn test_stop_signal_interrupts_sleep() {
        let signal = Arc::new(StopSignal::new());
        let signal2 = Arc::clone(&signal);

        let handle = thread::spawn(move || signal2.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let start = Instant::now();
        let finished = handle.join().unwrap();
        assert!(!finished, "sleep should report interruption");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_signal_sleep_elapses() {
        let signal = StopSignal::new();
        assert!(signal.sleep(Duration::from_millis(10)));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_job_clock_monotonic() {
        let clock = JobClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        // Anchored near the actual wall clock.
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(wall.abs_diff(clock.now_ms()) < 5_000);
    }
}
