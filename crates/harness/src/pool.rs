//! Fixed-size worker pool with a bounded submission queue.
//!
//! Each job owns one pool. Submission blocks once the queue is full
//! (backpressure instead of unbounded buffering), and shutdown offers a
//! join-with-deadline so perf jobs can enforce their hard ceiling.

use crate::error::{HarnessError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of OS threads pulling tasks off a bounded queue.
pub struct WorkerPool {
    sender: Option<SyncSender<Task>>,
    done_rx: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers. The queue capacity equals the thread
    /// count, matching the pool sizing of the job dispatcher.
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(HarnessError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (task_tx, task_rx) = mpsc::sync_channel::<Task>(threads);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let task_rx = Arc::clone(&task_rx);
            let done_tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    loop {
                        let task = {
                            let rx = task_rx.lock().expect("task queue poisoned");
                            rx.recv()
                        };
                        match task {
                            Ok(task) => {
                                // A panicking task must not take the whole
                                // pool down with it.
                                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                                    error!(?panic, "worker task panicked");
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    let _ = done_tx.send(());
                })
                .map_err(|e| HarnessError::Scheduling(format!("spawn failed: {e}")))?;
            handles.push(handle);
        }

        debug!(pool = name, threads, "worker pool started");
        Ok(Self {
            sender: Some(task_tx),
            done_rx,
            handles,
        })
    }

    /// Submit one task. Blocks while the queue is at capacity.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HarnessError::Scheduling("pool already shut down".to_string()))?;
        sender
            .send(Box::new(task))
            .map_err(|_| HarnessError::Scheduling("all workers exited".to_string()))
    }

    /// Close the queue and wait for every worker to drain, with no
    /// deadline. Used by correctness jobs, which have no hard ceiling.
    pub fn join(mut self) {
        self.sender.take();
        for _ in 0..self.handles.len() {
            if self.done_rx.recv().is_err() {
                break;
            }
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Close the queue and wait up to `timeout` for every worker to
    /// drain. Returns `true` when all workers finished; on timeout the
    /// stragglers are abandoned (detached) and `false` is returned.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        // Dropping the sender closes the queue; workers exit after their
        // current task.
        self.sender.take();

        let deadline = Instant::now() + timeout;
        let mut finished = 0;
        while finished < self.handles.len() {
            let now = Instant::now();
            if now >= deadline {
                error!(
                    finished,
                    total = self.handles.len(),
                    "pool join timed out, abandoning remaining workers"
                );
                return false;
            }
            match self.done_rx.recv_timeout(deadline - now) {
                Ok(()) => finished += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in self.handles.drain(..) {
            // Workers already signalled completion; this join is instant.
            let _ = handle.join();
        }
        true
    }
}
