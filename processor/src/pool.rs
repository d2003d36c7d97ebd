//! Fixed-size worker pool
//!
//! Jobs go through one crossbeam channel shared by every worker thread.
//! Shutdown closes the channel, lets queued jobs finish, and waits up to a
//! budget; whatever is still outstanding afterwards is abandoned, not killed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still queued or running when the budget ran out
    pub abandoned: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0
    }
}

#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Outstanding {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Waits until nothing is outstanding or the deadline passes; returns
    /// what is left.
    fn wait_until(&self, deadline: Instant) -> usize {
        let mut count = self.count.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        *count
    }
}

/// Decrements on drop so a panicking job still counts as finished.
struct JobGuard<'a>(&'a Outstanding);

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    outstanding: Arc<Outstanding>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let outstanding = Arc::new(Outstanding::default());

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let outstanding = Arc::clone(&outstanding);
            let handle = thread::Builder::new()
                .name(format!("tp-worker-{index}"))
                .spawn(move || run_worker(receiver, outstanding))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            outstanding,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs queued or running
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock()
    }

    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::Closed);
        };
        self.outstanding.increment();
        if sender.send(Box::new(job)).is_err() {
            self.outstanding.decrement();
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    /// Stops accepting work and waits up to `timeout` for outstanding jobs.
    ///
    /// Workers that finish in time are joined. Anything else is left
    /// running detached and reported as abandoned. Calling this again
    /// reports what is still outstanding.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.sender.lock().take();

        let abandoned = self.outstanding.wait_until(Instant::now() + timeout);
        let workers = std::mem::take(&mut *self.workers.lock());
        if abandoned == 0 {
            for worker in workers {
                if worker.join().is_err() {
                    tracing::warn!("worker thread exited by panic");
                }
            }
        }
        ShutdownReport { abandoned }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.lock().take();
    }
}

fn run_worker(receiver: Receiver<Job>, outstanding: Arc<Outstanding>) {
    for job in receiver.iter() {
        let _guard = JobGuard(&outstanding);
        job();
    }
}
