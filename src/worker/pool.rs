use std::{
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use crate::error::Outcome;

pub type Job = Box<dyn FnOnce() -> Outcome + Send + 'static>;
pub type Callback = Box<dyn FnOnce(Option<Outcome>) + Send + 'static>;

struct Submission {
    job: Job,
    callback: Callback,
    slot: Sender<Option<Outcome>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResultError {
    #[error("result not available yet")]
    Timeout,
    #[error("worker dropped the job without a result")]
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// Handle on the eventual result of a submitted job.
pub struct AsyncResult {
    receiver: Receiver<Option<Outcome>>,
}

impl AsyncResult {
    pub fn get(&self, timeout: Duration) -> Result<Option<Outcome>, ResultError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => Err(ResultError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ResultError::Lost),
        }
    }
}

/// Fixed set of worker threads draining a shared job queue.
pub struct WorkerPool {
    sender: Option<Sender<Submission>>,
    queue: Receiver<Submission>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = unbounded::<Submission>();
        let workers = (0..size.max(1))
            .filter_map(|index| spawn_worker_thread(index, receiver.clone()))
            .collect();
        WorkerPool {
            sender: Some(sender),
            queue: receiver,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&self, job: Job, callback: Callback) -> Result<AsyncResult, PoolClosed> {
        let sender = self.sender.as_ref().ok_or(PoolClosed)?;
        let (slot, receiver) = bounded(1);
        sender
            .send(Submission {
                job,
                callback,
                slot,
            })
            .map_err(|_| PoolClosed)?;
        Ok(AsyncResult { receiver })
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub fn close(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread exited abnormally.");
            }
        }
    }

    /// Stops accepting jobs and discards the queued ones; running jobs are left to their workers.
    pub fn terminate(&mut self) {
        self.sender.take();
        let mut dropped = 0;
        while self.queue.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Discarded {} queued job(s).", dropped);
        }
        self.workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
    }
}

fn spawn_worker_thread(index: usize, receiver: Receiver<Submission>) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name(format!("rpla-worker-{}", index))
        .spawn(move || {
            while let Ok(Submission {
                job,
                callback,
                slot,
            }) = receiver.recv()
            {
                let payload = panic::catch_unwind(AssertUnwindSafe(job)).ok();
                let _ = slot.send(payload.clone());
                callback(payload);
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to spawn worker thread {}: {}", index, e);
            None
        }
    }
}
