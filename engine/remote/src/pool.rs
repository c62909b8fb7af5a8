//! A fixed set of threads running jobs off a shared queue.
use crate::errors::RemoteResult;
use crossbeam_channel::{Receiver, Sender};
use slog::{Logger, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string payload"
    }
}

impl WorkerPool {
    /// Starts `size` workers, at least one. A job that panics is logged and
    /// its worker keeps serving the queue.
    pub fn new(size: usize, logger: Logger) -> RemoteResult<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..size.max(1))
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                let logger = logger.clone();
                thread::Builder::new()
                    .name(format!("sluice-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            if let Err(payload) =
                                panic::catch_unwind(AssertUnwindSafe(job))
                            {
                                error!(
                                    logger,
                                    "job panicked: {}",
                                    panic_message(payload.as_ref());
                                    "worker" => i
                                );
                            }
                        }
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            // the receivers live as long as the pool
            let _ = sender.send(Box::new(job));
        }
    }

    /// Runs every queued job, then stops the threads.
    pub fn join(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_engine::logging;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_drains_the_queue() {
        let mut pool = WorkerPool::new(3, logging::discard()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn a_panicking_job_does_not_take_its_worker_down() {
        let mut pool = WorkerPool::new(1, logging::discard()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        pool.submit(|| panic!("compile blew up"));
        let after = Arc::clone(&done);
        pool.submit(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_workers_still_run_jobs() {
        let mut pool = WorkerPool::new(0, logging::discard()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
