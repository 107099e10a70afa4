//! Single background thread that runs jobs one at a time, in submission
//! order.
//!
//! The queue is unbounded so submitting never blocks the caller. Dropping
//! the `Worker` closes the queue; jobs already queued still run, then the
//! thread exits on its own. It is not joined, since the owning thread may be
//! a UI thread that must not wait on network timeouts.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub struct Worker {
    name: String,
    tx: Sender<Job>,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            for job in rx {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("job panicked on worker {thread_name}");
                }
            }
            log::debug!("worker {thread_name} stopped");
        })?;
        Ok(Self { name, tx })
    }

    /// Queue `job`. Fails only if the worker thread has died.
    pub fn submit(&self, job: Job) -> io::Result<()> {
        self.tx.send(job).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("worker {} is not running", self.name),
            )
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = Worker::spawn("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();
        for i in 0..20 {
            let seen = seen.clone();
            worker
                .submit(Box::new(move || {
                    // later jobs are quicker; order must still hold
                    thread::sleep(Duration::from_millis(20 - i));
                    seen.lock().unwrap().push(i);
                }))
                .unwrap();
        }
        worker.submit(Box::new(move || done_tx.send(()).unwrap())).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn a_panicking_job_does_not_stop_the_worker() {
        let worker = Worker::spawn("panicky").unwrap();
        let (tx, rx) = mpsc::channel();
        worker.submit(Box::new(|| panic!("boom"))).unwrap();
        worker.submit(Box::new(move || tx.send(worker_name()).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(), Some("panicky"));
    }

    fn worker_name() -> Option<String> {
        thread::current().name().map(str::to_string)
    }

    #[test]
    fn queued_jobs_finish_after_drop() {
        let worker = Worker::spawn("dropped").unwrap();
        let (tx, rx) = mpsc::channel();
        worker
            .submit(Box::new(move || {
                thread::sleep(Duration::from_millis(30));
                tx.send(()).unwrap();
            }))
            .unwrap();
        drop(worker);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
