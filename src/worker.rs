use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

/// A named background thread running a job that polls a shared kill flag.
///
/// The job owns whatever it needs and returns when the flag is raised, or earlier with an
/// error. Joining hands that error back to whoever supervises the worker.
pub enum Worker {
    Worker {
        name: String,
        worker: Option<JoinHandle<Result<()>>>,
        kill_flag: Arc<AtomicBool>,
    },
    Done,
}

impl Worker {
    pub fn spawn<F>(name: &str, work: F) -> Result<Worker>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<()> + Send + 'static,
    {
        let kill_flag = Arc::new(AtomicBool::new(false));
        let worker_kill_flag = kill_flag.clone();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || work(worker_kill_flag))?;
        Ok(Worker::Worker {
            name: name.to_owned(),
            worker: Some(worker),
            kill_flag,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Worker::Worker { name, .. } => name,
            Worker::Done => "done",
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Worker::Worker { worker, .. } => worker.as_ref().map_or(true, |w| w.is_finished()),
            Worker::Done => true,
        }
    }

    pub fn is_joinable(&self) -> bool {
        matches!(self, Worker::Worker { .. })
    }

    // named kill instead of stop: there is no restarting a worker once it's been told to die.
    pub fn kill(&self) {
        if let Worker::Worker { kill_flag, .. } = self {
            kill_flag.store(true, Ordering::Release);
        }
    }

    /// Raises the kill flag and waits for the job. Returns the error the job ended with, if any.
    /// Joining twice is a no-op.
    pub fn join(&mut self) -> Option<Error> {
        let Worker::Worker { worker, kill_flag, .. } = self else {
            return None;
        };
        kill_flag.store(true, Ordering::Release);
        let handle = worker.take()?;
        let res = match handle.join() {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(Error::Panicked),
        };
        *self = Worker::Done;
        res
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(e) = self.join() {
            log::debug!("worker ended with error during drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn join_stops_a_polling_job() {
        let mut worker = Worker::spawn("poller", |kill_flag| {
            while !kill_flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(worker.name(), "poller");
        assert!(worker.join().is_none());
        assert!(worker.is_finished());
        assert!(!worker.is_joinable());
    }

    #[test]
    fn join_returns_the_job_error_once() {
        let mut worker = Worker::spawn("failer", |_| Err(Error::NotStarted)).unwrap();
        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(worker.join(), Some(Error::NotStarted)));
        assert!(worker.join().is_none());
    }

    #[test]
    fn kill_lets_the_job_finish_without_joining() {
        let mut worker = Worker::spawn("killed", |kill_flag| {
            while !kill_flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
        assert!(!worker.is_finished());
        worker.kill();
        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.join().is_none());
        // a finished worker ignores further kills
        worker.kill();
    }

    #[test]
    fn panics_are_reported() {
        let mut worker = Worker::spawn("panicker", |_| panic!("boom")).unwrap();
        assert!(matches!(worker.join(), Some(Error::Panicked)));
    }
}
