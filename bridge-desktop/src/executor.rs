//! Reply executor backed by one dedicated thread.

use bridge_traits::executor::{ReplyExecutor, ReplyJob};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

const THREAD_NAME: &str = "e3kit-reply";

/// Runs reply jobs in submission order on a single named thread.
///
/// Hosts whose transport only accepts replies from one thread (a UI or
/// platform thread) get the same guarantee from this executor in tests and
/// desktop embeddings. A panicking job is logged and does not stop the loop.
/// Dropping the executor drains queued jobs and joins the thread.
pub struct DedicatedThreadExecutor {
    sender: Mutex<Option<mpsc::Sender<ReplyJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DedicatedThreadExecutor {
    /// Start the reply thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<ReplyJob>();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Reply job panicked");
                    }
                }
                debug!("Reply thread stopped");
            })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Identifier of the reply thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Reply thread terminated abnormally");
            }
        }
    }
}

impl ReplyExecutor for DedicatedThreadExecutor {
    fn execute(&self, job: ReplyJob) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!("Reply thread is gone; dropping reply job");
                }
            }
            None => warn!("Executor shut down; dropping reply job"),
        }
    }
}

impl Drop for DedicatedThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_order_on_reply_thread() {
        let executor = DedicatedThreadExecutor::spawn().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            executor.execute(Box::new(move || {
                seen.lock().push((i, thread::current().id()));
            }));
        }
        let reply_thread = executor.thread_id();
        executor.shutdown();

        let seen = seen.lock();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id == reply_thread));
        assert_ne!(reply_thread, thread::current().id());
    }

    #[test]
    fn test_panicking_job_does_not_stop_the_loop() {
        let executor = DedicatedThreadExecutor::spawn().unwrap();
        let ran = Arc::new(Mutex::new(false));

        executor.execute(Box::new(|| panic!("boom")));
        let flag = Arc::clone(&ran);
        executor.execute(Box::new(move || *flag.lock() = true));
        executor.shutdown();

        assert!(*ran.lock());
    }

    #[test]
    fn test_jobs_after_shutdown_are_dropped() {
        let executor = DedicatedThreadExecutor::spawn().unwrap();
        executor.shutdown();

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        executor.execute(Box::new(move || *flag.lock() = true));

        assert!(!*ran.lock());
    }
}
