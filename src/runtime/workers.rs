//! Worker pool for blocks that hand work off the node thread
//!
//! Chains themselves never run in parallel; the pool is the one place
//! where work happens on other threads. A block spawns a `Send` closure
//! and suspends its chain until the result arrives.

use std::io;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Fixed-size pool backed by a tokio runtime's blocking threads
pub struct WorkerPool {
    runtime: Option<Runtime>,
    threads: usize,
}

impl WorkerPool {
    /// Create a pool running at most `threads` closures at once
    pub fn new(threads: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("chainrt-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
            threads,
        })
    }

    /// Maximum number of concurrently running closures
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `work` on a worker thread
    pub fn spawn<F, T>(&self, work: F) -> WorkerTask<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if let Some(runtime) = &self.runtime {
            runtime.spawn_blocking(move || {
                // the receiver may be gone if the chain stopped meanwhile
                let _ = tx.send(work());
            });
        }
        WorkerTask { rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Pending result of a worker closure
pub struct WorkerTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> WorkerTask<T> {
    /// The result if it is ready. Fails if the worker dropped the task
    /// (it panicked, or the pool shut down).
    pub fn try_take(&mut self) -> Result<Option<T>, String> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err("worker dropped the task".into()),
        }
    }

    /// Wait for the result
    pub async fn wait(self) -> Result<T, String> {
        self.rx.await.map_err(|_| "worker dropped the task".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_wait() {
        let pool = WorkerPool::new(2).unwrap();
        let task = pool.spawn(|| 21 * 2);
        let value = futures::executor::block_on(task.wait()).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_try_take_eventually_ready() {
        let pool = WorkerPool::new(1).unwrap();
        let mut task = pool.spawn(|| "done".to_string());
        let mut result = None;
        for _ in 0..1000 {
            if let Some(value) = task.try_take().unwrap() {
                result = Some(value);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(result.as_deref(), Some("done"));
    }

    #[test]
    fn test_panicking_worker_reports_error() {
        let pool = WorkerPool::new(1).unwrap();
        let task = pool.spawn(|| -> u32 { panic!("boom") });
        assert!(futures::executor::block_on(task.wait()).is_err());
    }

    #[test]
    fn test_zero_threads_clamped() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
    }
}
