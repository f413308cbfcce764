//! A bounded worker pool that runs profile frame handlers off the reader
//! task, so one slow handler can't stall frame delivery for other channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of work submitted to the pool: a closure run on a worker task.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error returned when submitting to a pool that has started shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispatch pool is shutting down")
    }
}

impl std::error::Error for Rejected {}

pub struct DispatchPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    shutting_down: Arc<AtomicBool>,
}

impl DispatchPool {
    pub fn new(worker_count: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutting_down = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        match job {
                            Some(job) => job(),
                            None => {
                                tracing::debug!(worker = id, "dispatch worker exiting, channel closed");
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        DispatchPool { tx, workers, shutting_down }
    }

    /// Submit a job. Rejected once [`DispatchPool::shutdown`] has been
    /// called, even if outstanding jobs are still draining.
    pub fn submit(&self, job: Job) -> Result<(), Rejected> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Rejected);
        }
        self.tx.try_send(job).map_err(|_| Rejected)
    }

    /// Stop accepting new jobs. If `wait` is true, block until every worker
    /// has drained its queue and exited; otherwise return immediately and
    /// let workers finish in the background.
    pub async fn shutdown(self, wait: bool) {
        self.shutting_down.store(true, Ordering::Release);
        drop(self.tx);
        if wait {
            for worker in self.workers {
                let _ = worker.await;
            }
        }
    }
}

/// Schedule `job` to run once after `delay`, independent of the worker
/// pool's queue (used for start/close timeouts).
pub fn schedule_once(delay: std::time::Duration, job: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        job();
    })
}

/// Schedule `job` to run repeatedly every `interval` until the returned
/// handle is dropped or aborted.
pub fn schedule_repeating(
    interval: std::time::Duration,
    mut job: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            job();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn jobs_run_on_worker_tasks() {
        let pool = DispatchPool::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown(true).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = DispatchPool::new(1, 4);
        pool.shutdown(false).await;
        // shutdown(false) already set shutting_down before dropping tx, so
        // a fresh pool is needed to test the post-drop rejection path; here
        // we exercise the flag directly via a pool we control.
        let pool = DispatchPool::new(1, 4);
        let flag = pool.shutting_down.clone();
        flag.store(true, Ordering::Release);
        let err = pool.submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err, Rejected);
    }

    #[tokio::test]
    async fn one_shot_timer_fires_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handle = schedule_once(std::time::Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
