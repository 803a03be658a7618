//! Multi-threaded signature verification pool.
//!
//! Certificate checks are CPU-bound; the consensus event loop must never
//! stall on them. The pool runs checks on dedicated worker threads and
//! answers each submission through a one-shot channel the caller can await
//! (or poll) from the event loop.
//!
//! The job queue is a bounded crossbeam channel: when it is full, the
//! submission resolves to `false` immediately — an unverifiable message is
//! dropped at the verifier, it never blocks the core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use tokio::sync::oneshot;

/// Configuration for the verification pool.
#[derive(Debug, Clone)]
pub struct VerifyPoolConfig {
    /// Number of worker threads. Default: number of CPU cores.
    pub num_workers: usize,
    /// Maximum number of queued jobs. When full, new jobs resolve to
    /// `false`. Default: 1024.
    pub job_queue_capacity: usize,
}

impl Default for VerifyPoolConfig {
    fn default() -> Self {
        VerifyPoolConfig {
            num_workers: num_cpus::get().max(1),
            job_queue_capacity: 1024,
        }
    }
}

impl VerifyPoolConfig {
    /// Override the worker count.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Override the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity.max(1);
        self
    }
}

/// Error type for job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The job queue is full; the job was not queued.
    QueueFull,
    /// The pool has been shut down.
    PoolShutdown,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "verification job queue is full"),
            SubmitError::PoolShutdown => write!(f, "verification pool has shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Counters for pool observability.
#[derive(Debug, Default)]
pub struct VerifyPoolMetrics {
    /// Total jobs submitted successfully.
    pub jobs_submitted: AtomicU64,
    /// Jobs rejected because the queue was full.
    pub jobs_dropped: AtomicU64,
    /// Jobs completed with a positive verdict.
    pub jobs_ok: AtomicU64,
    /// Jobs completed with a negative verdict.
    pub jobs_failed: AtomicU64,
}

impl VerifyPoolMetrics {
    pub fn submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.jobs_dropped.load(Ordering::Relaxed)
    }

    pub fn ok(&self) -> u64 {
        self.jobs_ok.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }
}

struct VerifyTask {
    run: Box<dyn FnOnce() -> bool + Send>,
    reply: oneshot::Sender<bool>,
}

/// A thread pool answering signature checks through one-shot channels.
pub struct VerifyPool {
    job_tx: Option<Sender<VerifyTask>>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<VerifyPoolMetrics>,
}

impl VerifyPool {
    /// Spin up the worker threads.
    pub fn new(config: VerifyPoolConfig) -> Self {
        let (job_tx, job_rx) = bounded::<VerifyTask>(config.job_queue_capacity);
        let metrics = Arc::new(VerifyPoolMetrics::default());

        let mut workers = Vec::with_capacity(config.num_workers);
        for i in 0..config.num_workers {
            let rx = job_rx.clone();
            let metrics = Arc::clone(&metrics);
            let handle = thread::Builder::new()
                .name(format!("tandem-verify-{i}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        let ok = (task.run)();
                        if ok {
                            metrics.jobs_ok.fetch_add(1, Ordering::Relaxed);
                        } else {
                            metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                        }
                        // The caller may have given up; that is fine.
                        let _ = task.reply.send(ok);
                    }
                })
                .expect("spawn verify worker");
            workers.push(handle);
        }

        VerifyPool {
            job_tx: Some(job_tx),
            workers,
            metrics,
        }
    }

    /// Submit a verification closure; the receiver resolves with the
    /// verdict. A full queue or a shut-down pool resolves to `false`
    /// immediately.
    pub fn verify<F>(&self, check: F) -> oneshot::Receiver<bool>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let task = VerifyTask {
            run: Box::new(check),
            reply,
        };
        let Some(job_tx) = self.job_tx.as_ref() else {
            let _ = task.reply.send(false);
            return rx;
        };
        match job_tx.try_send(task) {
            Ok(()) => {
                self.metrics.jobs_submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => {
                self.metrics.jobs_dropped.fetch_add(1, Ordering::Relaxed);
                let _ = task.reply.send(false);
            }
        }
        rx
    }

    /// Pool counters.
    pub fn metrics(&self) -> &VerifyPoolMetrics {
        &self.metrics
    }
}

impl Drop for VerifyPool {
    fn drop(&mut self) {
        // Disconnect the queue so workers drain and exit.
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_answers_submitted_jobs() {
        let pool = VerifyPool::new(VerifyPoolConfig::default().with_workers(2));
        let ok = pool.verify(|| true);
        let bad = pool.verify(|| false);
        assert!(ok.blocking_recv().unwrap());
        assert!(!bad.blocking_recv().unwrap());
        assert_eq!(pool.metrics().submitted(), 2);
    }

    #[test]
    fn full_queue_resolves_false() {
        // One worker stuck on a slow job, capacity 1: the third submission
        // finds the queue full.
        let pool = VerifyPool::new(VerifyPoolConfig::default().with_workers(1).with_queue_capacity(1));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let slow = pool.verify(move || {
            let _ = entered_tx.send(());
            let _ = gate_rx.recv();
            true
        });
        // Wait until the worker holds the slow job, then fill the queue.
        entered_rx.recv().unwrap();
        let queued = pool.verify(|| true);
        let overflow = pool.verify(|| true);
        assert!(!overflow.blocking_recv().unwrap());
        gate_tx.send(()).unwrap();
        assert!(slow.blocking_recv().unwrap());
        assert!(queued.blocking_recv().unwrap());
        assert_eq!(pool.metrics().dropped(), 1);
    }
}
