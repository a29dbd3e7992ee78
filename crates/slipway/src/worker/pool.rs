use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::ArchiveError;
use crate::worker::job::{ArchiveJob, ArchiveStats};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    saved: AtomicUsize,
    failed: AtomicUsize,
    rejected: AtomicUsize,
}

/// Bounded queue of artifact writes drained by background threads.
///
/// Submitting never blocks the caller. [`ArchiveQueue::close`] stops intake,
/// lets the workers finish what is already queued and joins them.
pub struct ArchiveQueue {
    sender: Mutex<Option<Sender<ArchiveJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl ArchiveQueue {
    pub fn new(worker_count: usize, capacity: usize) -> Result<Self, ArchiveError> {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = bounded::<ArchiveJob>(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = receiver.clone();
            let worker_counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("archive-{}", worker_id))
                .spawn(move || run_worker(worker_id, rx, worker_counters))
                .map_err(|e| ArchiveError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} archive workers", worker_count);

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            counters,
        })
    }

    /// Queues a job without waiting for room.
    pub fn submit(&self, job: ArchiveJob) -> Result<(), ArchiveError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ArchiveError::ChannelClosed);
        }

        let guard = self.sender.lock().map_err(|_| ArchiveError::ChannelClosed)?;
        let sender = guard.as_ref().ok_or(ArchiveError::ChannelClosed)?;

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Archive queue full, dropping {} for operation '{}'",
                    job.hash, job.operation
                );
                Err(ArchiveError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(ArchiveError::ChannelClosed),
        }
    }

    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Stops intake, drains queued jobs and joins the workers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("Closing archive queue...");

        // Dropping the sender lets workers see a disconnect once the queue is empty.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Archive worker {} panicked: {:?}", i, e);
            } else {
                debug!("Archive worker {} finished", i);
            }
        }

        let stats = self.stats();
        info!(
            "Archive queue closed ({} saved, {} failed, {} rejected)",
            stats.saved, stats.failed, stats.rejected
        );
    }
}

impl Drop for ArchiveQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(worker_id: usize, receiver: Receiver<ArchiveJob>, counters: Arc<Counters>) {
    debug!("Archive worker {} started", worker_id);

    loop {
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(job) => {
                debug!(
                    "Archive worker {} saving {} bytes for {}/{}",
                    worker_id,
                    job.payload.len(),
                    job.hash,
                    job.operation
                );
                match job.sink.save(&job.hash, &job.operation, &job.payload) {
                    Ok(()) => {
                        counters.saved.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            "Unable to archive {} for operation '{}': {}",
                            job.hash, job.operation, e
                        );
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Archive worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Archive worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink::{ArtifactSink, MemorySinkProvider, SinkProvider};

    struct FailingSink;

    impl ArtifactSink for FailingSink {
        fn save(&self, _hash: &str, _operation: &str, _payload: &[u8]) -> Result<(), SinkError> {
            Err(SinkError::InvalidKey("refused".to_string()))
        }
    }

    /// Blocks every save until the gate is released.
    struct GatedSink {
        gate: Arc<Mutex<()>>,
    }

    impl ArtifactSink for GatedSink {
        fn save(&self, _hash: &str, _operation: &str, _payload: &[u8]) -> Result<(), SinkError> {
            let _guard = self.gate.lock().unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_close_drains_queued_jobs() {
        let provider = MemorySinkProvider::new("memory");
        let sink = provider.open("bucket").unwrap();
        let queue = ArchiveQueue::new(2, 16).unwrap();

        for i in 0..10 {
            let job = ArchiveJob::new(Arc::clone(&sink), format!("hash{}", i), "deploy", vec![1]);
            queue.submit(job).unwrap();
        }
        queue.close();

        assert_eq!(provider.saved().len(), 10);
        let stats = queue.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.saved, 10);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_sink_failures_are_counted() {
        let queue = ArchiveQueue::new(1, 4).unwrap();
        queue
            .submit(ArchiveJob::new(Arc::new(FailingSink), "abc", "deploy", vec![]))
            .unwrap();
        queue.close();

        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.stats().saved, 0);
    }

    #[test]
    fn test_submit_after_close_fails() {
        let queue = ArchiveQueue::new(1, 4).unwrap();
        queue.close();
        assert!(queue.is_closed());

        let sink = MemorySinkProvider::new("memory").open("b").unwrap();
        let err = queue.submit(ArchiveJob::new(sink, "abc", "op", vec![])).unwrap_err();
        assert!(matches!(err, ArchiveError::ChannelClosed));
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let sink: Arc<dyn ArtifactSink> = Arc::new(GatedSink {
            gate: Arc::clone(&gate),
        });
        let queue = ArchiveQueue::new(1, 1).unwrap();

        // One job occupies the worker, one fills the queue; keep submitting
        // until a rejection shows up.
        let mut rejected = false;
        for i in 0..10 {
            let job = ArchiveJob::new(Arc::clone(&sink), format!("h{}", i), "op", vec![]);
            if let Err(e) = queue.submit(job) {
                assert!(matches!(e, ArchiveError::QueueFull));
                rejected = true;
                break;
            }
        }
        assert!(rejected);
        assert!(queue.stats().rejected >= 1);

        drop(held);
        queue.close();
    }
}
