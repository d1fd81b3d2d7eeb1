//! Fire-and-forget delivery of serialized batches
//!
//! [`Dispatcher::dispatch`] never waits on the network: it spawns the send on
//! the runtime captured at construction and returns. Sends may complete in any
//! order. Failures are logged and counted, never surfaced to the caller.

use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    /// Number of `drain` calls currently waiting on the tracker
    draining: Arc<Mutex<usize>>,
    counters: Arc<DispatchCounters>,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    points_sent: AtomicU64,
}

/// Snapshot of dispatch activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub sent: u64,
    pub failed: u64,
    pub points_sent: u64,
    pub in_flight: usize,
}

impl Dispatcher {
    /// `max_in_flight == 0` leaves concurrency unbounded
    pub fn new(transport: Arc<dyn Transport>, max_in_flight: usize, runtime: Handle) -> Self {
        Self {
            transport,
            runtime,
            permits: (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight))),
            tracker: TaskTracker::new(),
            draining: Arc::new(Mutex::new(0)),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Queue `payload` for delivery and return immediately
    pub fn dispatch(&self, payload: Vec<u8>, points: usize) {
        let batch_id = Uuid::new_v4();
        let transport = Arc::clone(&self.transport);
        let permits = self.permits.clone();
        let counters = Arc::clone(&self.counters);

        counters.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!("Dispatching batch {} ({} points, {} bytes)", batch_id, points, payload.len());

        self.tracker.spawn_on(
            async move {
                let _permit = match permits {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            error!("Dispatcher closed, dropping batch {}", batch_id);
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    },
                    None => None,
                };

                let start = Instant::now();
                match transport.send(payload).await {
                    Ok(ack) => {
                        counters.sent.fetch_add(1, Ordering::Relaxed);
                        counters.points_sent.fetch_add(points as u64, Ordering::Relaxed);
                        debug!(
                            "Batch {} accepted with status {} in {}ms",
                            batch_id,
                            ack.status,
                            start.elapsed().as_millis()
                        );
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Failed to send batch {} ({} points): {}", batch_id, points, e);
                    }
                }
            },
            &self.runtime,
        );
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            points_sent: self.counters.points_sent.load(Ordering::Relaxed),
            in_flight: self.tracker.len(),
        }
    }

    /// Wait for in-flight sends, giving up after `limit`
    ///
    /// Returns `true` when everything finished in time. Sends dispatched after
    /// the drain started are still waited on. Overlapping drains share one
    /// closed tracker; it reopens when the last of them returns.
    pub async fn drain(&self, limit: Duration) -> bool {
        {
            let mut draining = self.draining.lock();
            *draining += 1;
            self.tracker.close();
        }

        let drained = tokio::time::timeout(limit, self.tracker.wait()).await.is_ok();

        {
            let mut draining = self.draining.lock();
            *draining -= 1;
            if *draining == 0 {
                self.tracker.reopen();
            }
        }

        if !drained {
            warn!(
                "{} sends still in flight after {}ms, abandoning them",
                self.tracker.len(),
                limit.as_millis()
            );
        }
        drained
    }
}
