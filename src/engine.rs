//! Batching and flush orchestration
//!
//! The engine owns the batch being filled. Producers append through
//! [`FlushEngine::submit`]; a full batch is swapped for an empty one and
//! handed to the [`Dispatcher`] while the lock is still held, so every record
//! lands in exactly one batch. A timer task performs the same swap for
//! non-empty batches every flush interval. No network I/O happens under the
//! lock.

use crate::batch::Batch;
use crate::config::Config;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::errors::Result;
use crate::point::record_to_point;
use crate::provision::{HttpProvisioner, Provisioner, WorkflowSpec};
use crate::record::LogRecord;
use crate::transport::{HttpTransport, Transport};

use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct FlushEngine {
    current: Mutex<Batch>,
    dispatcher: Dispatcher,
    flush_interval: Duration,
    shutdown_timeout: Duration,
    shutdown: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl FlushEngine {
    /// Build an engine without a timer; flushes happen only on capacity or
    /// explicit calls. Must be called from within a tokio runtime.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current()?;

        Ok(Self {
            current: Mutex::new(Batch::new(config.max_batch_bytes)),
            dispatcher: Dispatcher::new(transport, config.max_in_flight, runtime),
            flush_interval: config.flush_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            shutdown: CancellationToken::new(),
            timer: Mutex::new(None),
        })
    }

    /// Validate `config`, provision remote resources, and start the flush timer
    ///
    /// Only missing credentials abort startup. A provisioning failure is
    /// logged and the engine starts anyway.
    #[instrument(skip_all, fields(workflow = %config.workflow_name))]
    pub async fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Arc<Self>> {
        let config = config.with_defaults();
        config.validate()?;

        if let Err(e) = provisioner.ensure(&WorkflowSpec::from(&config)).await {
            warn!("Provisioning failed, continuing with existing resources: {}", e);
        }

        let engine = Arc::new(Self::new(&config, transport)?);
        engine.spawn_timer();

        info!(
            "Flush engine started: repo {}, interval {}s, batch capacity {} bytes",
            config.pipeline_repo,
            engine.flush_interval.as_secs(),
            config.max_batch_bytes
        );
        Ok(engine)
    }

    /// Start an engine that talks HTTP to the configured endpoints
    pub async fn connect(config: Config) -> Result<Arc<Self>> {
        let config = config.with_defaults();
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        let provisioner = Arc::new(HttpProvisioner::from_config(&config)?);

        Self::start(config, transport, provisioner).await
    }

    fn spawn_timer(self: &Arc<Self>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(engine) = engine.upgrade() else { break };
                        engine.timer_flush();
                    }
                }
            }
            debug!("Flush timer stopped");
        });

        *self.timer.lock() = Some(handle);
    }

    /// Append a record, flushing the current batch first if it is full
    ///
    /// Never fails and never waits on the network.
    pub fn submit(&self, record: LogRecord) {
        let point = record_to_point(&record);

        let mut current = self.current.lock();
        if !current.can_add(&point) && !current.is_empty() {
            Self::flush_locked(&mut current, &self.dispatcher);
        }
        current.add(point);
        MutexGuard::unlock_fair(current);
    }

    /// Flush the current batch if it holds anything; returns whether it did
    pub fn timer_flush(&self) -> bool {
        let mut current = self.current.lock();
        let flushed = current.size() > 0;
        if flushed {
            Self::flush_locked(&mut current, &self.dispatcher);
        }
        MutexGuard::unlock_fair(current);
        flushed
    }

    /// Producer-driven flush, same semantics as the timer
    pub fn flush(&self) -> bool {
        self.timer_flush()
    }

    fn flush_locked(current: &mut Batch, dispatcher: &Dispatcher) {
        let batch = current.take();

        match batch.serialize() {
            Ok(payload) => {
                debug!("Flushing {} points ({} bytes)", batch.len(), batch.size());
                dispatcher.dispatch(payload, batch.len());
            }
            Err(e) => {
                error!("Dropping batch of {} points: {}", batch.len(), e);
            }
        }
    }

    /// Points waiting in the current batch
    pub fn pending(&self) -> usize {
        self.current.lock().len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.current.lock().size()
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Stop the timer, flush what is left, and wait briefly for in-flight sends
    ///
    /// Safe to call more than once. Records submitted afterwards are still
    /// batched but only flushed on capacity or an explicit [`Self::flush`].
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                error!("Flush timer ended abnormally: {}", e);
            }
        }

        self.timer_flush();

        let drained = self.dispatcher.drain(self.shutdown_timeout).await;
        let stats = self.dispatcher.stats();
        info!(
            "Flush engine stopped - batches sent: {}, failed: {}, points sent: {}, drained: {}",
            stats.sent, stats.failed, stats.points_sent, drained
        );
    }
}

impl Drop for FlushEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::RecordingTransport;
    use crate::errors::ProvisioningError;
    use crate::errors::TransportError;
    use crate::point::{FieldValue, Point};
    use crate::provision::NoopProvisioner;
    use crate::record::LogLevel;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, "test", message)
            .with_timestamp(1_000)
            .with_thread("main", None, None)
    }

    /// Capacity that fits exactly `n` records built by [`record`] with one-letter messages
    fn capacity_for(n: usize) -> usize {
        record_to_point(&record("A")).encoded_len() * n
    }

    fn config(max_batch_bytes: usize) -> Config {
        Config {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            max_batch_bytes,
            ..Config::default()
        }
    }

    fn messages(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| {
                line.split('\t')
                    .find_map(|f| f.strip_prefix("message="))
                    .map(str::to_string)
            })
            .collect()
    }

    async fn settle(engine: &FlushEngine) {
        assert!(engine.dispatcher.drain(Duration::from_secs(5)).await);
    }

    struct FailingProvisioner;

    #[async_trait]
    impl Provisioner for FailingProvisioner {
        async fn ensure(&self, _spec: &WorkflowSpec) -> std::result::Result<(), ProvisioningError> {
            Err(ProvisioningError {
                step: "create_workflow",
                source: TransportError::Other("unreachable".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_capacity_flush_scenario() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::new(&config(capacity_for(2)), transport.clone()).unwrap();

        engine.submit(record("A"));
        engine.submit(record("B"));
        engine.submit(record("C"));
        settle(&engine).await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec!["A", "B"]);
        assert_eq!(engine.pending(), 1);

        engine.submit(record("D"));
        settle(&engine).await;
        assert_eq!(transport.lines().len(), 1);
        assert_eq!(engine.pending(), 2);

        assert!(engine.timer_flush());
        settle(&engine).await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 2);
        assert_eq!(messages(&batches[1]), vec!["C", "D"]);
        assert_eq!(engine.pending(), 0);
        assert_eq!(engine.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_timer_flush_skips_empty_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::new(&config(capacity_for(2)), transport.clone()).unwrap();

        assert!(!engine.timer_flush());
        assert!(!engine.flush());
        settle(&engine).await;

        assert!(transport.payloads.lock().is_empty());
        assert_eq!(engine.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_oversized_record_is_shipped_alone() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::new(&config(1024 * 1024), transport.clone()).unwrap();

        let huge = "x".repeat(2 * 1024 * 1024);
        engine.submit(record(&huge));
        assert_eq!(engine.pending(), 1);

        engine.submit(record("after"));
        settle(&engine).await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec![huge]);
        assert_eq!(engine.pending(), 1);
    }

    #[tokio::test]
    async fn test_dispatched_batches_respect_capacity() {
        let transport = Arc::new(RecordingTransport::default());
        let capacity = capacity_for(3) + 10;
        let engine = FlushEngine::new(&config(capacity), transport.clone()).unwrap();

        for i in 0..50 {
            engine.submit(record(&"m".repeat(i % 7 + 1)));
        }
        engine.flush();
        settle(&engine).await;

        for payload in transport.payloads.lock().iter() {
            assert!(!payload.is_empty());
            assert!(payload.len() <= capacity);
        }
        assert_eq!(engine.stats().points_sent, 50);
    }

    #[tokio::test]
    async fn test_send_failures_do_not_reach_producers() {
        let transport = Arc::new(RecordingTransport::failing());
        let engine = FlushEngine::new(&config(capacity_for(1)), transport.clone()).unwrap();

        for i in 0..5 {
            engine.submit(record(&i.to_string()));
        }
        settle(&engine).await;

        assert_eq!(engine.stats().failed, 4);
        assert_eq!(engine.pending(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_loss_no_duplication_under_contention() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::new(&config(capacity_for(7)), transport.clone()).unwrap();

        std::thread::scope(|scope| {
            for p in 0..PRODUCERS {
                let engine = &engine;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        engine.submit(record(&format!("p{}-{}", p, i)));
                    }
                });
            }
            let engine = &engine;
            scope.spawn(move || {
                for _ in 0..200 {
                    engine.timer_flush();
                    std::thread::yield_now();
                }
            });
        });

        engine.flush();
        settle(&engine).await;

        // Batches may reach the transport out of order; within a batch each
        // producer's records must keep their submission order.
        let mut seen: HashMap<usize, Vec<usize>> = HashMap::new();
        for batch in transport.lines() {
            assert!(!batch.is_empty());
            let mut last: HashMap<usize, usize> = HashMap::new();
            for message in messages(&batch) {
                let (p, i) = message[1..].split_once('-').unwrap();
                let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
                if let Some(prev) = last.insert(p, i) {
                    assert!(prev < i, "producer {} out of order: {} then {}", p, prev, i);
                }
                seen.entry(p).or_default().push(i);
            }
        }

        assert_eq!(seen.len(), PRODUCERS);
        let expected: Vec<usize> = (0..PER_PRODUCER).collect();
        for sequence in seen.values_mut() {
            sequence.sort_unstable();
            assert_eq!(sequence, &expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_record_is_flushed_within_one_interval() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::start(
            config(capacity_for(100)),
            transport.clone(),
            Arc::new(NoopProvisioner),
        )
        .await
        .unwrap();

        engine.submit(record("lonely"));
        tokio::time::sleep(engine.flush_interval() + Duration::from_millis(10)).await;
        settle(&engine).await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec!["lonely"]);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_start_survives_provisioning_failure() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::start(
            config(capacity_for(10)),
            transport.clone(),
            Arc::new(FailingProvisioner),
        )
        .await
        .unwrap();

        engine.submit(record("still works"));
        assert_eq!(engine.pending(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_start_requires_credentials() {
        let result = FlushEngine::start(
            Config::default(),
            Arc::new(RecordingTransport::default()),
            Arc::new(NoopProvisioner),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_applies_default_interval() {
        let engine = FlushEngine::start(
            Config {
                flush_interval_secs: -5,
                ..config(capacity_for(10))
            },
            Arc::new(RecordingTransport::default()),
            Arc::new(NoopProvisioner),
        )
        .await
        .unwrap();

        assert_eq!(engine.flush_interval(), Duration::from_secs(5));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_records() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::start(
            config(capacity_for(10)),
            transport.clone(),
            Arc::new(NoopProvisioner),
        )
        .await
        .unwrap();

        engine.submit(record("A"));
        engine.submit(record("B"));
        engine.stop().await;
        engine.stop().await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_unencodable_batch_is_dropped_and_replaced() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = FlushEngine::new(&config(capacity_for(10)), transport.clone()).unwrap();

        {
            let mut current = engine.current.lock();
            current.add(record_to_point(&record("lost with the batch")));
            current.add(Point::from_fields(vec![(String::new(), FieldValue::Int(1))]));
            FlushEngine::flush_locked(&mut current, &engine.dispatcher);
            assert!(current.is_empty());
            assert_eq!(current.size(), 0);
            assert_eq!(current.max_bytes(), capacity_for(10));
        }
        settle(&engine).await;

        assert!(transport.payloads.lock().is_empty());
        assert_eq!(engine.stats().dispatched, 0);

        engine.submit(record("next"));
        assert!(engine.flush());
        settle(&engine).await;

        let batches = transport.lines();
        assert_eq!(batches.len(), 1);
        assert_eq!(messages(&batches[0]), vec!["next"]);
    }
}
