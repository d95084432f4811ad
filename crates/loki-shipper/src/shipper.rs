// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer handle and background dispatcher.
//!
//! ```text
//!    ┌──────────────┐
//!    │   Shipper    │ (cloned into every producer)
//!    └──────┬───────┘
//!           │ emit            flush / close
//!           v                      │
//!    ┌──────────────┐              │ commands
//!    │ EventBuffer  │ ── wake ──┐  │
//!    └──────────────┘           v  v
//!                         ┌──────────────┐
//!                         │  Dispatcher  │ (single task)
//!                         └──────┬───────┘
//!                                │ Batcher → LabelEncoder → Transport
//! ```
//!
//! The dispatcher is the only consumer of the buffer and the only owner of
//! the batcher, so batching and delivery need no locking. It wakes when the
//! buffer becomes non-empty or reaches its high-water mark, when the oldest
//! open batch expires, and on every `flush_interval` tick.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::batcher::{Batch, Batcher};
use crate::buffer::EventBuffer;
use crate::config::ShipperConfig;
use crate::encoder::LabelEncoder;
use crate::errors::{ConfigError, DeliveryError, EncodeError, ShipperError};
use crate::filter::LevelFilter;
use crate::labels::LabelSet;
use crate::record::{ExceptionInfo, Level, LogRecord, PropertyValue, THREAD_ID_PROPERTY};
use crate::stats::{DropReason, FailureReason, ShipperStats, StatsSnapshot};
use crate::template::OutputTemplate;
use crate::transport::{LokiClient, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ShipperState {
    Open,
    Draining,
    Closed,
}

impl ShipperState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShipperState::Open,
            1 => ShipperState::Draining,
            _ => ShipperState::Closed,
        }
    }
}

/// Outcome of one or more dispatch cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub batches_pushed: usize,
    pub batches_failed: usize,
    pub entries_delivered: usize,
    pub entries_dropped: usize,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.batches_pushed += other.batches_pushed;
        self.batches_failed += other.batches_failed;
        self.entries_delivered += other.entries_delivered;
        self.entries_dropped += other.entries_dropped;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// What the final drain delivered or failed.
    pub flushed: FlushReport,
    /// Records still pending when the drain deadline passed.
    pub dropped_on_close: usize,
    pub stats: StatsSnapshot,
}

#[derive(Debug)]
enum Command {
    Flush(oneshot::Sender<FlushReport>),
    Close(oneshot::Sender<CloseReport>),
}

#[derive(Debug)]
struct Shared {
    buffer: EventBuffer,
    stats: Arc<ShipperStats>,
    state: AtomicU8,
    filter: LevelFilter,
    base_labels: LabelSet,
    properties_as_labels: Vec<String>,
    enrich_thread_id: bool,
    close_timeout: Duration,
}

impl Shared {
    fn state(&self) -> ShipperState {
        ShipperState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ShipperState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Upper bound on how long `close` waits for the dispatcher: the drain
/// deadline plus one push that exhausts every retry.
fn close_timeout(config: &ShipperConfig) -> Duration {
    let attempts = config.max_retries.saturating_add(1);
    let per_push = config
        .request_timeout
        .saturating_add(config.max_backoff)
        .saturating_mul(attempts);
    config
        .drain_deadline
        .saturating_add(per_push)
        .saturating_add(CLOSE_GRACE)
}

const CLOSE_GRACE: Duration = Duration::from_secs(1);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Cheap, cloneable producer handle.
#[derive(Debug, Clone)]
pub struct Shipper {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shipper {
    /// Builds a shipper and its dispatcher without starting anything.
    ///
    /// The caller decides where [`Dispatcher::run`] executes; records emitted
    /// before that are simply buffered. [`Shipper::flush`] resolves only once
    /// the dispatcher runs. [`Shipper::close`] gives up waiting for it after
    /// the drain deadline plus the worst case of one in-flight push, then
    /// discards whatever is still buffered.
    pub fn new<T: Transport>(
        config: &ShipperConfig,
        transport: T,
    ) -> Result<(Shipper, Dispatcher<T>), ConfigError> {
        config.validate()?;
        let template = OutputTemplate::parse(&config.output_template)?;

        let stats = Arc::new(ShipperStats::new());
        let buffer = EventBuffer::new(
            config.buffer_capacity,
            config.high_water_mark,
            config.overflow_policy,
            config.block_timeout,
            Arc::clone(&stats),
        );
        let wake = buffer.wake_handle();

        let shared = Arc::new(Shared {
            buffer,
            stats,
            state: AtomicU8::new(ShipperState::Open as u8),
            filter: config.level_filter(),
            base_labels: config.labels.clone(),
            properties_as_labels: config.properties_as_labels.clone(),
            enrich_thread_id: config.enrich_thread_id,
            close_timeout: close_timeout(config),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            commands: rx,
            wake,
            batcher: Batcher::new(config.max_batch_size, config.max_batch_age),
            encoder: LabelEncoder::new(template, config.use_gzip),
            transport,
            flush_interval: config.flush_interval,
            drain_deadline: config.drain_deadline,
        };

        Ok((
            Shipper {
                shared,
                commands: tx,
            },
            dispatcher,
        ))
    }

    /// Builds a shipper and spawns its dispatcher on the current Tokio runtime.
    pub fn spawn<T: Transport + 'static>(
        config: &ShipperConfig,
        transport: T,
    ) -> Result<Shipper, ConfigError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigError::Invalid(format!("no Tokio runtime available: {e}")))?;
        let (shipper, dispatcher) = Shipper::new(config, transport)?;
        runtime.spawn(dispatcher.run());
        Ok(shipper)
    }

    /// Spawns a shipper pushing to the Loki server described by `config`.
    pub fn connect(config: &ShipperConfig) -> Result<Shipper, ConfigError> {
        let client = LokiClient::new(config)?;
        debug!("LOKI | Shipping logs to {}", client.url());
        Shipper::spawn(config, client)
    }

    /// Emits a record built from its parts.
    ///
    /// Under [`OverflowPolicy::Block`](crate::config::OverflowPolicy::Block)
    /// this may park the calling thread for up to `block_timeout`; every other
    /// policy returns immediately.
    pub fn emit<I, K, V>(
        &self,
        level: Level,
        message: impl Into<String>,
        properties: I,
        exception: Option<ExceptionInfo>,
    ) -> Result<(), ShipperError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let mut builder = LogRecord::builder(level, message).properties(properties);
        if let Some(exception) = exception {
            builder = builder.exception(exception);
        }
        self.emit_record(builder.build())
    }

    /// Emits a record without properties.
    pub fn log(&self, level: Level, message: impl Into<String>) -> Result<(), ShipperError> {
        self.emit(level, message, std::iter::empty::<(String, PropertyValue)>(), None)
    }

    /// Emits a prepared record.
    ///
    /// Under `Block` this parks the calling thread; tasks on a current-thread
    /// runtime should use [`Shipper::emit_record_async`] so the dispatcher can
    /// free space meanwhile.
    pub fn emit_record(&self, record: LogRecord) -> Result<(), ShipperError> {
        match self.prepare(record) {
            Some(record) => self.shared.buffer.try_enqueue(record),
            None => Ok(()),
        }
    }

    /// Like [`Shipper::emit_record`], but waits for buffer space by
    /// suspending the calling task rather than its thread.
    pub async fn emit_record_async(&self, record: LogRecord) -> Result<(), ShipperError> {
        match self.prepare(record) {
            Some(record) => self.shared.buffer.enqueue(record).await,
            None => Ok(()),
        }
    }

    /// Applies the state check, level filter and enrichment. Returns `None`
    /// when the record was counted and should not be buffered.
    fn prepare(&self, mut record: LogRecord) -> Option<LogRecord> {
        let shared = &self.shared;
        if shared.state() != ShipperState::Open {
            shared.stats.record_dropped(DropReason::Closed, 1);
            return None;
        }
        if !shared
            .filter
            .is_enabled(record.level(), record.source_context())
        {
            shared.stats.record_filtered();
            return None;
        }
        shared.stats.record_emitted();

        if shared.enrich_thread_id {
            record.enrich(THREAD_ID_PROPERTY, PropertyValue::U64(current_thread_id()));
        }

        let mut labels = shared.base_labels.merged(record.labels());
        for key in &shared.properties_as_labels {
            if let Some(value) = record.property(key) {
                labels.insert(key.as_str(), value.to_string());
            }
        }
        record.set_labels(labels);
        Some(record)
    }

    /// Pushes everything buffered or batched so far, sealing all open batches.
    ///
    /// Resolves once every sealed batch is delivered or has finally failed.
    pub async fn flush(&self) -> FlushReport {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(tx)).is_err() {
            return FlushReport::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops accepting records and drains what is pending.
    ///
    /// Draining ends when the buffer is empty or `drain_deadline` has passed;
    /// whatever remains is counted as dropped on close. Never fails, and
    /// calling it again after the shipper closed only returns the counters.
    /// If the dispatcher does not answer within the drain deadline plus one
    /// fully retried push, the buffer is discarded without it.
    pub async fn close(&self) -> CloseReport {
        let shared = &self.shared;
        let opened = shared
            .state
            .compare_exchange(
                ShipperState::Open as u8,
                ShipperState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        shared.buffer.close();

        let (tx, rx) = oneshot::channel();
        if !opened || self.commands.send(Command::Close(tx)).is_err() {
            return CloseReport {
                stats: self.stats(),
                ..CloseReport::default()
            };
        }
        match tokio::time::timeout(shared.close_timeout, rx).await {
            Ok(Ok(report)) => report,
            Ok(Err(_)) => CloseReport {
                stats: self.stats(),
                ..CloseReport::default()
            },
            Err(_) => {
                let leftover = shared.buffer.clear();
                shared
                    .stats
                    .record_dropped(DropReason::DroppedOnClose, leftover as u64);
                shared.set_state(ShipperState::Closed);
                warn!(
                    "LOKI | Dispatcher did not finish within {:?}, dropped {} buffered records",
                    shared.close_timeout, leftover
                );
                CloseReport {
                    dropped_on_close: leftover,
                    stats: self.stats(),
                    ..CloseReport::default()
                }
            }
        }
    }

    pub fn state(&self) -> ShipperState {
        self.shared.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.shared.stats.snapshot();
        snapshot.buffer_occupancy = self.shared.buffer.len();
        snapshot
    }
}

/// The single background task moving records from the buffer to the server.
pub struct Dispatcher<T> {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    wake: Arc<Notify>,
    batcher: Batcher,
    encoder: LabelEncoder,
    transport: T,
    flush_interval: Duration,
    drain_deadline: Duration,
}

impl<T: Transport> Dispatcher<T> {
    /// Runs until the shipper is closed or every handle is dropped.
    pub async fn run(mut self) {
        debug!("LOKI | Dispatcher started");
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            let deadline = self.batcher.next_deadline();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Flush(reply)) => {
                        let report = self.cycle(true).await;
                        let _ = reply.send(report);
                    }
                    Some(Command::Close(reply)) => {
                        let report = self.shutdown().await;
                        let _ = reply.send(report);
                        break;
                    }
                    None => {
                        debug!("LOKI | All shipper handles dropped, draining");
                        self.shutdown().await;
                        break;
                    }
                },
                () = self.wake.notified() => {
                    self.cycle(false).await;
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.cycle(false).await;
                }
                _ = ticker.tick() => {
                    self.cycle(false).await;
                }
            }
        }
        debug!("LOKI | Dispatcher stopped");
    }

    /// Moves buffered records into the batcher and ships whatever is sealed.
    /// With `seal_all`, every open batch is shipped regardless of age.
    async fn cycle(&mut self, seal_all: bool) -> FlushReport {
        let mut report = FlushReport::default();
        let buffer = &self.shared.buffer;
        let records = buffer.drain_up_to(buffer.capacity());

        let now = Instant::now();
        for record in records {
            match self.batcher.push(record, now) {
                Ok(Some(batch)) => self.ship(batch, &mut report).await,
                Ok(None) => {}
                Err(e) => {
                    self.shared.stats.record_dropped(DropReason::OutOfOrder, 1);
                    report.entries_dropped += 1;
                    warn!("LOKI | Dropping out-of-order entry: {}", e);
                }
            }
        }

        let sealed = if seal_all {
            self.batcher.take_all()
        } else {
            self.batcher.take_expired(Instant::now())
        };
        for batch in sealed {
            self.ship(batch, &mut report).await;
        }
        report
    }

    async fn ship(&self, batch: Batch, report: &mut FlushReport) {
        let stats = &self.shared.stats;
        let entries = batch.len();
        let count = entries as u64;

        let payload = match self.encoder.encode(&batch) {
            Ok(payload) => payload,
            Err(EncodeError::InvalidLabel { key }) => {
                error!(
                    "LOKI | Dropping {} entries for stream {}: invalid label key {:?}",
                    entries, batch.labels, key
                );
                stats.record_dropped(DropReason::InvalidLabel, count);
                stats.record_batch_failed(FailureReason::InvalidLabel);
                report.batches_failed += 1;
                report.entries_dropped += entries;
                return;
            }
            Err(e) => {
                error!("LOKI | Dropping {} entries for stream {}: {}", entries, batch.labels, e);
                stats.record_dropped(DropReason::EncodeFailed, count);
                stats.record_batch_failed(FailureReason::EncodeError);
                report.batches_failed += 1;
                report.entries_dropped += entries;
                return;
            }
        };

        match self.transport.push(&payload).await {
            Ok(delivered) => {
                stats.record_pushed(delivered as u64);
                report.batches_pushed += 1;
                report.entries_delivered += delivered;
            }
            Err(e) => {
                error!("LOKI | Dropping {} entries for stream {}: {}", entries, batch.labels, e);
                let (drop_reason, failure_reason) = match e {
                    DeliveryError::RejectedByServer { .. } => {
                        (DropReason::RejectedByServer, FailureReason::RejectedByServer)
                    }
                    DeliveryError::DeliveryFailed { .. } => {
                        (DropReason::DeliveryFailed, FailureReason::DeliveryFailed)
                    }
                };
                stats.record_dropped(drop_reason, count);
                stats.record_batch_failed(failure_reason);
                report.batches_failed += 1;
                report.entries_dropped += entries;
            }
        }
    }

    /// Drains until the buffer is empty or the drain deadline has passed,
    /// then discards whatever is left. Cycles already started are never cut
    /// short; the deadline is checked between them.
    async fn shutdown(&mut self) -> CloseReport {
        self.shared.set_state(ShipperState::Draining);
        self.shared.buffer.close();

        let deadline = Instant::now() + self.drain_deadline;
        let mut flushed = FlushReport::default();
        while Instant::now() < deadline {
            flushed.merge(self.cycle(true).await);
            if self.shared.buffer.is_empty() {
                break;
            }
        }

        let leftover = self.shared.buffer.clear()
            + self
                .batcher
                .take_all()
                .iter()
                .map(Batch::len)
                .sum::<usize>();
        if leftover > 0 {
            self.shared
                .stats
                .record_dropped(DropReason::DroppedOnClose, leftover as u64);
            warn!(
                "LOKI | Drain deadline of {:?} passed, dropped {} undelivered records",
                self.drain_deadline, leftover
            );
        }

        self.shared.set_state(ShipperState::Closed);
        let mut stats = self.shared.stats.snapshot();
        stats.buffer_occupancy = 0;
        CloseReport {
            flushed,
            dropped_on_close: leftover,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::encoder::EncodedPayload;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recording {
        payloads: Mutex<Vec<EncodedPayload>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn push(&self, payload: &EncodedPayload) -> Result<usize, DeliveryError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(payload.entries)
        }
    }

    fn config() -> ShipperConfig {
        ShipperConfig {
            labels: LabelSet::new().with("app", "test"),
            output_template: "{Message}".to_string(),
            flush_interval: Duration::from_secs(60),
            max_batch_age: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_filtered_records_are_counted_not_buffered() {
        let config = ShipperConfig {
            level_overrides: vec![("Microsoft".to_string(), Level::Information)],
            ..config()
        };
        let (shipper, _dispatcher) = Shipper::new(&config, Recording::default()).unwrap();

        let record = LogRecord::builder(Level::Debug, "noise")
            .property("SourceContext", "Microsoft.Hosting")
            .build();
        shipper.emit_record(record).unwrap();
        shipper.log(Level::Debug, "kept").unwrap();

        let stats = shipper.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.buffer_occupancy, 1);
    }

    #[tokio::test]
    async fn test_emit_enriches_and_merges_labels() {
        let config = ShipperConfig {
            properties_as_labels: vec!["Level".to_string()],
            ..config()
        };
        let transport = Arc::new(Recording::default());
        let shipper = Shipper::spawn(&config, Arc::clone(&transport)).unwrap();

        let record = LogRecord::builder(Level::Warning, "disk almost full")
            .property("Level", "Warning")
            .label("host", "db1")
            .build();
        shipper.emit_record(record).unwrap();
        let report = shipper.flush().await;
        assert_eq!(report.entries_delivered, 1);

        let payloads = transport.payloads.lock().unwrap();
        let labels = &payloads[0].labels;
        assert_eq!(labels.get("app"), Some("test"));
        assert_eq!(labels.get("host"), Some("db1"));
        assert_eq!(labels.get("Level"), Some("Warning"));
    }

    #[tokio::test]
    async fn test_thread_id_is_added_unless_present() {
        let (shipper, dispatcher) = Shipper::new(&config(), Recording::default()).unwrap();
        shipper.log(Level::Information, "a").unwrap();
        shipper
            .emit(Level::Information, "b", [("ThreadId", 42)], None)
            .unwrap();

        let records = dispatcher.shared.buffer.drain_up_to(10);
        assert_eq!(
            records[0].property(THREAD_ID_PROPERTY),
            Some(&PropertyValue::U64(current_thread_id()))
        );
        assert_eq!(
            records[1].property(THREAD_ID_PROPERTY),
            Some(&PropertyValue::I64(42))
        );
    }

    #[tokio::test]
    async fn test_emit_after_close_is_counted() {
        let shipper = Shipper::spawn(&config(), Recording::default()).unwrap();
        let report = shipper.close().await;
        assert_eq!(report.dropped_on_close, 0);
        assert_eq!(shipper.state(), ShipperState::Closed);

        assert!(shipper.log(Level::Information, "late").is_ok());
        assert_eq!(shipper.stats().dropped.closed, 1);

        // Closing twice is harmless.
        let again = shipper.close().await;
        assert_eq!(again.dropped_on_close, 0);
        assert_eq!(shipper.flush().await, FlushReport::default());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_warns_once_about_dropped_records() {
        let config = ShipperConfig {
            drain_deadline: Duration::ZERO,
            ..config()
        };
        let (shipper, dispatcher) = Shipper::new(&config, Recording::default()).unwrap();
        for n in 0..3 {
            shipper.log(Level::Information, format!("record {n}")).unwrap();
        }
        tokio::spawn(dispatcher.run());

        let report = shipper.close().await;
        assert_eq!(report.dropped_on_close, 3);
        assert_eq!(report.stats.dropped.dropped_on_close, 3);
        assert!(logs_contain("dropped 3 undelivered records"));
    }

    #[tokio::test]
    async fn test_block_overflow_reaches_producer() {
        let config = ShipperConfig {
            buffer_capacity: 1,
            high_water_mark: 1,
            overflow_policy: OverflowPolicy::Block,
            block_timeout: Duration::from_millis(10),
            ..config()
        };
        let (shipper, _dispatcher) = Shipper::new(&config, Recording::default()).unwrap();
        shipper.log(Level::Information, "fits").unwrap();
        assert!(matches!(
            shipper.log(Level::Information, "does not fit"),
            Err(ShipperError::Overflow { capacity: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_async_emit_lets_dispatcher_free_space() {
        let config = ShipperConfig {
            buffer_capacity: 1,
            high_water_mark: 1,
            overflow_policy: OverflowPolicy::Block,
            block_timeout: Duration::from_secs(2),
            ..config()
        };
        let transport = Arc::new(Recording::default());
        let shipper = Shipper::spawn(&config, Arc::clone(&transport)).unwrap();

        for n in 0..3 {
            let record = LogRecord::builder(Level::Information, format!("record {n}")).build();
            shipper.emit_record_async(record).await.unwrap();
        }
        let report = shipper.close().await;

        assert_eq!(report.stats.dropped.overflow, 0);
        assert_eq!(report.stats.entries_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_when_dispatcher_never_runs() {
        let (shipper, _dispatcher) = Shipper::new(&config(), Recording::default()).unwrap();
        shipper.log(Level::Information, "a").unwrap();
        shipper.log(Level::Information, "b").unwrap();

        let report = shipper.close().await;
        assert_eq!(report.dropped_on_close, 2);
        assert_eq!(report.stats.dropped.dropped_on_close, 2);
        assert_eq!(shipper.state(), ShipperState::Closed);
    }

    #[test]
    fn test_close_timeout_covers_drain_and_one_push() {
        let config = ShipperConfig {
            drain_deadline: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            max_backoff: Duration::from_secs(1),
            max_retries: 2,
            ..config()
        };
        assert_eq!(close_timeout(&config), Duration::from_secs(5 + 3 * 3 + 1));
    }

    #[test]
    fn test_spawn_requires_runtime() {
        assert!(Shipper::spawn(&config(), Recording::default()).is_err());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ShipperConfig {
            max_batch_size: 0,
            ..config()
        };
        assert!(Shipper::new(&config, Recording::default()).is_err());
    }
}
