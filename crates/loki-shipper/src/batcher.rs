// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups records into per-stream batches.
//!
//! # Batching Strategy
//!
//! Each label set has at most one open batch. A batch is sealed when:
//! 1. **Size**: it holds `max_batch_size` entries (returned from [`Batcher::push`])
//! 2. **Age**: its first record is `max_batch_age` old ([`Batcher::take_expired`])
//! 3. **Flush**: the caller seals everything ([`Batcher::take_all`])
//!
//! # Ordering
//!
//! Loki rejects entries older than the newest one already accepted for a
//! stream. The batcher therefore remembers the newest timestamp per label set,
//! across sealed batches too, and refuses anything older with
//! [`OutOfOrderEntry`]. Records are never reordered.
//!
//! A stream with no open batch that has been idle for
//! `STREAM_RETENTION_FACTOR` batch ages is forgotten by
//! [`Batcher::take_expired`], so high-cardinality label sets do not
//! accumulate for the life of the process.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::OutOfOrderEntry;
use crate::labels::LabelSet;
use crate::record::LogRecord;

/// Idle streams are forgotten after this many `max_batch_age` periods.
pub const STREAM_RETENTION_FACTOR: u32 = 10;

#[derive(Debug)]
struct StreamState {
    newest: DateTime<Utc>,
    last_seen: Instant,
}

/// Sealed, timestamp-ascending entries for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub labels: LabelSet,
    pub entries: Vec<LogRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct OpenBatch {
    entries: Vec<LogRecord>,
    opened_at: Instant,
}

#[derive(Debug)]
pub struct Batcher {
    max_batch_size: usize,
    max_batch_age: Duration,
    open: HashMap<LabelSet, OpenBatch>,
    streams: HashMap<LabelSet, StreamState>,
}

impl Batcher {
    pub fn new(max_batch_size: usize, max_batch_age: Duration) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            max_batch_age,
            open: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    /// Appends a record to the open batch of its label set.
    ///
    /// Returns the sealed batch when this record fills it. A batch's age
    /// counts from when its first record was created, or from `now` if that
    /// is earlier.
    pub fn push(
        &mut self,
        record: LogRecord,
        now: Instant,
    ) -> Result<Option<Batch>, OutOfOrderEntry> {
        let labels = record.labels();
        let timestamp = record.timestamp();

        match self.streams.get_mut(labels) {
            Some(stream) if timestamp < stream.newest => {
                return Err(OutOfOrderEntry {
                    labels: labels.clone(),
                    timestamp,
                    newest: stream.newest,
                });
            }
            Some(stream) => {
                stream.newest = timestamp;
                stream.last_seen = now;
            }
            None => {
                self.streams.insert(
                    labels.clone(),
                    StreamState {
                        newest: timestamp,
                        last_seen: now,
                    },
                );
            }
        }

        let labels = labels.clone();
        let max_batch_size = self.max_batch_size;
        let batch = self
            .open
            .entry(labels.clone())
            .or_insert_with(|| OpenBatch {
                entries: Vec::with_capacity(max_batch_size.min(1024)),
                opened_at: record.instant().min(now),
            });
        batch.entries.push(record);

        if batch.entries.len() >= max_batch_size {
            return Ok(self.seal(&labels));
        }
        Ok(None)
    }

    /// Seals every batch whose age reached `max_batch_age`, oldest first,
    /// and forgets streams that have been idle past the retention window.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Batch> {
        self.forget_idle_streams(now);

        let mut expired: Vec<(Instant, LabelSet)> = self
            .open
            .iter()
            .filter(|(_, batch)| now.saturating_duration_since(batch.opened_at) >= self.max_batch_age)
            .map(|(labels, batch)| (batch.opened_at, labels.clone()))
            .collect();
        expired.sort_by_key(|(opened_at, _)| *opened_at);

        expired
            .into_iter()
            .filter_map(|(_, labels)| self.seal(&labels))
            .collect()
    }

    /// Seals every open batch, oldest first.
    pub fn take_all(&mut self) -> Vec<Batch> {
        let mut open: Vec<(LabelSet, OpenBatch)> = self.open.drain().collect();
        open.sort_by_key(|(_, batch)| batch.opened_at);
        open.into_iter()
            .map(|(labels, batch)| Batch {
                labels,
                entries: batch.entries,
            })
            .collect()
    }

    /// When the oldest open batch expires, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open
            .values()
            .map(|batch| batch.opened_at + self.max_batch_age)
            .min()
    }

    /// Label sets whose newest timestamp is still remembered.
    pub fn tracked_streams(&self) -> usize {
        self.streams.len()
    }

    fn forget_idle_streams(&mut self, now: Instant) {
        let retention = self.max_batch_age.saturating_mul(STREAM_RETENTION_FACTOR);
        let open = &self.open;
        self.streams.retain(|labels, stream| {
            open.contains_key(labels) || now.saturating_duration_since(stream.last_seen) < retention
        });
    }

    /// Records held in open batches.
    pub fn pending(&self) -> usize {
        self.open.values().map(|batch| batch.entries.len()).sum()
    }

    fn seal(&mut self, labels: &LabelSet) -> Option<Batch> {
        self.open.remove(labels).map(|batch| Batch {
            labels: labels.clone(),
            entries: batch.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(stream: &str, secs: i64) -> LogRecord {
        LogRecord::builder(Level::Information, format!("{stream}@{secs}"))
            .timestamp(ts(secs))
            .label("stream", stream)
            .build()
    }

    #[test]
    fn test_seals_on_size() {
        let mut batcher = Batcher::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert!(batcher.push(record("a", 0), now).unwrap().is_none());
        assert!(batcher.push(record("a", 1), now).unwrap().is_none());
        let batch = batcher.push(record("a", 2), now).unwrap().expect("sealed");

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.labels.get("stream"), Some("a"));
        assert_eq!(batcher.pending(), 0);
        assert!(batcher.next_deadline().is_none());
    }

    #[test]
    fn test_label_sets_batch_independently() {
        let mut batcher = Batcher::new(2, Duration::from_secs(60));
        let now = Instant::now();

        batcher.push(record("a", 0), now).unwrap();
        batcher.push(record("b", 0), now).unwrap();
        assert_eq!(batcher.pending(), 2);

        let batch = batcher.push(record("b", 1), now).unwrap().expect("sealed");
        assert_eq!(batch.labels.get("stream"), Some("b"));
        assert_eq!(batcher.pending(), 1);
    }

    #[test]
    fn test_rejects_out_of_order_across_sealed_batches() {
        let mut batcher = Batcher::new(1, Duration::from_secs(60));
        let now = Instant::now();

        batcher.push(record("a", 10), now).unwrap().expect("sealed");
        let error = batcher.push(record("a", 5), now).unwrap_err();
        assert_eq!(error.timestamp, ts(5));
        assert_eq!(error.newest, ts(10));

        // Equal timestamps are accepted, other streams are unaffected.
        assert!(batcher.push(record("a", 10), now).is_ok());
        assert!(batcher.push(record("b", 5), now).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_expired_and_deadline() {
        let mut batcher = Batcher::new(100, Duration::from_millis(1000));
        batcher.push(record("a", 0), Instant::now()).unwrap();
        let opened = Instant::now();

        tokio::time::advance(Duration::from_millis(400)).await;
        batcher.push(record("b", 0), Instant::now()).unwrap();

        assert_eq!(
            batcher.next_deadline(),
            Some(opened + Duration::from_millis(1000))
        );
        assert!(batcher.take_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;
        let expired = batcher.take_expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].labels.get("stream"), Some("a"));

        let rest = batcher.take_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].labels.get("stream"), Some("b"));
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_streams_are_forgotten() {
        let max_age = Duration::from_millis(100);
        let mut batcher = Batcher::new(100, max_age);

        for user in 0..1_000 {
            let record = LogRecord::builder(Level::Information, "login")
                .timestamp(ts(0))
                .label("user", user.to_string())
                .build();
            batcher.push(record, Instant::now()).unwrap();
        }
        assert_eq!(batcher.take_all().len(), 1_000);
        assert_eq!(batcher.tracked_streams(), 1_000);

        tokio::time::advance(max_age * (STREAM_RETENTION_FACTOR - 1)).await;
        batcher.push(record("a", 5), Instant::now()).unwrap();
        batcher.take_expired(Instant::now());
        assert_eq!(batcher.tracked_streams(), 1_001);

        tokio::time::advance(max_age).await;
        batcher.take_all();
        assert!(batcher.take_expired(Instant::now()).is_empty());
        assert_eq!(batcher.tracked_streams(), 1);

        // Still remembered, so ordering holds within the retention window.
        assert!(batcher.push(record("a", 4), Instant::now()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_with_open_batches_are_kept() {
        let max_age = Duration::from_millis(100);
        let mut batcher = Batcher::new(100, max_age);
        batcher.push(record("a", 0), Instant::now()).unwrap();

        tokio::time::advance(max_age * (STREAM_RETENTION_FACTOR + 1)).await;
        let now = Instant::now();
        batcher.forget_idle_streams(now);
        assert_eq!(batcher.tracked_streams(), 1);
        assert_eq!(batcher.take_expired(now).len(), 1);
    }

    proptest! {
        #[test]
        fn prop_entries_are_ascending_per_stream(
            max_batch_size in 1usize..6,
            events in proptest::collection::vec((0usize..3, 0i64..20), 0..100),
        ) {
            let streams = ["a", "b", "c"];
            let mut batcher = Batcher::new(max_batch_size, Duration::from_secs(60));
            let now = Instant::now();
            let mut sealed = Vec::new();
            let mut accepted = 0usize;

            for (stream, secs) in events {
                if let Ok(batch) = batcher.push(record(streams[stream], secs), now) {
                    accepted += 1;
                    sealed.extend(batch);
                }
            }
            sealed.extend(batcher.take_all());

            let mut delivered = 0usize;
            let mut newest: HashMap<LabelSet, DateTime<Utc>> = HashMap::new();
            for batch in &sealed {
                prop_assert!(batch.len() <= max_batch_size);
                for entry in &batch.entries {
                    prop_assert_eq!(entry.labels(), &batch.labels);
                    if let Some(previous) = newest.get(&batch.labels) {
                        prop_assert!(entry.timestamp() >= *previous);
                    }
                    newest.insert(batch.labels.clone(), entry.timestamp());
                    delivered += 1;
                }
            }
            prop_assert_eq!(accepted, delivered);
        }
    }
}
