// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observability counters.
//!
//! Counters are plain atomics updated from producers (emit, overflow) and from
//! the dispatch task (delivery). [`ShipperStats::snapshot`] gives a consistent
//! enough view for reporting; individual counters are never reset.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Why records were dropped without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DropReason {
    #[display("overflow")]
    Overflow,
    #[display("out_of_order")]
    OutOfOrder,
    #[display("invalid_label")]
    InvalidLabel,
    #[display("encode_failed")]
    EncodeFailed,
    #[display("delivery_failed")]
    DeliveryFailed,
    #[display("rejected_by_server")]
    RejectedByServer,
    #[display("dropped_on_close")]
    DroppedOnClose,
    /// Emitted after `close()` started.
    #[display("closed")]
    Closed,
}

/// Why a whole batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum FailureReason {
    #[display("invalid_label")]
    InvalidLabel,
    #[display("encode_error")]
    EncodeError,
    #[display("delivery_failed")]
    DeliveryFailed,
    #[display("rejected_by_server")]
    RejectedByServer,
}

#[derive(Debug, Default)]
pub struct ShipperStats {
    emitted: AtomicU64,
    filtered: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_out_of_order: AtomicU64,
    dropped_invalid_label: AtomicU64,
    dropped_encode_failed: AtomicU64,
    dropped_delivery_failed: AtomicU64,
    dropped_rejected_by_server: AtomicU64,
    dropped_on_close: AtomicU64,
    dropped_closed: AtomicU64,
    batches_pushed: AtomicU64,
    entries_delivered: AtomicU64,
    failed_invalid_label: AtomicU64,
    failed_encode: AtomicU64,
    failed_delivery: AtomicU64,
    failed_rejected: AtomicU64,
    buffer_occupancy: AtomicUsize,
}

impl ShipperStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, reason: DropReason, count: u64) {
        if count == 0 {
            return;
        }
        self.dropped_counter(reason).fetch_add(count, Ordering::Relaxed);
    }

    fn dropped_counter(&self, reason: DropReason) -> &AtomicU64 {
        match reason {
            DropReason::Overflow => &self.dropped_overflow,
            DropReason::OutOfOrder => &self.dropped_out_of_order,
            DropReason::InvalidLabel => &self.dropped_invalid_label,
            DropReason::EncodeFailed => &self.dropped_encode_failed,
            DropReason::DeliveryFailed => &self.dropped_delivery_failed,
            DropReason::RejectedByServer => &self.dropped_rejected_by_server,
            DropReason::DroppedOnClose => &self.dropped_on_close,
            DropReason::Closed => &self.dropped_closed,
        }
    }

    pub(crate) fn record_pushed(&self, entries: u64) {
        self.batches_pushed.fetch_add(1, Ordering::Relaxed);
        self.entries_delivered.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_failed(&self, reason: FailureReason) {
        let counter = match reason {
            FailureReason::InvalidLabel => &self.failed_invalid_label,
            FailureReason::EncodeError => &self.failed_encode,
            FailureReason::DeliveryFailed => &self.failed_delivery,
            FailureReason::RejectedByServer => &self.failed_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_buffer_occupancy(&self, occupancy: usize) {
        self.buffer_occupancy.store(occupancy, Ordering::Relaxed);
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped_counter(reason).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            emitted: load(&self.emitted),
            filtered: load(&self.filtered),
            dropped: DroppedCounts {
                overflow: load(&self.dropped_overflow),
                out_of_order: load(&self.dropped_out_of_order),
                invalid_label: load(&self.dropped_invalid_label),
                encode_failed: load(&self.dropped_encode_failed),
                delivery_failed: load(&self.dropped_delivery_failed),
                rejected_by_server: load(&self.dropped_rejected_by_server),
                dropped_on_close: load(&self.dropped_on_close),
                closed: load(&self.dropped_closed),
            },
            batches_pushed: load(&self.batches_pushed),
            entries_delivered: load(&self.entries_delivered),
            batches_failed: FailedCounts {
                invalid_label: load(&self.failed_invalid_label),
                encode_error: load(&self.failed_encode),
                delivery_failed: load(&self.failed_delivery),
                rejected_by_server: load(&self.failed_rejected),
            },
            buffer_occupancy: self.buffer_occupancy.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DroppedCounts {
    pub overflow: u64,
    pub out_of_order: u64,
    pub invalid_label: u64,
    pub encode_failed: u64,
    pub delivery_failed: u64,
    pub rejected_by_server: u64,
    pub dropped_on_close: u64,
    pub closed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailedCounts {
    pub invalid_label: u64,
    pub encode_error: u64,
    pub delivery_failed: u64,
    pub rejected_by_server: u64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub emitted: u64,
    pub filtered: u64,
    pub dropped: DroppedCounts,
    pub batches_pushed: u64,
    pub entries_delivered: u64,
    pub batches_failed: FailedCounts,
    pub buffer_occupancy: usize,
}

impl StatsSnapshot {
    pub fn total_dropped(&self) -> u64 {
        let d = &self.dropped;
        d.overflow
            + d.out_of_order
            + d.invalid_label
            + d.encode_failed
            + d.delivery_failed
            + d.rejected_by_server
            + d.dropped_on_close
            + d.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ShipperStats::new();
        stats.record_emitted();
        stats.record_emitted();
        stats.record_filtered();
        stats.record_dropped(DropReason::Overflow, 3);
        stats.record_dropped(DropReason::InvalidLabel, 1);
        stats.record_dropped(DropReason::Closed, 0);
        stats.record_pushed(10);
        stats.record_batch_failed(FailureReason::InvalidLabel);
        stats.set_buffer_occupancy(4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.emitted, 2);
        assert_eq!(snapshot.filtered, 1);
        assert_eq!(snapshot.dropped.overflow, 3);
        assert_eq!(snapshot.dropped.invalid_label, 1);
        assert_eq!(snapshot.batches_pushed, 1);
        assert_eq!(snapshot.entries_delivered, 10);
        assert_eq!(snapshot.batches_failed.invalid_label, 1);
        assert_eq!(snapshot.buffer_occupancy, 4);
        assert_eq!(snapshot.total_dropped(), 4);
        assert_eq!(stats.dropped(DropReason::Overflow), 3);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(DropReason::DroppedOnClose.to_string(), "dropped_on_close");
        assert_eq!(FailureReason::RejectedByServer.to_string(), "rejected_by_server");
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ShipperStats::new();
        stats.record_dropped(DropReason::RejectedByServer, 2);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["dropped"]["rejected_by_server"], 2);
        assert_eq!(json["batches_pushed"], 0);
    }
}
