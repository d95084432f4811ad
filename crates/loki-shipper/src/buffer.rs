// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO of records waiting for the dispatcher.
//!
//! This is the only state shared between producers and the dispatch task.
//! Producers never wait on network I/O here; the one exception is the
//! [`OverflowPolicy::Block`] policy, where [`EventBuffer::try_enqueue`] parks
//! the calling thread and [`EventBuffer::enqueue`] suspends the calling task
//! until the dispatcher frees space or `block_timeout` elapses.
//!
//! Records built without an explicit timestamp are stamped while the queue
//! lock is held, so their timestamps never decrease in queue order.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Notify;
use tracing::debug;

use crate::config::OverflowPolicy;
use crate::errors::ShipperError;
use crate::record::LogRecord;
use crate::stats::{DropReason, ShipperStats};

#[derive(Debug, Default)]
struct Queue {
    records: VecDeque<LogRecord>,
    closed: bool,
    last_stamp: Option<DateTime<Utc>>,
}

/// Outcome of a single non-waiting attempt to add a record.
enum Offer {
    Accepted,
    Full(LogRecord),
}

#[derive(Debug)]
pub struct EventBuffer {
    queue: Mutex<Queue>,
    space_available: Condvar,
    space_freed: Notify,
    capacity: usize,
    high_water_mark: usize,
    policy: OverflowPolicy,
    block_timeout: Duration,
    wake: Arc<Notify>,
    stats: Arc<ShipperStats>,
}

impl EventBuffer {
    pub fn new(
        capacity: usize,
        high_water_mark: usize,
        policy: OverflowPolicy,
        block_timeout: Duration,
        stats: Arc<ShipperStats>,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue {
                records: VecDeque::with_capacity(capacity.min(4096)),
                ..Queue::default()
            }),
            space_available: Condvar::new(),
            space_freed: Notify::new(),
            capacity,
            high_water_mark: high_water_mark.clamp(1, capacity.max(1)),
            policy,
            block_timeout,
            wake: Arc::new(Notify::new()),
            stats,
        }
    }

    /// Signalled when the buffer becomes non-empty or reaches the high-water mark.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    // A producer panicking mid-push cannot leave the queue inconsistent, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a record, applying the overflow policy when full.
    ///
    /// Only the `Block` policy can fail, with [`ShipperError::Overflow`] once
    /// `block_timeout` has passed without space. Records offered after
    /// [`EventBuffer::close`] are counted as dropped and accepted silently.
    ///
    /// Under `Block` the calling thread is parked. On a multi-thread Tokio
    /// worker the wait runs inside `block_in_place`; tasks on a current-thread
    /// runtime must use [`EventBuffer::enqueue`] instead, since the dispatcher
    /// cannot run while their thread is parked.
    pub fn try_enqueue(&self, record: LogRecord) -> Result<(), ShipperError> {
        let mut queue = self.lock();
        if queue.closed {
            drop(queue);
            self.stats.record_dropped(DropReason::Closed, 1);
            return Ok(());
        }

        if queue.records.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    queue.records.pop_front();
                    self.stats.record_dropped(DropReason::Overflow, 1);
                    debug!(
                        "LOKI | Event buffer full ({} records), dropping oldest record",
                        self.capacity
                    );
                }
                OverflowPolicy::DropNewest => {
                    self.stats.record_dropped(DropReason::Overflow, 1);
                    debug!(
                        "LOKI | Event buffer full ({} records), dropping incoming record",
                        self.capacity
                    );
                    return Ok(());
                }
                OverflowPolicy::Block => {
                    let started = std::time::Instant::now();
                    queue = self.wait_for_space(queue);

                    if queue.closed {
                        drop(queue);
                        self.stats.record_dropped(DropReason::Closed, 1);
                        return Ok(());
                    }
                    if queue.records.len() >= self.capacity {
                        drop(queue);
                        return Err(self.overflow(started.elapsed()));
                    }
                }
            }
        }

        self.push_locked(queue, record);
        Ok(())
    }

    /// Adds a record, suspending the calling task instead of its thread
    /// while a `Block` buffer is full. Other policies behave exactly like
    /// [`EventBuffer::try_enqueue`].
    pub async fn enqueue(&self, mut record: LogRecord) -> Result<(), ShipperError> {
        if self.policy != OverflowPolicy::Block {
            return self.try_enqueue(record);
        }

        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + self.block_timeout;
        loop {
            let notified = self.space_freed.notified();
            tokio::pin!(notified);
            // Registered before checking so a drain in between is not missed.
            notified.as_mut().enable();

            match self.offer(record) {
                Offer::Accepted => return Ok(()),
                Offer::Full(returned) => record = returned,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.offer(record) {
                    Offer::Accepted => Ok(()),
                    Offer::Full(_) => Err(self.overflow(started.elapsed())),
                };
            }
        }
    }

    fn offer(&self, record: LogRecord) -> Offer {
        let queue = self.lock();
        if queue.closed {
            drop(queue);
            self.stats.record_dropped(DropReason::Closed, 1);
            return Offer::Accepted;
        }
        if queue.records.len() >= self.capacity {
            return Offer::Full(record);
        }
        self.push_locked(queue, record);
        Offer::Accepted
    }

    fn wait_for_space<'a>(&'a self, queue: MutexGuard<'a, Queue>) -> MutexGuard<'a, Queue> {
        let wait = move || {
            self.space_available
                .wait_timeout_while(queue, self.block_timeout, |q| {
                    !q.closed && q.records.len() >= self.capacity
                })
                .map_or_else(|e| e.into_inner().0, |(guard, _)| guard)
        };
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(wait)
            }
            _ => wait(),
        }
    }

    fn overflow(&self, waited: Duration) -> ShipperError {
        self.stats.record_dropped(DropReason::Overflow, 1);
        ShipperError::Overflow {
            capacity: self.capacity,
            waited,
        }
    }

    fn push_locked(&self, mut queue: MutexGuard<'_, Queue>, mut record: LogRecord) {
        if !record.has_explicit_timestamp() {
            let now = Utc::now();
            let stamp = queue.last_stamp.map_or(now, |last| last.max(now));
            queue.last_stamp = Some(stamp);
            record.stamp(stamp);
        }
        queue.records.push_back(record);
        let len = queue.records.len();
        drop(queue);

        self.stats.set_buffer_occupancy(len);
        if len == 1 || len == self.high_water_mark {
            self.wake.notify_one();
        }
    }

    fn notify_space(&self) {
        self.space_available.notify_all();
        self.space_freed.notify_waiters();
    }

    /// Removes up to `max` records from the front. Never blocks.
    pub fn drain_up_to(&self, max: usize) -> Vec<LogRecord> {
        let mut queue = self.lock();
        let n = max.min(queue.records.len());
        let drained: Vec<LogRecord> = queue.records.drain(..n).collect();
        let len = queue.records.len();
        drop(queue);

        self.stats.set_buffer_occupancy(len);
        if n > 0 {
            self.notify_space();
        }
        drained
    }

    /// Discards everything still buffered, returning how many records were removed.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let n = queue.records.len();
        queue.records.clear();
        drop(queue);

        self.stats.set_buffer_occupancy(0);
        self.notify_space();
        n
    }

    /// Stops accepting records and releases producers blocked on a full buffer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify_space();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
