// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reliable, batching log shipper for the Grafana Loki push API.
//!
//! Producers hand [`LogRecord`]s to a cloneable [`Shipper`]. Records land in a
//! bounded buffer and a single background task groups them per label set,
//! renders each entry through an output template and pushes the batches with
//! retries. Delivery problems are counted and logged, never raised to
//! producers; only a full buffer under the `block` policy is.
//!
//! ```rust,no_run
//! use loki_shipper::{Level, LabelSet, Shipper, ShipperConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShipperConfig {
//!     endpoint_url: "http://localhost:3100".to_string(),
//!     labels: LabelSet::new().with("app", "SerilogSampleApps"),
//!     ..Default::default()
//! };
//! let shipper = Shipper::connect(&config)?;
//! shipper.emit(Level::Information, "User {User} logged in", [("User", "alice")], None)?;
//! let report = shipper.close().await;
//! assert_eq!(report.dropped_on_close, 0);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod buffer;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod filter;
pub mod labels;
pub mod record;
pub mod shipper;
pub mod stats;
pub mod template;
pub mod transport;

pub use config::{Credentials, OverflowPolicy, ShipperConfig};
pub use errors::{ConfigError, DeliveryError, EncodeError, OutOfOrderEntry, ShipperError};
pub use labels::LabelSet;
pub use record::{ExceptionInfo, Level, LogRecord, PropertyValue};
pub use shipper::{CloseReport, Dispatcher, FlushReport, Shipper, ShipperState};
pub use stats::{DropReason, StatsSnapshot};
pub use transport::{LokiClient, RetryPolicy, Transport};
