// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the shipper.
//!
//! Only [`ShipperError`] ever reaches a producer. Everything on the delivery
//! path is counted and dropped by the dispatcher.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::labels::LabelSet;

/// Errors surfaced synchronously to a producer calling `emit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShipperError {
    #[error("event buffer full ({capacity} records), gave up after {waited:?}")]
    Overflow { capacity: usize, waited: Duration },
}

/// A producer handed over a record older than one already batched for the
/// same label set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entry at {timestamp} is older than {newest} already accepted for stream {labels}")]
pub struct OutOfOrderEntry {
    pub labels: LabelSet,
    pub timestamp: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid label key {key:?}")]
    InvalidLabel { key: String },

    #[error("failed to serialize push payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress push payload: {0}")]
    Compress(#[from] std::io::Error),
}

/// Final outcome of a push that did not deliver its entries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery failed after {attempts} attempts: {reason}")]
    DeliveryFailed { attempts: u32, reason: String },

    #[error("rejected by server with status {status}: {body}")]
    RejectedByServer { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid output template: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed token starting at byte {0}")]
    UnclosedToken(usize),

    #[error("unexpected '}}' at byte {0}")]
    UnmatchedBrace(usize),

    #[error("invalid token {token:?} at byte {position}")]
    InvalidToken { token: String, position: usize },
}
