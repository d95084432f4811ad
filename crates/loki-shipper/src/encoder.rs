// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a batch into a Loki push request body.
//!
//! ```json
//! {"streams":[{"stream":{"app":"api"},"values":[["1700000000000000000","line"]]}]}
//! ```
//!
//! Timestamps are Unix epoch nanoseconds as decimal strings; lines are the
//! record rendered through the output template with trailing line breaks
//! removed.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

use crate::batcher::Batch;
use crate::errors::EncodeError;
use crate::labels::LabelSet;
use crate::template::OutputTemplate;

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

#[derive(Serialize)]
struct Stream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: Vec<(String, String)>,
}

/// Request body ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub body: Vec<u8>,
    pub entries: usize,
    pub labels: LabelSet,
    /// Whether `body` is gzip-compressed.
    pub gzip: bool,
}

#[derive(Debug, Clone)]
pub struct LabelEncoder {
    template: OutputTemplate,
    use_gzip: bool,
}

impl LabelEncoder {
    pub fn new(template: OutputTemplate, use_gzip: bool) -> Self {
        Self { template, use_gzip }
    }

    pub fn encode(&self, batch: &Batch) -> Result<EncodedPayload, EncodeError> {
        if let Some(key) = batch.labels.first_invalid_key() {
            return Err(EncodeError::InvalidLabel {
                key: key.to_string(),
            });
        }

        let values = batch
            .entries
            .iter()
            .map(|record| {
                let line = self.template.render(record);
                (
                    unix_nanos(&record.timestamp()),
                    line.trim_end_matches(['\r', '\n']).to_string(),
                )
            })
            .collect();

        let request = PushRequest {
            streams: vec![Stream {
                stream: batch.labels.as_map(),
                values,
            }],
        };
        let json = serde_json::to_vec(&request)?;

        let (body, gzip) = if self.use_gzip {
            match compress(&json) {
                Ok(compressed) => (compressed, true),
                Err(e) => {
                    debug!("LOKI | Failed to compress payload, sending uncompressed: {}", e);
                    (json, false)
                }
            }
        } else {
            (json, false)
        };

        Ok(EncodedPayload {
            body,
            entries: batch.entries.len(),
            labels: batch.labels.clone(),
            gzip,
        })
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn unix_nanos(ts: &DateTime<Utc>) -> String {
    let nanos = i128::from(ts.timestamp()) * 1_000_000_000 + i128::from(ts.timestamp_subsec_nanos());
    nanos.to_string()
}
