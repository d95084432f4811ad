// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared test transport.

#![allow(dead_code)]

use async_trait::async_trait;
use loki_shipper::encoder::EncodedPayload;
use loki_shipper::{DeliveryError, LabelSet, Transport};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

/// One push as seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub payload: EncodedPayload,
}

impl Call {
    /// Rendered lines of the pushed stream.
    pub fn lines(&self) -> Vec<String> {
        let body: serde_json::Value =
            serde_json::from_slice(&self.payload.body).expect("push body is JSON");
        body["streams"][0]["values"]
            .as_array()
            .expect("values array")
            .iter()
            .map(|value| value[1].as_str().expect("line").to_string())
            .collect()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.payload.labels
    }
}

/// Records every push and answers with scripted outcomes, then success.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Lines delivered for streams whose labels contain `key=value`, in push order.
    pub fn lines_for(&self, key: &str, value: &str) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|call| call.labels().get(key) == Some(value))
            .flat_map(Call::lines)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn push(&self, payload: &EncodedPayload) -> Result<usize, DeliveryError> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            payload: payload.clone(),
        });
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map(|()| payload.entries)
    }
}
