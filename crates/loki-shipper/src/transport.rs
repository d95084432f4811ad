// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery to the Loki push endpoint.
//!
//! Failures are classified per attempt:
//! - **Transient** (connect error, timeout, 5xx, 408, 429): retried with
//!   exponential backoff, `base * 2^(attempt - 1)` capped at `max_backoff`.
//! - **Permanent** (any other 4xx, including 401/403): reported as
//!   [`DeliveryError::RejectedByServer`] without retrying.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Credentials, ShipperConfig};
use crate::encoder::EncodedPayload;
use crate::errors::{ConfigError, DeliveryError};

const TENANT_HEADER: &str = "x-scope-orgid";
const MAX_ERROR_BODY_LEN: usize = 512;

/// Delivers encoded payloads. Returns the number of entries accepted.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, payload: &EncodedPayload) -> Result<usize, DeliveryError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn push(&self, payload: &EncodedPayload) -> Result<usize, DeliveryError> {
        (**self).push(payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// ```
    /// use loki_shipper::transport::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_retries: 5,
    ///     base: Duration::from_millis(100),
    ///     max_backoff: Duration::from_millis(350),
    /// };
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(350));
    /// ```
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_backoff)
    }
}

impl From<&ShipperConfig> for RetryPolicy {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.retry_backoff_base,
            max_backoff: config.max_backoff,
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

enum Attempt {
    Delivered,
    Transient(String),
    Permanent { status: u16, body: String },
}

/// [`Transport`] posting to a Loki server with `reqwest`.
pub struct LokiClient {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl LokiClient {
    pub fn new(config: &ShipperConfig) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(proxy) = config.https_proxy.as_deref() {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| ConfigError::HttpClient(format!("invalid proxy {proxy:?}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(tenant) = config.tenant_id.as_deref() {
            let value = HeaderValue::from_str(tenant)
                .map_err(|_| ConfigError::Invalid(format!("invalid tenant id {tenant:?}")))?;
            headers.insert(HeaderName::from_static(TENANT_HEADER), value);
        }

        Ok(Self {
            client,
            url: config.push_url(),
            headers,
            credentials: config.credentials.clone(),
            retry: RetryPolicy::from(config),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, payload: &EncodedPayload) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(payload.body.clone());
        if payload.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        match &self.credentials {
            Credentials::None => request,
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn attempt(&self, payload: &EncodedPayload) -> Attempt {
        let start = std::time::Instant::now();
        match self.request(payload).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(
                        "LOKI | Pushed {} entries for {} in {} ms",
                        payload.entries,
                        payload.labels,
                        start.elapsed().as_millis()
                    );
                    return Attempt::Delivered;
                }
                let mut body = response.text().await.unwrap_or_default();
                if body.len() > MAX_ERROR_BODY_LEN {
                    let mut end = MAX_ERROR_BODY_LEN;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    body.truncate(end);
                }
                if is_transient(status) {
                    Attempt::Transient(format!("status {status}: {}", body.trim()))
                } else {
                    Attempt::Permanent {
                        status: status.as_u16(),
                        body: body.trim().to_string(),
                    }
                }
            }
            Err(e) => Attempt::Transient(e.to_string()),
        }
    }
}

#[async_trait]
impl Transport for LokiClient {
    async fn push(&self, payload: &EncodedPayload) -> Result<usize, DeliveryError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(payload).await {
                Attempt::Delivered => return Ok(payload.entries),
                Attempt::Permanent { status, body } => {
                    return Err(DeliveryError::RejectedByServer { status, body });
                }
                Attempt::Transient(reason) => {
                    if attempts > self.retry.max_retries {
                        return Err(DeliveryError::DeliveryFailed { attempts, reason });
                    }
                    let backoff = self.retry.backoff(attempts);
                    warn!(
                        "LOKI | Push attempt {} failed: {}, retrying in {:?}",
                        attempts, reason, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for LokiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiClient")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
