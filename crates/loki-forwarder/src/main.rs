// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use loki_shipper::record::SOURCE_CONTEXT_PROPERTY;
use loki_shipper::{ExceptionInfo, Level, LogRecord, Shipper, ShipperConfig};

const SOURCE_CONTEXT: &str = "LokiForwarder";

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOKI_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ShipperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading shipper config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shipper = match Shipper::connect(&config) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Error starting log shipper: {e}");
            return ExitCode::FAILURE;
        }
    };

    emit(&shipper, Level::Information, "Starting log forwarder");

    let outcome = forward(&shipper, io::stdin()).await;
    let code = match outcome {
        Ok(forwarded) => {
            debug!("Forwarded {forwarded} lines");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Log forwarder terminated unexpectedly: {e}");
            let record = LogRecord::builder(Level::Fatal, "Log forwarder terminated unexpectedly")
                .property(SOURCE_CONTEXT_PROPERTY, SOURCE_CONTEXT)
                .exception(ExceptionInfo::from_error(&*e))
                .build();
            if let Err(e) = shipper.emit_record_async(record).await {
                error!("Unable to ship fatal record: {e}");
            }
            ExitCode::FAILURE
        }
    };

    let report = shipper.close().await;
    match serde_json::to_string(&report) {
        Ok(json) => info!("Shipper closed: {json}"),
        Err(_) => info!("Shipper closed: {report:?}"),
    }
    code
}

/// Ships every input line until EOF or Ctrl-C and returns how many were
/// buffered. Lines refused by a full buffer are counted by the shipper and
/// skipped.
async fn forward<R: AsyncRead + Unpin>(
    shipper: &Shipper,
    input: R,
) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
    let mut lines = BufReader::new(input).lines();
    let mut forwarded = 0;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Reached end of input");
                    return Ok(forwarded);
                };
                if line.trim().is_empty() {
                    continue;
                }
                let (level, message) = detect_level(&line);
                let record = LogRecord::builder(level, message)
                    .property(SOURCE_CONTEXT_PROPERTY, SOURCE_CONTEXT)
                    .build();
                if let Err(e) = shipper.emit_record_async(record).await {
                    warn!("Skipping line: {e}");
                    continue;
                }
                forwarded += 1;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Received interrupt, shutting down");
                return Ok(forwarded);
            }
        }
    }
}

fn emit(shipper: &Shipper, level: Level, message: &str) {
    let record = LogRecord::builder(level, message)
        .property(SOURCE_CONTEXT_PROPERTY, SOURCE_CONTEXT)
        .build();
    if let Err(e) = shipper.emit_record(record) {
        error!("Unable to ship record: {e}");
    }
}

/// Picks a level from a leading `[WRN]`, `ERROR:` or `warn` style prefix.
///
/// Lines without a recognizable prefix are shipped whole as `Information`.
fn detect_level(line: &str) -> (Level, &str) {
    let trimmed = line.trim_start();
    let (first, rest) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    let token = first
        .trim_start_matches('[')
        .trim_end_matches(':')
        .trim_end_matches(']');
    match token.parse::<Level>() {
        Ok(level) if !rest.trim().is_empty() => (level, rest.trim_start()),
        _ => (Level::Information, line),
    }
}
