// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records as handed over by producers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

use crate::errors::ConfigError;
use crate::labels::LabelSet;

/// Property carrying the logger category used by level overrides.
pub const SOURCE_CONTEXT_PROPERTY: &str = "SourceContext";

/// Property added by thread-id enrichment.
pub const THREAD_ID_PROPERTY: &str = "ThreadId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Verbose,
        Level::Debug,
        Level::Information,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" | "vrb" => Ok(Level::Verbose),
            "debug" | "dbg" => Ok(Level::Debug),
            "information" | "info" | "inf" => Ok(Level::Information),
            "warning" | "warn" | "wrn" => Ok(Level::Warning),
            "error" | "err" => Ok(Level::Error),
            "fatal" | "critical" | "ftl" => Ok(Level::Fatal),
            other => Err(ConfigError::Invalid(format!("unknown log level {other:?}"))),
        }
    }
}

/// Scalar value attached to a record under a property name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Plain rendering: strings are written without quotes, null as `null`.
impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::I64(v) => write!(f, "{v}"),
            PropertyValue::U64(v) => write!(f, "{v}"),
            PropertyValue::F64(v) => write!(f, "{v}"),
            PropertyValue::String(v) => f.write_str(v),
        }
    }
}

macro_rules! property_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    PropertyValue::$variant(value.into())
                }
            }
        )*
    };
}

property_from! {
    bool => Bool,
    i32 => I64,
    i64 => I64,
    u32 => U64,
    u64 => U64,
    f64 => F64,
    String => String,
    &str => String,
}

impl From<usize> for PropertyValue {
    fn from(value: usize) -> Self {
        PropertyValue::U64(value as u64)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

/// Structured error trace attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    pub stack_trace: Vec<String>,
    pub inner: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: Vec::new(),
            inner: None,
        }
    }

    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack_trace.push(frame.into());
        self
    }

    #[must_use]
    pub fn with_inner(mut self, inner: ExceptionInfo) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Builds a trace from an error and its `source()` chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let kind = short_type_name(error);
        let mut info = ExceptionInfo::new(kind, error.to_string());
        if let Some(source) = error.source() {
            info.inner = Some(Box::new(ExceptionInfo::from_error(source)));
        }
        info
    }
}

fn short_type_name(error: &(dyn std::error::Error + 'static)) -> String {
    // Debug output starts with the type or variant name for derived impls.
    let debug = format!("{error:?}");
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(debug.len());
    if end == 0 {
        "Error".to_string()
    } else {
        debug[..end].to_string()
    }
}

/// `Kind: message ---> Inner: message` followed by the stack frames, inner
/// frames first.
impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " ---> {inner}")?;
            write!(f, "\n   --- End of inner exception stack trace ---")?;
        }
        for frame in &self.stack_trace {
            write!(f, "\n   at {frame}")?;
        }
        Ok(())
    }
}

/// A single log event.
///
/// Records are immutable once built; the shipper only ever consumes them.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    explicit_timestamp: bool,
    instant: Instant,
    level: Level,
    message_template: String,
    exception: Option<ExceptionInfo>,
    properties: BTreeMap<String, PropertyValue>,
    labels: LabelSet,
}

impl LogRecord {
    pub fn builder(level: Level, message_template: impl Into<String>) -> LogRecordBuilder {
        LogRecordBuilder {
            timestamp: None,
            level,
            message_template: message_template.into(),
            exception: None,
            properties: BTreeMap::new(),
            labels: LabelSet::new(),
        }
    }

    /// Wall-clock time, as sent to the server.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Monotonic creation time, used for batch ageing.
    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Labels specific to this record, layered over the shipper's base set.
    /// Once accepted by a shipper this is the full label set of its stream.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn source_context(&self) -> Option<&str> {
        self.property(SOURCE_CONTEXT_PROPERTY)
            .and_then(PropertyValue::as_str)
    }

    /// Whether the producer chose the timestamp. Records without one are
    /// re-stamped when they enter the event buffer.
    pub fn has_explicit_timestamp(&self) -> bool {
        self.explicit_timestamp
    }

    pub(crate) fn stamp(&mut self, timestamp: DateTime<Utc>) {
        if !self.explicit_timestamp {
            self.timestamp = timestamp;
        }
    }

    pub(crate) fn set_labels(&mut self, labels: LabelSet) {
        self.labels = labels;
    }

    /// Adds a property unless one with the same name is already present.
    pub(crate) fn enrich(&mut self, name: &str, value: PropertyValue) {
        if !self.properties.contains_key(name) {
            self.properties.insert(name.to_string(), value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecordBuilder {
    timestamp: Option<DateTime<Utc>>,
    level: Level,
    message_template: String,
    exception: Option<ExceptionInfo>,
    properties: BTreeMap<String, PropertyValue>,
    labels: LabelSet,
}

impl LogRecordBuilder {
    /// Overrides the wall-clock timestamp (defaults to now).
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    pub fn build(self) -> LogRecord {
        LogRecord {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            explicit_timestamp: self.timestamp.is_some(),
            instant: Instant::now(),
            level: self.level,
            message_template: self.message_template,
            exception: self.exception,
            properties: self.properties,
            labels: self.labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Information);
        assert_eq!("Information".parse::<Level>().unwrap(), Level::Information);
        assert_eq!(" WARN ".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("trace".parse::<Level>().unwrap(), Level::Verbose);
        assert_eq!("critical".parse::<Level>().unwrap(), Level::Fatal);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Verbose < Level::Debug);
        assert!(Level::Error < Level::Fatal);
        let mut sorted = Level::ALL;
        sorted.sort();
        assert_eq!(sorted, Level::ALL);
    }

    #[test]
    fn test_builder() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = LogRecord::builder(Level::Warning, "Disk {Disk} at {Pct}%")
            .timestamp(ts)
            .property("Disk", "sda")
            .property("Pct", 93)
            .property(SOURCE_CONTEXT_PROPERTY, "Storage.Monitor")
            .label("host", "db1")
            .build();

        assert_eq!(record.timestamp(), ts);
        assert_eq!(record.level(), Level::Warning);
        assert_eq!(record.property("Pct"), Some(&PropertyValue::I64(93)));
        assert_eq!(record.source_context(), Some("Storage.Monitor"));
        assert_eq!(record.labels().get("host"), Some("db1"));
        assert!(record.exception().is_none());
    }

    #[test]
    fn test_stamp_only_replaces_implicit_timestamps() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let later = ts + chrono::Duration::seconds(5);

        let mut implicit = LogRecord::builder(Level::Information, "x").build();
        assert!(!implicit.has_explicit_timestamp());
        implicit.stamp(later);
        assert_eq!(implicit.timestamp(), later);

        let mut explicit = LogRecord::builder(Level::Information, "x")
            .timestamp(ts)
            .build();
        assert!(explicit.has_explicit_timestamp());
        explicit.stamp(later);
        assert_eq!(explicit.timestamp(), ts);
    }

    #[test]
    fn test_enrich_does_not_overwrite() {
        let mut record = LogRecord::builder(Level::Information, "x")
            .property(THREAD_ID_PROPERTY, 7)
            .build();
        record.enrich(THREAD_ID_PROPERTY, PropertyValue::from(1));
        record.enrich("Extra", PropertyValue::from("y"));

        assert_eq!(record.property(THREAD_ID_PROPERTY), Some(&PropertyValue::I64(7)));
        assert_eq!(record.property("Extra"), Some(&PropertyValue::from("y")));
    }

    #[test]
    fn test_exception_display() {
        let inner = ExceptionInfo::new("IOException", "connection reset").with_frame("Socket.Read()");
        let outer = ExceptionInfo::new("HostException", "host terminated")
            .with_frame("Program.Main()")
            .with_inner(inner);

        assert_eq!(
            outer.to_string(),
            "HostException: host terminated ---> IOException: connection reset\n   at Socket.Read()\n   --- End of inner exception stack trace ---\n   at Program.Main()"
        );
    }

    #[test]
    fn test_exception_from_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("startup failed")]
        struct Startup(#[source] std::io::Error);

        let error = Startup(std::io::Error::new(std::io::ErrorKind::Other, "port in use"));
        let info = ExceptionInfo::from_error(&error);

        assert_eq!(info.kind, "Startup");
        assert_eq!(info.message, "startup failed");
        let inner = info.inner.expect("inner exception");
        assert_eq!(inner.kind, "Custom");
        assert_eq!(inner.message, "port in use");
    }

    #[test]
    fn test_property_value_display_and_json() {
        assert_eq!(PropertyValue::from("a b").to_string(), "a b");
        assert_eq!(PropertyValue::from(None::<i64>).to_string(), "null");
        assert_eq!(
            serde_json::to_string(&PropertyValue::from(1.5)).unwrap(),
            "1.5"
        );
        assert_eq!(
            serde_json::to_string(&PropertyValue::from("x")).unwrap(),
            "\"x\""
        );
    }
}
