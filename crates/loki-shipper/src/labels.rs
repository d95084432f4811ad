// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stream labels.
//!
//! A [`LabelSet`] identifies one Loki stream. Keys are kept sorted and
//! deduplicated, which is the shape the push API expects, so two sets built
//! in a different order compare (and hash) equal.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a label, replacing the value of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns `self` overlaid with `other`; keys present in both take the
    /// value from `other`.
    #[must_use]
    pub fn merged(&self, other: &LabelSet) -> LabelSet {
        if other.is_empty() {
            return self.clone();
        }
        let mut labels = self.labels.clone();
        labels.extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        LabelSet { labels }
    }

    /// First key that the push API would refuse, if any.
    pub fn first_invalid_key(&self) -> Option<&str> {
        self.labels
            .keys()
            .map(String::as_str)
            .find(|key| !is_valid_label_key(key))
    }

    /// Parses `key=value` pairs separated by commas, e.g. `app=api,env=prod`.
    ///
    /// Whitespace around keys and values is trimmed and empty segments are
    /// ignored. Key validity is not checked here; the encoder owns that rule.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut set = LabelSet::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ConfigError::Invalid(format!(
                    "label {pair:?} is not of the form key=value"
                )));
            };
            set.insert(key.trim(), value.trim());
        }
        Ok(set)
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Renders as a stream selector: `{app="api", env="prod"}`.
impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        write!(f, "}}")
    }
}

/// Checks a label key against the Loki naming rule.
///
/// A valid key must:
/// - Not be empty
/// - Contain only ASCII alphanumerics or underscores
/// - Not start with a digit
///
/// ```
/// use loki_shipper::labels::is_valid_label_key;
///
/// assert!(is_valid_label_key("app"));
/// assert!(is_valid_label_key("_internal"));
/// assert!(!is_valid_label_key("bad key"));
/// assert!(!is_valid_label_key("1st"));
/// ```
pub fn is_valid_label_key(key: &str) -> bool {
    let mut chars = key.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }

    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
