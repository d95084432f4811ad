// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimum level filtering with per-source-context overrides.
//!
//! A record passes when its level is at least the minimum that applies to its
//! `SourceContext`. Overrides match by namespace prefix: an override for
//! `Microsoft` applies to `Microsoft` and `Microsoft.Hosting.Lifetime` but not
//! to `MicrosoftExtras`. When several overrides match, the longest prefix wins.

use crate::errors::ConfigError;
use crate::record::Level;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFilter {
    minimum: Level,
    // Kept sorted by descending prefix length so the first match is the most specific.
    overrides: Vec<(String, Level)>,
}

impl Default for LevelFilter {
    fn default() -> Self {
        Self::new(Level::Verbose)
    }
}

impl LevelFilter {
    pub fn new(minimum: Level) -> Self {
        Self {
            minimum,
            overrides: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, prefix: impl Into<String>, level: Level) -> Self {
        let prefix = prefix.into();
        self.overrides.retain(|(p, _)| *p != prefix);
        self.overrides.push((prefix, level));
        self.overrides
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self
    }

    pub fn minimum(&self) -> Level {
        self.minimum
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, Level)> {
        self.overrides.iter().map(|(p, l)| (p.as_str(), *l))
    }

    /// Minimum level applying to records from `source_context`.
    pub fn minimum_for(&self, source_context: Option<&str>) -> Level {
        let Some(context) = source_context else {
            return self.minimum;
        };
        self.overrides
            .iter()
            .find(|(prefix, _)| matches_prefix(context, prefix))
            .map_or(self.minimum, |(_, level)| *level)
    }

    pub fn is_enabled(&self, level: Level, source_context: Option<&str>) -> bool {
        level >= self.minimum_for(source_context)
    }

    /// Parses overrides of the form `Microsoft=Information,System.Net=Warning`.
    pub fn parse_overrides(mut self, input: &str) -> Result<Self, ConfigError> {
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((prefix, level)) = pair.split_once('=') else {
                return Err(ConfigError::Invalid(format!(
                    "level override {pair:?} is not of the form Prefix=Level"
                )));
            };
            self = self.with_override(prefix.trim(), level.parse()?);
        }
        Ok(self)
    }
}

fn matches_prefix(context: &str, prefix: &str) -> bool {
    match context.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
