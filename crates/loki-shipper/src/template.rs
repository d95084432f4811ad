// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output templates.
//!
//! An output template such as
//! `{Timestamp:dd-MM-yyyy HH:mm:ss} [{Level:u3}] [{ThreadId}] {Message}{NewLine}{Exception}`
//! is parsed once and then rendered for every record. Rendering is a pure
//! function of the record.
//!
//! Tokens are `{Name}`, `{Name:format}` or `{Name,alignment:format}`; `{{` and
//! `}}` are literal braces. Built-in names:
//!
//! - `Timestamp`: .NET style custom format (`yyyy-MM-dd HH:mm:ss.fff zzz` by default)
//! - `Level`: full name, or `u`/`w`/`t` casing with an optional width (`u3` → `INF`)
//! - `Message`: the message template with properties substituted
//! - `NewLine`, `Exception`, `Properties`
//!
//! Any other name is looked up in the record's properties and renders empty
//! when missing. Inside the *message* template a missing property renders as
//! the raw token, and string values are quoted unless the format contains `l`.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fmt::Write as _;
use std::str::FromStr;

use crate::errors::TemplateError;
use crate::record::{Level, LogRecord, PropertyValue};

pub const DEFAULT_OUTPUT_TEMPLATE: &str =
    "{Timestamp:dd-MM-yyyy HH:mm:ss} [{Level:u3}] [{ThreadId}] {Message}{NewLine}{Exception}";

const DEFAULT_TIMESTAMP_FORMAT: &str = "yyyy-MM-dd HH:mm:ss.fff zzz";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Token(Token),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    raw: String,
    name: String,
    alignment: Option<i32>,
    format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl OutputTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            source: template.to_string(),
            segments: parse_segments(template)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, record: &LogRecord) -> String {
        let mut out = String::with_capacity(self.source.len() + record.message_template().len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Token(token) => {
                    let value = render_output_token(token, record);
                    push_aligned(&mut out, &value, token.alignment);
                }
            }
        }
        out
    }
}

impl Default for OutputTemplate {
    fn default() -> Self {
        // The default template is a constant known to parse.
        Self {
            source: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            segments: parse_segments(DEFAULT_OUTPUT_TEMPLATE).unwrap_or_default(),
        }
    }
}

impl FromStr for OutputTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_segments(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                text.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                text.push('}');
            }
            '}' => return Err(TemplateError::UnmatchedBrace(pos)),
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err(TemplateError::UnclosedToken(pos));
                }
                let token = parse_token(&body).ok_or_else(|| TemplateError::InvalidToken {
                    token: body.clone(),
                    position: pos,
                })?;
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Token(token));
            }
            _ => text.push(ch),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

fn parse_token(body: &str) -> Option<Token> {
    let (head, format) = match body.split_once(':') {
        Some((head, format)) => (head, Some(format.to_string())),
        None => (body, None),
    };
    let (name, alignment) = match head.split_once(',') {
        Some((name, alignment)) => (name, Some(alignment.trim().parse::<i32>().ok()?)),
        None => (head, None),
    };
    // Capturing hints from message templates are accepted and ignored.
    let name = name.trim_start_matches(['@', '$']);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return None;
    }
    Some(Token {
        raw: format!("{{{body}}}"),
        name: name.to_string(),
        alignment,
        format,
    })
}

fn push_aligned(out: &mut String, value: &str, alignment: Option<i32>) {
    let Some(alignment) = alignment else {
        out.push_str(value);
        return;
    };
    let width = alignment.unsigned_abs() as usize;
    let len = value.chars().count();
    if len >= width {
        out.push_str(value);
    } else if alignment < 0 {
        out.push_str(value);
        out.extend(std::iter::repeat(' ').take(width - len));
    } else {
        out.extend(std::iter::repeat(' ').take(width - len));
        out.push_str(value);
    }
}

fn render_output_token(token: &Token, record: &LogRecord) -> String {
    match token.name.as_str() {
        "Timestamp" => format_timestamp(
            &record.timestamp(),
            token.format.as_deref().unwrap_or(DEFAULT_TIMESTAMP_FORMAT),
        ),
        "Level" => format_level(record.level(), token.format.as_deref()),
        "Message" => render_message(record, token.format.as_deref()),
        "NewLine" => "\n".to_string(),
        "Exception" => record
            .exception()
            .map(|e| format!("{e}\n"))
            .unwrap_or_default(),
        "Properties" => render_properties(record),
        name => record
            .property(name)
            .map(|v| format_property(v, token.format.as_deref(), true))
            .unwrap_or_default(),
    }
}

/// Substitutes record properties into its message template.
pub fn render_message(record: &LogRecord, format: Option<&str>) -> String {
    let template = record.message_template();
    let Ok(segments) = parse_segments(template) else {
        return template.to_string();
    };
    let literal = format.is_some_and(|f| f.contains('l'));

    let mut out = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Token(token) => match record.property(&token.name) {
                Some(value) => {
                    let token_literal =
                        literal || token.format.as_deref().is_some_and(|f| f.contains('l'));
                    let rendered = format_property(value, token.format.as_deref(), token_literal);
                    push_aligned(&mut out, &rendered, token.alignment);
                }
                None => out.push_str(&token.raw),
            },
        }
    }
    out
}

fn format_property(value: &PropertyValue, format: Option<&str>, literal: bool) -> String {
    match value {
        PropertyValue::String(s) if !literal => format!("{s:?}"),
        PropertyValue::F64(v) => match format.and_then(fixed_precision) {
            Some(precision) => format!("{v:.precision$}"),
            None => v.to_string(),
        },
        other => other.to_string(),
    }
}

/// `F2`/`N2` style precision hints for floats.
fn fixed_precision(format: &str) -> Option<usize> {
    let mut chars = format.chars();
    match chars.next() {
        Some('F' | 'f' | 'N' | 'n') => chars.as_str().parse().ok(),
        _ => None,
    }
}

fn render_properties(record: &LogRecord) -> String {
    let mut out = String::from("{");
    for (i, (name, value)) in record.properties().iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{name}={}", format_property(value, None, false));
    }
    out.push('}');
    out
}

const LEVEL_MONIKERS_1: [&str; 6] = ["V", "D", "I", "W", "E", "F"];
const LEVEL_MONIKERS_2: [&str; 6] = ["VB", "DE", "IN", "WN", "ER", "FA"];
const LEVEL_MONIKERS_3: [&str; 6] = ["VRB", "DBG", "INF", "WRN", "ERR", "FTL"];
const LEVEL_MONIKERS_4: [&str; 6] = ["VERB", "DBUG", "INFO", "WARN", "EROR", "FATL"];

/// Formats a level: `u3` → `INF`, `w3` → `inf`, `t4` → `Info`, `u` → `INFORMATION`.
pub fn format_level(level: Level, format: Option<&str>) -> String {
    let Some(format) = format.filter(|f| !f.is_empty()) else {
        return level.as_str().to_string();
    };
    let mut chars = format.chars();
    let case = chars.next().unwrap_or('t');
    let width: Option<usize> = chars.as_str().parse().ok();

    let index = level as usize;
    let title = match width {
        Some(1) => LEVEL_MONIKERS_1[index].to_string(),
        Some(2) => LEVEL_MONIKERS_2[index].to_string(),
        Some(3) => LEVEL_MONIKERS_3[index].to_string(),
        Some(4) => LEVEL_MONIKERS_4[index].to_string(),
        Some(n) => level.as_str().chars().take(n).collect(),
        None => level.as_str().to_string(),
    };

    match case {
        'u' => title.to_uppercase(),
        'w' => title.to_lowercase(),
        _ => {
            let lower = title.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => lower,
            }
        }
    }
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Formats a UTC timestamp with a .NET custom date and time format string.
///
/// ```
/// use chrono::DateTime;
/// use loki_shipper::template::format_timestamp;
///
/// let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
/// assert_eq!(format_timestamp(&ts, "dd-MM-yyyy HH:mm:ss"), "14-11-2023 22:13:20");
/// ```
pub fn format_timestamp(ts: &DateTime<Utc>, format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 8);
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        match c {
            'd' => match run {
                1 => push_num(&mut out, ts.day(), 1),
                2 => push_num(&mut out, ts.day(), 2),
                3 => out.push_str(&WEEKDAYS[ts.weekday().num_days_from_monday() as usize][..3]),
                _ => out.push_str(WEEKDAYS[ts.weekday().num_days_from_monday() as usize]),
            },
            'M' => match run {
                1 => push_num(&mut out, ts.month(), 1),
                2 => push_num(&mut out, ts.month(), 2),
                3 => out.push_str(&MONTHS[ts.month0() as usize][..3]),
                _ => out.push_str(MONTHS[ts.month0() as usize]),
            },
            'y' => {
                let year = ts.year().unsigned_abs();
                match run {
                    1 => push_num(&mut out, year % 100, 1),
                    2 => push_num(&mut out, year % 100, 2),
                    n => push_num(&mut out, year, n),
                }
            }
            'H' => push_num(&mut out, ts.hour(), run.min(2)),
            'h' => push_num(&mut out, ts.hour12().1, run.min(2)),
            'm' => push_num(&mut out, ts.minute(), run.min(2)),
            's' => push_num(&mut out, ts.second(), run.min(2)),
            'f' | 'F' => {
                let digits = run.min(7);
                let nanos = ts.nanosecond() % 1_000_000_000;
                let fraction = format!("{nanos:09}");
                let fraction = &fraction[..digits];
                if c == 'F' {
                    out.push_str(fraction.trim_end_matches('0'));
                } else {
                    out.push_str(fraction);
                }
            }
            't' => {
                let designator = if ts.hour12().0 { "PM" } else { "AM" };
                out.push_str(&designator[..run.min(2)]);
            }
            'z' => out.push_str(match run {
                1 => "+0",
                2 => "+00",
                _ => "+00:00",
            }),
            'K' => {
                out.push('Z');
                run = 1;
            }
            '\'' | '"' => {
                // Quoted literal text.
                let mut j = i + 1;
                while j < chars.len() && chars[j] != c {
                    out.push(chars[j]);
                    j += 1;
                }
                i = j + 1;
                continue;
            }
            '\\' => {
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                }
                i += 2;
                continue;
            }
            _ => {
                out.push(c);
                run = 1;
            }
        }
        i += run;
    }
    out
}

fn push_num(out: &mut String, value: u32, width: usize) {
    let _ = write!(out, "{value:0width$}");
}
