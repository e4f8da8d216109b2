//! Core types for the diagnostics engine (JSON contracts + internal models).

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::DiagnosticsError;

// ---------------------------------------------------------------------------
// Inbound types (what the query collaborator hands us)
// ---------------------------------------------------------------------------

/// One raw log row. Unknown fields are silently ignored.
///
/// Accepts both the log API's column names (`event_message`, `raw_event_json`)
/// and the camelCase names used in reports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
  #[serde(default, deserialize_with = "loose_string")]
  pub source: String,
  #[serde(default, deserialize_with = "loose_string")]
  pub timestamp: String,
  #[serde(default, alias = "eventMessage", deserialize_with = "loose_string")]
  pub event_message: String,
  #[serde(default, rename = "raw_event_json", alias = "rawJson", deserialize_with = "loose_string")]
  pub raw_json: String,
}

impl RawRecord {
  pub fn new(
    source: impl Into<String>,
    timestamp: impl Into<String>,
    event_message: impl Into<String>,
    raw_json: impl Into<String>,
  ) -> Self {
    Self {
      source: source.into(),
      timestamp: timestamp.into(),
      event_message: event_message.into(),
      raw_json: raw_json.into(),
    }
  }
}

/// Strings, numbers and embedded JSON all become text; null becomes empty.
fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(match value {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s,
    Some(other) => other.to_string(),
  })
}

/// What one per-source query returned.
///
/// `ok == false` is a source-level failure (HTTP error, API error body); it is
/// data, not an `Err`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
  #[serde(default)]
  pub rows: Vec<RawRecord>,
  #[serde(default = "default_true")]
  pub ok: bool,
  #[serde(default)]
  pub status: Option<u16>,
  #[serde(default)]
  pub error: Value,
}

fn default_true() -> bool {
  true
}

impl QueryOutcome {
  pub fn success(rows: Vec<RawRecord>) -> Self {
    Self {
      rows,
      ok: true,
      status: Some(200),
      error: Value::Null,
    }
  }

  pub fn failure(status: Option<u16>, error: Value) -> Self {
    Self {
      rows: Vec::new(),
      ok: false,
      status,
      error,
    }
  }
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// The single time window one run covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
  #[serde(serialize_with = "whole_or_fraction")]
  pub minutes: f64,
  pub start_iso: String,
  pub end_iso: String,
}

impl Window {
  pub fn new(minutes: f64, start_iso: impl Into<String>, end_iso: impl Into<String>) -> Self {
    Self {
      minutes,
      start_iso: start_iso.into(),
      end_iso: end_iso.into(),
    }
  }

  /// The `minutes` leading up to `end`, formatted like `2025-01-15T10:30:00.000Z`.
  ///
  /// `minutes` must be finite and positive, and the start must stay inside
  /// chrono's representable range.
  pub fn ending_at(end: DateTime<Utc>, minutes: f64) -> Result<Self, DiagnosticsError> {
    if !minutes.is_finite() || minutes <= 0.0 {
      return Err(DiagnosticsError::validation("minutes", "must be a positive number"));
    }
    let start = TimeDelta::try_milliseconds((minutes * 60_000.0).floor() as i64)
      .and_then(|span| end.checked_sub_signed(span))
      .ok_or_else(|| DiagnosticsError::validation("minutes", "window start is out of range"))?;
    Ok(Self::new(
      minutes,
      start.to_rfc3339_opts(SecondsFormat::Millis, true),
      end.to_rfc3339_opts(SecondsFormat::Millis, true),
    ))
  }
}

/// `5.0` goes out as `5`; fractional windows keep their fraction.
fn whole_or_fraction<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
  if value.fract() == 0.0 && value.abs() < 9.0e15 {
    serializer.serialize_i64(*value as i64)
  } else {
    serializer.serialize_f64(*value)
  }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Info,
  Warning,
  Error,
}

// ---------------------------------------------------------------------------
// Order-preserving set
// ---------------------------------------------------------------------------

/// Set that remembers first-insertion order. Serializes as a plain array.
#[derive(Debug, Clone)]
pub struct OrderedSet<T> {
  items: Vec<T>,
  seen: HashSet<T>,
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
  pub fn new() -> Self {
    Self {
      items: Vec::new(),
      seen: HashSet::new(),
    }
  }

  /// Returns `false` when the value was already present.
  pub fn insert(&mut self, value: T) -> bool {
    if self.seen.contains(&value) {
      return false;
    }
    self.seen.insert(value.clone());
    self.items.push(value);
    true
  }

  pub fn contains(&self, value: &T) -> bool {
    self.seen.contains(value)
  }

  pub fn first(&self) -> Option<&T> {
    self.items.first()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, T> {
    self.items.iter()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn as_slice(&self) -> &[T] {
    &self.items
  }

  pub fn into_vec(self) -> Vec<T> {
    self.items
  }
}

impl<T: Eq + Hash + Clone> Default for OrderedSet<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Eq + Hash + Clone> Extend<T> for OrderedSet<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for value in iter {
      self.insert(value);
    }
  }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for OrderedSet<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let mut set = Self::new();
    set.extend(iter);
    set
  }
}

impl<T: PartialEq> PartialEq for OrderedSet<T> {
  fn eq(&self, other: &Self) -> bool {
    self.items == other.items
  }
}

impl<T: Serialize> Serialize for OrderedSet<T> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.items.serialize(serializer)
  }
}

// ---------------------------------------------------------------------------
// Enriched record
// ---------------------------------------------------------------------------

/// A raw row plus everything derived from it. Built once by enrichment; only
/// `probable_cause` and `action_suggestions` are filled in later, on failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
  pub source: String,
  pub timestamp: String,
  pub severity: Severity,
  pub status_code: Option<u16>,
  pub method: Option<String>,
  pub path: Option<String>,
  pub rpc_name: Option<String>,
  pub identifier: Option<String>,
  pub request_id: Option<String>,
  pub proxy_status: Option<String>,
  pub postgrest_error_code: Option<String>,
  pub event_message: String,
  pub signature: String,
  pub root_cause_hints: OrderedSet<String>,
  pub probable_cause: Option<String>,
  #[serde(skip_serializing_if = "OrderedSet::is_empty")]
  pub action_suggestions: OrderedSet<String>,
  pub request_body_snippet: Option<String>,
  pub response_body_snippet: Option<String>,
  pub raw_json: String,
}

impl EnrichedRecord {
  /// `statusCode >= 400`.
  pub fn is_failure(&self) -> bool {
    matches!(self.status_code, Some(code) if code >= 400)
  }

  /// Bucketing key: rpc name, else path, else `"unknown"`.
  pub fn identity_key(&self) -> &str {
    self
      .rpc_name
      .as_deref()
      .or(self.path.as_deref())
      .unwrap_or("unknown")
  }
}

// ---------------------------------------------------------------------------
// Source result
// ---------------------------------------------------------------------------

/// One per queried source, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
  pub source: String,
  pub ok: bool,
  pub status: Option<u16>,
  pub error: Value,
  pub row_count: usize,
  pub entries: Vec<EnrichedRecord>,
}

// ---------------------------------------------------------------------------
// Failure diagnostics (output)
// ---------------------------------------------------------------------------

/// Failures aggregated under one identity key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureBucket {
  pub key: String,
  pub rpc_name: Option<String>,
  pub path: Option<String>,
  pub count: usize,
  pub last_seen_timestamp: String,
  pub status_codes: Vec<u16>,
  pub error_codes: Vec<String>,
  pub sources: Vec<String>,
  pub action_suggestions: Vec<String>,
}

/// Small cross-reference to a record from another source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntry {
  pub source: String,
  pub timestamp: String,
  pub status_code: Option<u16>,
  pub method: Option<String>,
  pub path: Option<String>,
  pub request_id: Option<String>,
  pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedFailure {
  pub source: String,
  pub timestamp: String,
  pub method: Option<String>,
  pub path: Option<String>,
  pub rpc_name: Option<String>,
  pub status_code: Option<u16>,
  pub request_id: Option<String>,
  pub postgrest_error_code: Option<String>,
  pub proxy_status: Option<String>,
  pub probable_cause: Option<String>,
  pub root_cause_hints: Vec<String>,
  pub action_suggestions: Vec<String>,
  pub request_body_snippet: Option<String>,
  pub response_body_snippet: Option<String>,
  pub related_entries: Vec<RelatedEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDiagnostics {
  pub total_failures: usize,
  pub top_failing_rpcs: Vec<FailureBucket>,
  pub failures: Vec<CorrelatedFailure>,
}

// ---------------------------------------------------------------------------
// External trace
// ---------------------------------------------------------------------------

/// One request observed by the browser, reduced to what correlation reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
  pub started_at: String,
  pub method: String,
  pub path: String,
  pub status_code: Option<u16>,
}

// ---------------------------------------------------------------------------
// Error output (emitted by the binary on bad input)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
