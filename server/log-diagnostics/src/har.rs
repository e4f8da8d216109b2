//! Cross-check a captured browser network trace (HAR) against backend records.

use std::borrow::Cow;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::correlation::timestamp_ms;
use crate::error::DiagnosticsError;
use crate::query::value_text;
use crate::types::{EnrichedRecord, SourceResult, TraceEntry};

/// Trace match counts. A coarse confidence signal, not a pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarCorrelation {
  pub har_entry_count: usize,
  pub backend_entry_count: usize,
  pub matched_entries: usize,
  pub unmatched_entries: usize,
}

/// Path plus query of an absolute URL; anything unparseable is kept verbatim.
pub fn extract_pathname(url: &str) -> String {
  match Url::parse(url) {
    Ok(parsed) => match parsed.query().filter(|q| !q.is_empty()) {
      Some(query) => format!("{}?{}", parsed.path(), query),
      None => parsed.path().to_string(),
    },
    Err(_) => url.to_string(),
  }
}

/// Parse HAR text into trace entries.
pub fn parse_har(text: &str) -> Result<Vec<TraceEntry>, DiagnosticsError> {
  let doc: Value = serde_json::from_str(text)?;
  Ok(trace_entries(&doc))
}

/// Trace entries of a parsed document. A missing or non-array `log.entries`
/// yields none; missing entry fields become empty, non-string ones become text.
pub fn trace_entries(doc: &Value) -> Vec<TraceEntry> {
  let Some(entries) = doc.pointer("/log/entries").and_then(Value::as_array) else {
    return Vec::new();
  };
  entries
    .iter()
    .map(|entry| {
      let text = |pointer: &str| entry.pointer(pointer).map(value_text).unwrap_or_default();
      TraceEntry {
        started_at: text("/startedDateTime"),
        method: text("/request/method"),
        path: extract_pathname(&text("/request/url")),
        status_code: entry
          .pointer("/response/status")
          .and_then(Value::as_u64)
          .and_then(|s| u16::try_from(s).ok()),
      }
    })
    .collect()
}

fn is_compatible(trace: &TraceEntry, trace_ms: i64, record: &EnrichedRecord, window_ms: i64) -> bool {
  let Some(record_ms) = timestamp_ms(&record.timestamp) else {
    return false;
  };
  if (record_ms - trace_ms).abs() > window_ms {
    return false;
  }

  let same_status = match (trace.status_code, record.status_code) {
    (Some(a), Some(b)) => a == b,
    _ => true,
  };

  let path_match = match record.path.as_deref() {
    Some(path) if !path.is_empty() && !trace.path.is_empty() => {
      trace.path.contains(path) || path.contains(trace.path.as_str())
    }
    _ => true,
  };

  same_status && path_match
}

/// Count trace entries that have at least one compatible backend record.
///
/// First match wins and records are not consumed, so one record can satisfy
/// several trace entries.
pub fn correlate_entries(trace: &[TraceEntry], results: &[SourceResult], config: &Config) -> HarCorrelation {
  let records: Vec<&EnrichedRecord> = results.iter().flat_map(|r| r.entries.iter()).collect();

  let matched = trace
    .iter()
    .filter(|entry| {
      let Some(trace_ms) = timestamp_ms(&entry.started_at) else {
        return false;
      };
      records
        .iter()
        .any(|record| is_compatible(entry, trace_ms, record, config.correlation_window_ms))
    })
    .count();

  HarCorrelation {
    har_entry_count: trace.len(),
    backend_entry_count: records.len(),
    matched_entries: matched,
    unmatched_entries: trace.len().saturating_sub(matched),
  }
}

/// The trace as a parsed document: JSON text is parsed, an embedded object or
/// array is used as is. Anything else is not a trace.
fn trace_document(trace: &Value) -> Result<Option<Cow<'_, Value>>, DiagnosticsError> {
  match trace {
    Value::Null => Ok(None),
    Value::String(text) if text.trim().is_empty() => Ok(None),
    Value::String(text) => Ok(Some(Cow::Owned(serde_json::from_str(text)?))),
    Value::Object(_) | Value::Array(_) => Ok(Some(Cow::Borrowed(trace))),
    _ => Err(DiagnosticsError::validation("har", "expected a HAR document or its JSON text")),
  }
}

/// Correlate an optional HAR trace. Missing or unusable input yields `None`
/// and never affects the rest of the report.
pub fn correlate(trace: Option<&Value>, results: &[SourceResult], config: &Config) -> Option<HarCorrelation> {
  match trace_document(trace?) {
    Ok(Some(doc)) => Some(correlate_entries(&trace_entries(&doc), results, config)),
    Ok(None) => None,
    Err(e) => {
      warn!(error = %e, "skipping HAR correlation: trace document is unusable");
      None
    }
  }
}
