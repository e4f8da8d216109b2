//! Per-source query collaborator: request shape, query text, failure explanations.
//!
//! The transport (an HTTP call to a log analytics endpoint) lives outside this
//! crate behind [`SourceQuery`].

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DiagnosticsError;
use crate::types::QueryOutcome;

/// Which rows the per-source query should keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityMode {
  All,
  #[default]
  Warn,
  Error,
}

impl SeverityMode {
  /// Filter over `lower(event_message || raw json)`, or `None` for `all`.
  pub fn pattern(self) -> Option<&'static str> {
    match self {
      Self::All => None,
      Self::Error => Some("(error|fatal|exception)"),
      Self::Warn => Some(
        "(error|warn|warning|exception|failed|denied|forbidden|timeout|panic|invalid|500|502|503|504|429|400|401|403|404)",
      ),
    }
  }
}

impl FromStr for SeverityMode {
  type Err = DiagnosticsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "all" => Ok(Self::All),
      "warn" | "warning" => Ok(Self::Warn),
      "error" => Ok(Self::Error),
      _ => Err(DiagnosticsError::validation("severity", "expected warn|error|all")),
    }
  }
}

impl fmt::Display for SeverityMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::All => "all",
      Self::Warn => "warn",
      Self::Error => "error",
    })
  }
}

/// Everything the transport needs to pull one source's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
  pub source: String,
  pub start_iso: String,
  pub end_iso: String,
  pub severity: SeverityMode,
  pub sql: String,
}

impl QueryRequest {
  pub fn new(source: &str, start_iso: &str, end_iso: &str, severity: SeverityMode, row_limit: usize) -> Self {
    Self {
      source: source.to_string(),
      start_iso: start_iso.to_string(),
      end_iso: end_iso.to_string(),
      severity,
      sql: build_source_sql(source, start_iso, end_iso, severity, row_limit),
    }
  }
}

/// The external per-source query function.
///
/// `Ok(outcome)` with `outcome.ok == false` is a recorded source failure.
/// `Err` means the function broke its contract and aborts the run.
#[allow(async_fn_in_trait)]
pub trait SourceQuery {
  async fn query(&self, request: &QueryRequest) -> Result<QueryOutcome, DiagnosticsError>;
}

/// Query text for one source over `[start, end]`, newest first.
pub fn build_source_sql(
  source: &str,
  start_iso: &str,
  end_iso: &str,
  severity: SeverityMode,
  row_limit: usize,
) -> String {
  let mut lines = vec![
    "select".to_string(),
    "  s.timestamp,".to_string(),
    "  s.event_message,".to_string(),
    "  to_json_string(s) as raw_event_json".to_string(),
    format!("from {} as s", source),
    format!(
      "where s.timestamp >= timestamp('{}') and s.timestamp <= timestamp('{}')",
      start_iso, end_iso
    ),
  ];

  if let Some(pattern) = severity.pattern() {
    lines.push("and regexp_contains(".to_string());
    lines.push(
      "  lower(concat(ifnull(s.event_message, ''), ' ', ifnull(to_json_string(s), ''))),".to_string(),
    );
    lines.push(format!("  r'{}'", pattern));
    lines.push(")".to_string());
  }

  lines.push("order by s.timestamp desc".to_string());
  lines.push(format!("limit {}", row_limit));
  lines.join("\n")
}

// ---------------------------------------------------------------------------
// Source failure explanations
// ---------------------------------------------------------------------------

static UNSUPPORTED_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(400|404)\b").expect("code pattern"));

/// Error value as text: strings verbatim, everything else as JSON.
pub fn value_text(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Best-effort HTTP-ish code for a failed source query.
pub fn api_error_code(status: Option<u16>, error: &Value) -> Option<u16> {
  if let Some(status) = status.filter(|s| *s >= 400) {
    return Some(status);
  }
  match error {
    Value::Object(map) => map
      .get("code")
      .and_then(Value::as_u64)
      .and_then(|c| u16::try_from(c).ok()),
    Value::String(text) => UNSUPPORTED_CODE_RE
      .captures(text)
      .and_then(|caps| caps.get(1))
      .and_then(|m| m.as_str().parse().ok()),
    _ => None,
  }
}

/// Human explanation for a failed source query.
pub fn api_error_message(status: Option<u16>, source: &str, error: &Value) -> String {
  if matches!(api_error_code(status, error), Some(400) | Some(404)) {
    return format!("Source {} unsupported or unavailable for this project/token.", source);
  }
  let text: String = value_text(error).chars().take(300).collect();
  if text.is_empty() {
    format!("Source {} query failed.", source)
  } else {
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn severity_mode_parses_loosely() {
    assert_eq!("ALL".parse::<SeverityMode>().unwrap(), SeverityMode::All);
    assert_eq!(" warn ".parse::<SeverityMode>().unwrap(), SeverityMode::Warn);
    assert!("verbose".parse::<SeverityMode>().is_err());
  }

  #[test]
  fn sql_includes_filter_unless_all() {
    let sql = build_source_sql("edge_logs", "2025-01-15T10:00:00Z", "2025-01-15T10:05:00Z", SeverityMode::Error, 500);
    assert!(sql.contains("from edge_logs as s"));
    assert!(sql.contains("r'(error|fatal|exception)'"));
    assert!(sql.ends_with("order by s.timestamp desc\nlimit 500"));

    let sql = build_source_sql("edge_logs", "a", "b", SeverityMode::All, 500);
    assert!(!sql.contains("regexp_contains"));

    let sql = build_source_sql("edge_logs", "a", "b", SeverityMode::Warn, 10);
    assert!(sql.contains("|429|400|401|403|404)'"));
    assert!(sql.ends_with("limit 10"));
  }

  #[test]
  fn unsupported_sources_are_explained() {
    assert_eq!(
      api_error_message(Some(404), "realtime_logs", &Value::Null),
      "Source realtime_logs unsupported or unavailable for this project/token."
    );
    assert_eq!(
      api_error_message(None, "x", &json!("bad request (400)")),
      "Source x unsupported or unavailable for this project/token."
    );
    assert_eq!(api_error_code(Some(200), &json!({"code": 404})), Some(404));
  }

  #[test]
  fn other_failures_echo_error_body() {
    assert_eq!(
      api_error_message(Some(500), "edge_logs", &json!({"message": "boom"})),
      r#"{"message":"boom"}"#
    );
    assert_eq!(api_error_message(None, "edge_logs", &Value::Null), "Source edge_logs query failed.");
  }
}
