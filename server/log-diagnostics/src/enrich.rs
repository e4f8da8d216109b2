//! Enrich raw rows into `EnrichedRecord`s: extracted fields, severity, signature, hints.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::diagnose;
use crate::extract;
use crate::signature;
use crate::types::{EnrichedRecord, RawRecord, Severity};

static ERROR_WORDS: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"panic|fatal|error|exception|failed|fail|timeout").expect("error words"));
static WARNING_WORDS: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"warn|warning|denied|forbidden|invalid|unauthorized|not found").expect("warning words")
});

/// Enrich every row of one source. Rows are never dropped.
pub fn enrich(source: &str, rows: &[RawRecord], config: &Config) -> Vec<EnrichedRecord> {
  rows.iter().map(|row| enrich_row(source, row, config)).collect()
}

/// Enrich a single row. Pure: depends only on `source`, the row and the config.
pub fn enrich_row(source: &str, row: &RawRecord, config: &Config) -> EnrichedRecord {
  let searchable = format!("{}\n{}", row.event_message, row.raw_json);
  let fields = extract::text_fields(&searchable);

  let blob = extract::parse_blob(&row.raw_json);
  let proxy_status = extract::proxy_status(blob.as_ref());
  let postgrest_error_code = extract::postgrest_error_code(proxy_status.as_deref());
  let rpc_name = extract::rpc_name(fields.path.as_deref());
  let (request_body_snippet, response_body_snippet) =
    extract::body_snippets(blob.as_ref(), config.snippet_max_chars);

  EnrichedRecord {
    source: source.to_string(),
    timestamp: row.timestamp.clone(),
    severity: classify_severity(&row.event_message, fields.status_code),
    status_code: fields.status_code,
    method: fields.method,
    path: fields.path,
    rpc_name,
    identifier: fields.identifier,
    request_id: fields.request_id,
    proxy_status,
    postgrest_error_code,
    event_message: row.event_message.clone(),
    signature: signature::for_row(&row.event_message, &row.raw_json, config.signature_max_chars),
    root_cause_hints: diagnose::derive_hints(&row.event_message, fields.status_code, source),
    probable_cause: None,
    action_suggestions: Default::default(),
    request_body_snippet,
    response_body_snippet,
    raw_json: row.raw_json.clone(),
  }
}

/// Status code dominates; otherwise keywords in the lowercased message decide.
pub fn classify_severity(message: &str, status_code: Option<u16>) -> Severity {
  match status_code {
    Some(code) if code >= 500 => return Severity::Error,
    Some(code) if code >= 400 => return Severity::Warning,
    _ => {}
  }

  let normalized = message.to_lowercase();
  if ERROR_WORDS.is_match(&normalized) {
    Severity::Error
  } else if WARNING_WORDS.is_match(&normalized) {
    Severity::Warning
  } else {
    Severity::Info
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(message: &str, raw: &str) -> RawRecord {
    RawRecord::new("edge_logs", "2025-01-15T10:30:00.000Z", message, raw)
  }

  #[test]
  fn status_code_dominates_message() {
    assert_eq!(classify_severity("ok", Some(503)), Severity::Error);
    assert_eq!(classify_severity("fatal crash", Some(404)), Severity::Warning);
    assert_eq!(classify_severity("all good", Some(200)), Severity::Info);
  }

  #[test]
  fn message_keywords_without_status() {
    assert_eq!(classify_severity("permission denied for table x", None), Severity::Warning);
    assert_eq!(classify_severity("Connection TIMEOUT", None), Severity::Error);
    assert_eq!(classify_severity("listening on :8080", None), Severity::Info);
  }

  #[test]
  fn enriches_edge_row() {
    let raw = serde_json::json!({
      "metadata": [{
        "request": [{"method": "POST", "path": "/rest/v1/rpc/create_invite", "body": {"email": "a@b.c"}}],
        "response": [{"status_code": 403, "headers": [{"proxy_status": "PostgREST; error=42501"}]}]
      }],
      "request_id": "req-1",
      "project_ref": "proj"
    })
    .to_string();
    let record = enrich_row(
      "edge_logs",
      &row("POST | 403 | /rest/v1/rpc/create_invite", &raw),
      &Config::default(),
    );

    assert_eq!(record.status_code, Some(403));
    assert_eq!(record.severity, Severity::Warning);
    assert_eq!(record.method.as_deref(), Some("POST"));
    assert_eq!(record.rpc_name.as_deref(), Some("create_invite"));
    assert_eq!(record.request_id.as_deref(), Some("req-1"));
    assert_eq!(record.identifier.as_deref(), Some("proj"));
    assert_eq!(record.postgrest_error_code.as_deref(), Some("42501"));
    assert_eq!(record.request_body_snippet.as_deref(), Some(r#"{"email":"a@b.c"}"#));
    assert_eq!(record.root_cause_hints.first().map(String::as_str), Some(diagnose::HINT_PERMISSION));
    assert!(record.probable_cause.is_none());
  }

  #[test]
  fn malformed_blob_keeps_text_fields() {
    let record = enrich_row(
      "postgres_logs",
      &row("duplicate key status=409 path=/rest/v1/items", "{broken"),
      &Config::default(),
    );
    assert_eq!(record.status_code, Some(409));
    assert_eq!(record.path.as_deref(), Some("/rest/v1/items"));
    assert_eq!(record.proxy_status, None);
    assert_eq!(record.request_body_snippet, None);
    assert_eq!(record.raw_json, "{broken");
  }

  #[test]
  fn enrich_keeps_every_row_in_order() {
    let rows = vec![row("first", ""), row("second", "not json"), row("", "")];
    let out = enrich("auth_logs", &rows, &Config::default());
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].signature, "first");
    assert_eq!(out[1].signature, "second");
    assert_eq!(out[2].signature, "unknown_event");
    assert!(out.iter().all(|r| r.source == "auth_logs"));
  }
}
