//! Field extraction from unstructured log text and raw JSON blobs.
//!
//! Every text field is described by an ordered list of attempts, most specific
//! (quoted JSON key) first, loosest last. [`first_match`] evaluates the list and
//! returns the first hit, so the fallback order stays auditable per field.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

/// One extraction attempt: a pattern plus how to read its captures.
pub struct Attempt {
  pub pattern: Regex,
  pub extract: fn(&Captures<'_>) -> Option<String>,
}

impl Attempt {
  fn group1(pattern: &str) -> Self {
    Self {
      pattern: compile(pattern),
      extract: |caps| caps.get(1).map(|m| m.as_str().to_string()),
    }
  }

  fn with(pattern: &str, extract: fn(&Captures<'_>) -> Option<String>) -> Self {
    Self {
      pattern: compile(pattern),
      extract,
    }
  }
}

fn compile(pattern: &str) -> Regex {
  Regex::new(pattern).unwrap_or_else(|e| panic!("invalid extraction pattern {pattern}: {e}"))
}

/// HTTP request line inside a free-text message, e.g. `POST /rest/v1/rpc/x`.
const REQUEST_LINE: &str = r#"\b(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\s+(/[^\s"']*)"#;

pub static STATUS_CODE: Lazy<Vec<Attempt>> = Lazy::new(|| {
  vec![
    Attempt::group1(r#""status_code"\s*:\s*(\d{3})"#),
    Attempt::group1(r"(?i)\bstatus(?:\s*code)?\s*[:=]\s*(\d{3})\b"),
  ]
});

pub static METHOD: Lazy<Vec<Attempt>> = Lazy::new(|| {
  vec![
    Attempt::group1(r#""method"\s*:\s*"([A-Z]+)""#),
    Attempt::group1(r"(?i)\bmethod\s*[:=]\s*([A-Z]+)"),
    Attempt::group1(REQUEST_LINE),
  ]
});

pub static PATH: Lazy<Vec<Attempt>> = Lazy::new(|| {
  vec![
    Attempt::group1(r#""path"\s*:\s*"([^"]+)""#),
    Attempt::group1(r#""url"\s*:\s*"([^"]+)""#),
    Attempt::group1(r"(?i)\bpath\s*[:=]\s*([^\s,]+)"),
    Attempt::with(REQUEST_LINE, |caps| caps.get(2).map(|m| m.as_str().to_string())),
  ]
});

pub static REQUEST_ID: Lazy<Vec<Attempt>> = Lazy::new(|| {
  vec![
    Attempt::group1(r#""request_id"\s*:\s*"([^"]+)""#),
    Attempt::group1(r#""trace_id"\s*:\s*"([^"]+)""#),
    Attempt::group1(r#""cf_ray"\s*:\s*"([^"]+)""#),
  ]
});

pub static IDENTIFIER: Lazy<Vec<Attempt>> = Lazy::new(|| {
  vec![
    Attempt::group1(r#""identifier"\s*:\s*"([^"]+)""#),
    Attempt::group1(r#""project_ref"\s*:\s*"([^"]+)""#),
  ]
});

static RPC_NAME_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)/rest/v1/rpc/([^/?]+)"));
static POSTGREST_CODE_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)error=([A-Z0-9]+)"));

/// First attempt that matches and yields a value wins.
pub fn first_match(text: &str, attempts: &[Attempt]) -> Option<String> {
  attempts.iter().find_map(|attempt| {
    attempt
      .pattern
      .captures(text)
      .and_then(|caps| (attempt.extract)(&caps))
  })
}

// ---------------------------------------------------------------------------
// Text fields
// ---------------------------------------------------------------------------

/// Fields read from the concatenated message + raw blob text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFields {
  pub status_code: Option<u16>,
  pub method: Option<String>,
  pub path: Option<String>,
  pub request_id: Option<String>,
  pub identifier: Option<String>,
}

pub fn text_fields(searchable: &str) -> TextFields {
  TextFields {
    status_code: first_match(searchable, &STATUS_CODE).and_then(|s| s.parse().ok()),
    method: first_match(searchable, &METHOD),
    path: first_match(searchable, &PATH),
    request_id: first_match(searchable, &REQUEST_ID),
    identifier: first_match(searchable, &IDENTIFIER),
  }
}

/// Path suffix after `/rest/v1/rpc/`, up to the next `/` or `?`.
pub fn rpc_name(path: Option<&str>) -> Option<String> {
  let path = path?;
  RPC_NAME_RE
    .captures(path)
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Blob fields
// ---------------------------------------------------------------------------

/// Best-effort JSON parse. Malformed input is `None`, never an error.
pub fn parse_blob(raw: &str) -> Option<Value> {
  serde_json::from_str(raw).ok()
}

/// `proxy_status` of the first response header object, when it is a string.
pub fn proxy_status(blob: Option<&Value>) -> Option<String> {
  blob?
    .pointer("/metadata/0/response/0/headers/0/proxy_status")
    .and_then(Value::as_str)
    .map(str::to_string)
}

/// PostgREST error code embedded in a proxy status (`error=23505`).
pub fn postgrest_error_code(proxy_status: Option<&str>) -> Option<String> {
  POSTGREST_CODE_RE
    .captures(proxy_status?)
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
}

const REQUEST_BODY_KEYS: &[&str] = &["body", "payload", "data", "query"];
const RESPONSE_BODY_KEYS: &[&str] = &["body", "payload", "data", "error"];

/// Request and response body snippets from the first request/response objects.
pub fn body_snippets(blob: Option<&Value>, max_chars: usize) -> (Option<String>, Option<String>) {
  let Some(blob) = blob else {
    return (None, None);
  };
  let request = snippet(blob.pointer("/metadata/0/request/0"), REQUEST_BODY_KEYS, max_chars);
  let response = snippet(blob.pointer("/metadata/0/response/0"), RESPONSE_BODY_KEYS, max_chars);
  (request, response)
}

fn snippet(node: Option<&Value>, keys: &[&str], max_chars: usize) -> Option<String> {
  let node = node?;
  let candidate = keys
    .iter()
    .filter_map(|key| node.get(*key))
    .find(|value| !value.is_null())?;
  let text = match candidate {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  Some(text.chars().take(max_chars).collect())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quoted_status_beats_loose_status() {
    let text = r#"status=404 {"status_code": 502}"#;
    assert_eq!(text_fields(text).status_code, Some(502));
    assert_eq!(text_fields("upstream Status: 503 returned").status_code, Some(503));
  }

  #[test]
  fn path_fallback_order() {
    let both = r#"{"url":"https://x.test/a","path":"/rest/v1/things"}"#;
    assert_eq!(text_fields(both).path.as_deref(), Some("/rest/v1/things"));

    let url_only = r#"{"url":"https://x.test/rest/v1/rpc/get_user?id=1"}"#;
    assert_eq!(
      text_fields(url_only).path.as_deref(),
      Some("https://x.test/rest/v1/rpc/get_user?id=1")
    );

    assert_eq!(text_fields("path=/storage/v1/object, done").path.as_deref(), Some("/storage/v1/object"));
    assert_eq!(text_fields("nothing to see").path, None);
  }

  #[test]
  fn request_line_gives_method_and_path() {
    let fields = text_fields("POST /rest/v1/rpc/submit_order failed");
    assert_eq!(fields.method.as_deref(), Some("POST"));
    assert_eq!(fields.path.as_deref(), Some("/rest/v1/rpc/submit_order"));
  }

  #[test]
  fn request_id_fallback_order() {
    assert_eq!(
      text_fields(r#"{"cf_ray":"ray-1","trace_id":"trace-1"}"#).request_id.as_deref(),
      Some("trace-1")
    );
    assert_eq!(text_fields(r#"{"cf_ray":"ray-1"}"#).request_id.as_deref(), Some("ray-1"));
  }

  #[test]
  fn identifier_falls_back_to_project_ref() {
    assert_eq!(
      text_fields(r#"{"project_ref":"abcd"}"#).identifier.as_deref(),
      Some("abcd")
    );
  }

  #[test]
  fn rpc_name_stops_at_slash_or_query() {
    assert_eq!(rpc_name(Some("/rest/v1/rpc/get_user?id=1")).as_deref(), Some("get_user"));
    assert_eq!(rpc_name(Some("/REST/V1/RPC/do_thing/extra")).as_deref(), Some("do_thing"));
    assert_eq!(rpc_name(Some("/rest/v1/users")), None);
    assert_eq!(rpc_name(None), None);
  }

  #[test]
  fn proxy_status_and_error_code_from_blob() {
    let blob = parse_blob(
      r#"{"metadata":[{"response":[{"headers":[{"proxy_status":"PostgREST; error=23505"}]}]}]}"#,
    );
    let proxy = proxy_status(blob.as_ref());
    assert_eq!(proxy.as_deref(), Some("PostgREST; error=23505"));
    assert_eq!(postgrest_error_code(proxy.as_deref()).as_deref(), Some("23505"));
  }

  #[test]
  fn malformed_blob_yields_nothing() {
    let blob = parse_blob("{not json");
    assert!(blob.is_none());
    assert_eq!(proxy_status(blob.as_ref()), None);
    assert_eq!(body_snippets(blob.as_ref(), 400), (None, None));
  }

  #[test]
  fn body_snippets_follow_key_priority() {
    let blob = parse_blob(
      r#"{"metadata":[{
        "request":[{"payload":{"a":1},"query":"q=1"}],
        "response":[{"body":null,"error":"duplicate key"}]
      }]}"#,
    );
    let (request, response) = body_snippets(blob.as_ref(), 400);
    assert_eq!(request.as_deref(), Some(r#"{"a":1}"#));
    assert_eq!(response.as_deref(), Some("duplicate key"));
  }

  #[test]
  fn body_snippets_truncate() {
    let body = "y".repeat(1000);
    let blob = parse_blob(&format!(r#"{{"metadata":[{{"request":[{{"body":"{}"}}]}}]}}"#, body));
    let (request, _) = body_snippets(blob.as_ref(), 400);
    assert_eq!(request.map(|s| s.len()), Some(400));
  }

  #[test]
  fn body_snippets_keep_source_key_order() {
    let blob = parse_blob(r#"{"metadata":[{"request":[{"body":{"zeta":1,"alpha":2}}]}]}"#);
    let (request, _) = body_snippets(blob.as_ref(), 400);
    assert_eq!(request.as_deref(), Some(r#"{"zeta":1,"alpha":2}"#));

    let (request, _) = body_snippets(blob.as_ref(), 9);
    assert_eq!(request.as_deref(), Some(r#"{"zeta":1"#));
  }
}
