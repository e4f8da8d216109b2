//! Message signatures: redacted templates used to group near-identical events.

use once_cell::sync::Lazy;
use regex::Regex;

static UUID_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f-]{27,}").expect("uuid pattern"));
static LONG_INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]{3,}\b").expect("integer pattern"));
static ID_VALUE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\b(ids?)(\s*[:=#]?\s*)[0-9]{1,2}\b").expect("id value pattern"));
static QUOTED_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"["'`][^"'`]{4,}["'`]"#).expect("quoted pattern"));

/// Normalize a message into its signature.
///
/// Lowercase, then `<uuid>` for UUID-shaped runs, `<n>` for integers of 3+
/// digits (and for any integer right after an `id`/`ids` token), `"<value>"`
/// for quoted strings of 4+ chars. Trimmed and cut to `max_chars` characters.
/// Pure: the same message always yields the same signature.
pub fn normalize(message: &str, max_chars: usize) -> String {
  let lowered = message.to_lowercase();
  let s = UUID_RE.replace_all(&lowered, "<uuid>");
  let s = LONG_INT_RE.replace_all(&s, "<n>");
  let s = ID_VALUE_RE.replace_all(&s, "${1}${2}<n>");
  let s = QUOTED_RE.replace_all(&s, "\"<value>\"");
  s.trim().chars().take(max_chars).collect()
}

/// Signature for a raw row: message, else raw blob, else `unknown_event`.
pub fn for_row(event_message: &str, raw_json: &str, max_chars: usize) -> String {
  let basis = if !event_message.is_empty() {
    event_message
  } else if !raw_json.is_empty() {
    raw_json
  } else {
    "unknown_event"
  };
  normalize(basis, max_chars)
}
