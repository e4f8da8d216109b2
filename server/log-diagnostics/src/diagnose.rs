//! Rule-based diagnosis: root-cause hints, probable cause, action suggestions.
//!
//! Hints apply to every record. Probable cause and action suggestions are only
//! derived for failures (`statusCode >= 400`).

use crate::types::{EnrichedRecord, OrderedSet};

const FUNCTION_SOURCES: &[&str] = &["function_logs", "function_edge_logs"];

pub const HINT_AUTH: &str = "Auth token/session likely missing, expired, or invalid for this request path.";
pub const HINT_PERMISSION: &str =
  "Permission or policy rejection; verify role grants, RLS policy scope, and organization context.";
pub const HINT_NOT_FOUND: &str =
  "Resource/path mismatch; verify IDs, route path, and object existence at request time.";
pub const HINT_RATE_LIMIT: &str = "Rate limiting detected; reduce burst traffic or add retry/backoff strategy.";
pub const HINT_SERVER: &str =
  "Server-side failure; inspect upstream service logs around same timestamp and trace/request identifiers.";
pub const HINT_TIMEOUT: &str =
  "Timeout/deadline exceeded; inspect query/runtime latency and downstream dependency response times.";
pub const HINT_PAYLOAD_SHAPE: &str =
  "Payload/query shape may be invalid; compare request fields and expected schema/contract.";
pub const HINT_DATABASE: &str =
  "Database query/constraint issue; inspect SQL, constraints, and RPC argument mapping.";
pub const HINT_FUNCTION: &str =
  "Edge Function involvement detected; correlate with function runtime logs and deployment version.";

pub const CAUSE_FOREIGN_KEY: &str =
  "Foreign key or relational integrity violation; one referenced ID likely does not exist in the target table.";
pub const CAUSE_UNIQUE: &str =
  "Unique constraint violation; duplicate row conflict for a key that must remain unique.";
pub const CAUSE_UNAUTHORIZED: &str =
  "Authentication failure; token/session missing, expired, or invalid for this endpoint.";
pub const CAUSE_FORBIDDEN: &str = "Authorization failure; role/RLS policy likely rejected this request.";
pub const CAUSE_NOT_FOUND: &str = "Requested resource or route not found; verify endpoint path and IDs.";
pub const CAUSE_SERVER: &str =
  "Server-side execution failure; inspect runtime logs and upstream dependency responses.";
pub const CAUSE_GENERIC: &str =
  "Investigate request/response details and related source entries for the root cause.";

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Root-cause hints for one record. Independent rules, first-seen order, no duplicates.
pub fn derive_hints(message: &str, status_code: Option<u16>, source: &str) -> OrderedSet<String> {
  let text = message.to_lowercase();
  let has = |needle: &str| text.contains(needle);
  let mut hints = OrderedSet::new();

  if status_code == Some(401) || has("unauthorized") {
    hints.insert(HINT_AUTH.to_string());
  }
  if status_code == Some(403) || has("forbidden") || has("permission") {
    hints.insert(HINT_PERMISSION.to_string());
  }
  if status_code == Some(404) || has("not found") {
    hints.insert(HINT_NOT_FOUND.to_string());
  }
  if status_code == Some(429) || has("rate limit") {
    hints.insert(HINT_RATE_LIMIT.to_string());
  }
  if matches!(status_code, Some(code) if code >= 500) {
    hints.insert(HINT_SERVER.to_string());
  }
  if has("timeout") || has("deadline") {
    hints.insert(HINT_TIMEOUT.to_string());
  }
  if has("invalid") || has("parse") || has("syntax") {
    hints.insert(HINT_PAYLOAD_SHAPE.to_string());
  }
  if source == "postgres_logs" && (has("statement") || has("constraint") || has("violat")) {
    hints.insert(HINT_DATABASE.to_string());
  }
  if FUNCTION_SOURCES.contains(&source) {
    hints.insert(HINT_FUNCTION.to_string());
  }

  hints
}

fn error_code(record: &EnrichedRecord) -> String {
  record
    .postgrest_error_code
    .as_deref()
    .unwrap_or_default()
    .to_ascii_uppercase()
}

fn is_relational_violation(record: &EnrichedRecord, code: &str) -> bool {
  let proxy = record.proxy_status.as_deref().unwrap_or_default().to_lowercase();
  code == PG_FOREIGN_KEY_VIOLATION || proxy.contains("constraint") || proxy.contains("violat")
}

/// Single probable-cause line. First matching rule wins.
pub fn probable_cause(record: &EnrichedRecord) -> String {
  let code = error_code(record);

  if is_relational_violation(record, &code) {
    return CAUSE_FOREIGN_KEY.to_string();
  }
  if code == PG_UNIQUE_VIOLATION {
    return CAUSE_UNIQUE.to_string();
  }
  match record.status_code {
    Some(401) => return CAUSE_UNAUTHORIZED.to_string(),
    Some(403) => return CAUSE_FORBIDDEN.to_string(),
    Some(404) => return CAUSE_NOT_FOUND.to_string(),
    Some(code) if code >= 500 => return CAUSE_SERVER.to_string(),
    _ => {}
  }

  record
    .root_cause_hints
    .first()
    .cloned()
    .unwrap_or_else(|| CAUSE_GENERIC.to_string())
}

/// Action suggestions. Every matching rule contributes; order is rule order.
pub fn action_suggestions(record: &EnrichedRecord) -> OrderedSet<String> {
  let code = error_code(record);
  let signature = record.signature.to_lowercase();
  let mut out = OrderedSet::new();
  let mut add = |items: &[&str]| out.extend(items.iter().map(|s| s.to_string()));

  match record.status_code {
    Some(401) => add(&[
      "Check auth session bootstrap flow.",
      "Verify Supabase redirect URL allowlist.",
      "Confirm cookies are set for correct domain.",
      "Ensure Authorization header is present in request.",
    ]),
    Some(403) => add(&[
      "Check RLS policies for target table.",
      "Verify org membership role (owner/admin/hr etc).",
      "Confirm RPC permission guard logic matches membership model.",
    ]),
    Some(404) => add(&[
      "Confirm route path and RPC name.",
      "Check ID existence before request.",
      "Validate org context switching logic.",
    ]),
    Some(429) => add(&["Check rate limiting or burst traffic.", "Add retry/backoff if necessary."]),
    Some(code) if code >= 500 => add(&[
      "Inspect Edge Function logs.",
      "Correlate requestId across sources.",
      "Validate upstream dependency availability.",
    ]),
    _ => {}
  }

  if code == PG_UNIQUE_VIOLATION {
    add(&[
      "Unique constraint violation.",
      "Check upsert vs insert semantics.",
      "Confirm idempotency logic.",
    ]);
  }
  if is_relational_violation(record, &code) {
    add(&[
      "Foreign key violation.",
      "Verify referenced row exists.",
      "Check ordering of bootstrap creation.",
    ]);
  }
  if FUNCTION_SOURCES.contains(&record.source.as_str()) {
    add(&[
      "Verify deployed function version.",
      "Confirm environment variables exist in function runtime.",
    ]);
  }
  if record.rpc_name.as_deref().is_some_and(|name| !name.trim().is_empty()) {
    add(&["Validate RPC argument contract against database.types.ts."]);
  }
  if signature.contains("timeout") || signature.contains("deadline") {
    add(&["Profile latency and add retries/timeouts aligned with backend SLA."]);
  }
  if signature.contains("unauthorized") || signature.contains("forbidden") || signature.contains("permission") {
    add(&["Validate user auth context and org scoping before request dispatch."]);
  }
  if record.root_cause_hints.contains(&HINT_PAYLOAD_SHAPE.to_string()) {
    add(&["Compare request payload keys/types with RPC function signature."]);
  }

  out
}

/// Attach probable cause and action suggestions to a failure. No-op otherwise.
pub fn annotate(record: &mut EnrichedRecord) {
  if !record.is_failure() {
    return;
  }
  record.probable_cause = Some(probable_cause(record));
  record.action_suggestions = action_suggestions(record);
}
