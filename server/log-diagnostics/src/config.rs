//! Engine configuration with sane defaults.

use serde::Deserialize;

/// Log sources queried when a run does not narrow the selection.
pub const DEFAULT_SOURCES: &[&str] = &[
  "auth_logs",
  "edge_logs",
  "function_edge_logs",
  "function_logs",
  "postgres_logs",
  "realtime_logs",
  "storage_logs",
];

/// Tunable limits for fetching, correlation and ranking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
  /// Concurrent per-source queries in flight.
  pub max_concurrency: usize,
  /// Half-width of the correlation window, in milliseconds.
  pub correlation_window_ms: i64,
  /// Most recent failures that get cross-source related entries.
  pub max_correlated_failures: usize,
  /// Related entries kept per correlated failure.
  pub max_related_entries: usize,
  /// Failure buckets emitted in `topFailingRpcs`.
  pub max_failure_buckets: usize,
  /// Length of every "top N" list (signatures, hints, action summary).
  pub top_n: usize,
  /// Max characters kept from request/response bodies.
  pub snippet_max_chars: usize,
  /// Max characters kept from a normalized signature.
  pub signature_max_chars: usize,
  /// Row limit placed in each per-source query.
  pub row_limit: usize,
  /// Every source this deployment knows about. Used for focused-mode detection.
  pub supported_sources: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_concurrency: 3,
      correlation_window_ms: 120_000,
      max_correlated_failures: 25,
      max_related_entries: 6,
      max_failure_buckets: 10,
      top_n: 5,
      snippet_max_chars: 400,
      signature_max_chars: 220,
      row_limit: 500,
      supported_sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
    }
  }
}
