//! Core engine: fetch, enrich, diagnose and correlate, cross-check a trace, report.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::correlation;
use crate::error::DiagnosticsError;
use crate::fetch;
use crate::har;
use crate::query::{QueryRequest, SeverityMode, SourceQuery};
use crate::report::{self, Report, RunContext};
use crate::types::{OrderedSet, QueryOutcome, RawRecord, SourceResult, Window};

/// Everything one run needs besides the data itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
  pub window: Window,
  pub sources: Vec<String>,
  pub severity: SeverityMode,
  /// HAR document (or its JSON text), if a browser trace was captured.
  pub har: Option<Value>,
  pub generated_at: DateTime<Utc>,
}

/// The diagnostics engine. Stateless across runs; holds only its tunables.
pub struct Engine {
  config: Config,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    Self { config }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Query every selected source, then build the report.
  ///
  /// Source-level failures end up in the report; only a query function that
  /// returns `Err` (or invalid options) fails the run.
  pub async fn run<Q: SourceQuery>(&self, query: &Q, options: &RunOptions) -> Result<Report, DiagnosticsError> {
    let sources = validate(options)?;
    let results = fetch::fetch_sources(query, &sources, &options.window, options.severity, &self.config).await?;
    Ok(self.analyze(&sources, options, results))
  }

  /// Diagnose, correlate and report over already-fetched source results.
  pub fn analyze(&self, sources: &[String], options: &RunOptions, results: Vec<SourceResult>) -> Report {
    let failure_diagnostics = correlation::build_failure_diagnostics(&results, &self.config);
    let har_correlation = har::correlate(options.har.as_ref(), &results, &self.config);

    let report = report::build_report(
      RunContext {
        window: &options.window,
        selected_sources: sources,
        severity: options.severity,
        generated_at: options.generated_at,
      },
      results,
      failure_diagnostics,
      har_correlation,
      &self.config,
    );

    info!(
      report_id = %report.report_id,
      sources = report.summary.total_sources,
      failed_sources = report.summary.failed_sources,
      rows = report.summary.total_rows,
      failures = report.failure_diagnostics.total_failures,
      "diagnostics run finished"
    );
    report
  }
}

/// Checks the window and returns the de-duplicated source list.
fn validate(options: &RunOptions) -> Result<Vec<String>, DiagnosticsError> {
  let minutes = options.window.minutes;
  if !minutes.is_finite() || minutes <= 0.0 {
    return Err(DiagnosticsError::validation("minutes", "must be a positive number"));
  }

  let sources: OrderedSet<String> = options
    .sources
    .iter()
    .map(|s| s.trim())
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect();
  if sources.is_empty() {
    return Err(DiagnosticsError::validation("sources", "at least one source is required"));
  }
  Ok(sources.into_vec())
}

// ---------------------------------------------------------------------------
// Run bundle (binary input) and its replay query
// ---------------------------------------------------------------------------

/// Rows for one source: a plain row list or a full outcome (e.g. a failure).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceRows {
  Rows(Vec<RawRecord>),
  Outcome(QueryOutcome),
}

impl SourceRows {
  fn to_outcome(&self) -> QueryOutcome {
    match self {
      Self::Rows(rows) => QueryOutcome::success(rows.clone()),
      Self::Outcome(outcome) => outcome.clone(),
    }
  }
}

/// One JSON document describing a complete run, rows included.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBundle {
  pub minutes: f64,
  #[serde(default)]
  pub sources: Option<Vec<String>>,
  #[serde(default)]
  pub severity: Option<String>,
  #[serde(default)]
  pub end_iso: Option<String>,
  #[serde(default)]
  pub rows: HashMap<String, SourceRows>,
  /// Either the HAR text or the document embedded as JSON. Anything unusable
  /// only disables trace correlation.
  #[serde(default)]
  pub har: Option<Value>,
  #[serde(default)]
  pub config: Option<Config>,
}

impl RunBundle {
  /// Resolve defaults: all supported sources, `warn` severity, window ending at `now`.
  pub fn options(&self, config: &Config, now: DateTime<Utc>) -> Result<RunOptions, DiagnosticsError> {
    let severity = match self.severity.as_deref() {
      Some(s) => s.parse::<SeverityMode>()?,
      None => SeverityMode::default(),
    };

    let end = match self.end_iso.as_deref() {
      Some(s) => DateTime::parse_from_rfc3339(s)
        .map_err(|_| DiagnosticsError::validation("endIso", "expected an RFC 3339 timestamp"))?
        .with_timezone(&Utc),
      None => now,
    };

    Ok(RunOptions {
      window: Window::ending_at(end, self.minutes)?,
      sources: self
        .sources
        .clone()
        .unwrap_or_else(|| config.supported_sources.clone()),
      severity,
      har: self.har.clone(),
      generated_at: now,
    })
  }

  pub fn fixture(&self) -> FixtureQuery {
    FixtureQuery {
      rows: self.rows.clone(),
    }
  }
}

/// Replays recorded rows as if they came back from the log API.
///
/// Rows are returned as-is; they are assumed to already match the window and
/// severity filter. A source with no recorded rows returns an empty success.
#[derive(Debug, Clone, Default)]
pub struct FixtureQuery {
  rows: HashMap<String, SourceRows>,
}

impl FixtureQuery {
  pub fn new(rows: HashMap<String, SourceRows>) -> Self {
    Self { rows }
  }
}

impl SourceQuery for FixtureQuery {
  async fn query(&self, request: &QueryRequest) -> Result<QueryOutcome, DiagnosticsError> {
    Ok(
      self
        .rows
        .get(&request.source)
        .map(SourceRows::to_outcome)
        .unwrap_or_else(|| QueryOutcome::success(Vec::new())),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diagnose;
  use crate::types::Severity;
  use serde_json::json;

  fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-15T10:05:00Z").unwrap().with_timezone(&Utc)
  }

  fn options(sources: &[&str]) -> RunOptions {
    RunOptions {
      window: Window::ending_at(now(), 5.0).unwrap(),
      sources: sources.iter().map(|s| s.to_string()).collect(),
      severity: SeverityMode::Warn,
      har: None,
      generated_at: now(),
    }
  }

  fn fixture(value: serde_json::Value) -> FixtureQuery {
    FixtureQuery::new(serde_json::from_value(value).unwrap())
  }

  #[tokio::test]
  async fn submit_order_failures_bucket_together() {
    let query = fixture(json!({
      "edge_logs": [
        {
          "timestamp": "2025-01-15T10:04:00.000Z",
          "event_message": "POST /rest/v1/rpc/submit_order failed",
          "raw_event_json": "{\"status_code\":500}"
        },
        {
          "timestamp": "2025-01-15T10:03:00.000Z",
          "event_message": "POST /rest/v1/rpc/submit_order failed",
          "raw_event_json": "{\"status_code\":401}"
        }
      ]
    }));
    let report = Engine::with_defaults().run(&query, &options(&["edge_logs"])).await.unwrap();

    assert_eq!(report.summary.total_rows, 2);
    let entries = &report.results[0].entries;
    assert!(entries.iter().all(|e| e.rpc_name.as_deref() == Some("submit_order")));
    assert_eq!(entries[0].severity, Severity::Error);
    assert_eq!(entries[1].severity, Severity::Warning);
    assert!(entries[1].is_failure());

    let failures = &report.failure_diagnostics.failures;
    assert_eq!(failures[0].probable_cause.as_deref(), Some(diagnose::CAUSE_SERVER));
    assert_eq!(failures[1].probable_cause.as_deref(), Some(diagnose::CAUSE_UNAUTHORIZED));

    let buckets = &report.failure_diagnostics.top_failing_rpcs;
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].key, "submit_order");
    assert_eq!(buckets[0].count, 2);
    assert_eq!(buckets[0].status_codes, vec![401, 500]);
  }

  #[tokio::test]
  async fn failed_source_does_not_abort_run() {
    let query = fixture(json!({
      "a_logs": [{"timestamp": "2025-01-15T10:04:00.000Z", "event_message": "GET /rest/v1/items status=500"}],
      "b_logs": {"ok": false, "status": 500, "error": {"message": "upstream"}},
      "c_logs": [{"timestamp": "2025-01-15T10:04:30.000Z", "event_message": "GET /rest/v1/items status=502"}]
    }));
    let report = Engine::with_defaults()
      .run(&query, &options(&["a_logs", "b_logs", "c_logs"]))
      .await
      .unwrap();

    assert_eq!(report.summary.failed_sources, 1);
    assert_eq!(report.summary.successful_sources, 2);
    assert_eq!(report.diagnostics_by_source[1].source, "b_logs");
    assert_eq!(report.diagnostics_by_source[1].matched_entries, 0);
    assert_eq!(report.failure_diagnostics.total_failures, 2);
    // Same path, 30s apart, different sources: each points at the other.
    assert_eq!(report.failure_diagnostics.failures[0].related_entries.len(), 1);
  }

  #[tokio::test]
  async fn rejects_bad_options() {
    let engine = Engine::with_defaults();
    let query = FixtureQuery::default();

    let mut opts = options(&["edge_logs"]);
    opts.window.minutes = 0.0;
    assert!(matches!(
      engine.run(&query, &opts).await,
      Err(DiagnosticsError::Validation { ref field, .. }) if field == "minutes"
    ));

    let opts = options(&[" ", ""]);
    assert!(matches!(
      engine.run(&query, &opts).await,
      Err(DiagnosticsError::Validation { ref field, .. }) if field == "sources"
    ));
  }

  #[tokio::test]
  async fn duplicate_sources_are_queried_once() {
    let report = Engine::with_defaults()
      .run(&FixtureQuery::default(), &options(&["edge_logs", "edge_logs", "auth_logs"]))
      .await
      .unwrap();
    assert_eq!(report.options.selected_sources, vec!["edge_logs", "auth_logs"]);
    assert_eq!(report.summary.total_sources, 2);
  }

  #[test]
  fn bundle_defaults() {
    let bundle: RunBundle = serde_json::from_value(json!({"minutes": 15})).unwrap();
    let config = Config::default();
    let opts = bundle.options(&config, now()).unwrap();
    assert_eq!(opts.sources, config.supported_sources);
    assert_eq!(opts.severity, SeverityMode::Warn);
    assert_eq!(opts.window.end_iso, "2025-01-15T10:05:00.000Z");
    assert_eq!(opts.window.start_iso, "2025-01-15T09:50:00.000Z");
  }

  #[test]
  fn bundle_rejects_bad_severity_and_end() {
    let config = Config::default();
    let bundle: RunBundle = serde_json::from_value(json!({"minutes": 5, "severity": "loud"})).unwrap();
    assert!(bundle.options(&config, now()).is_err());

    let bundle: RunBundle = serde_json::from_value(json!({"minutes": 5, "endIso": "yesterday"})).unwrap();
    assert!(matches!(
      bundle.options(&config, now()),
      Err(DiagnosticsError::Validation { ref field, .. }) if field == "endIso"
    ));
  }

  #[test]
  fn bundle_rejects_window_outside_time_range() {
    let config = Config::default();
    for minutes in [1e15, -1e18, 0.0] {
      let bundle: RunBundle = serde_json::from_value(json!({"minutes": minutes, "sources": ["edge_logs"]})).unwrap();
      assert!(matches!(
        bundle.options(&config, now()),
        Err(DiagnosticsError::Validation { ref field, .. }) if field == "minutes"
      ));
    }
  }

  #[test]
  fn bundle_accepts_embedded_har_document() {
    let bundle: RunBundle = serde_json::from_value(json!({
      "minutes": 5,
      "har": {"log": {"entries": []}}
    }))
    .unwrap();
    let opts = bundle.options(&Config::default(), now()).unwrap();
    assert_eq!(opts.har, Some(json!({"log": {"entries": []}})));
  }
}
