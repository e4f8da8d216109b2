//! Aggregate reporting: per-source roll-ups, global totals, checks, final report.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::har::HarCorrelation;
use crate::query::{self, SeverityMode};
use crate::types::{FailureDiagnostics, Severity, SourceResult, Window};

// ---------------------------------------------------------------------------
// Output types (JSON contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
  pub total_sources: usize,
  pub successful_sources: usize,
  pub failed_sources: usize,
  pub total_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBuckets {
  #[serde(rename = "status2xx")]
  pub status_2xx: usize,
  #[serde(rename = "status3xx")]
  pub status_3xx: usize,
  #[serde(rename = "status4xx")]
  pub status_4xx: usize,
  #[serde(rename = "status5xx")]
  pub status_5xx: usize,
  #[serde(rename = "statusUnknown")]
  pub status_unknown: usize,
}

impl StatusBuckets {
  fn record(&mut self, status_code: Option<u16>) {
    match status_code {
      None => self.status_unknown += 1,
      Some(code) if code >= 500 => self.status_5xx += 1,
      Some(code) if code >= 400 => self.status_4xx += 1,
      Some(code) if code >= 300 => self.status_3xx += 1,
      Some(_) => self.status_2xx += 1,
    }
  }

  fn add(&mut self, other: &StatusBuckets) {
    self.status_2xx += other.status_2xx;
    self.status_3xx += other.status_3xx;
    self.status_4xx += other.status_4xx;
    self.status_5xx += other.status_5xx;
    self.status_unknown += other.status_unknown;
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityBuckets {
  pub error: usize,
  pub warning: usize,
  pub info: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCount {
  pub signature: String,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HintCount {
  pub hint: String,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionCount {
  pub suggestion: String,
  pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDiagnostic {
  pub source: String,
  pub ok: bool,
  pub status: Option<u16>,
  pub error: Value,
  pub matched_entries: usize,
  pub status_buckets: StatusBuckets,
  pub severity_buckets: SeverityBuckets,
  pub top_signatures: Vec<SignatureCount>,
  pub top_hints: Vec<HintCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFailure {
  pub source: String,
  pub status: Option<u16>,
  pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
  All,
  Focused,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtGlance {
  pub selected_sources: Vec<String>,
  pub source_mode: SourceMode,
  pub query_failures: Vec<QueryFailure>,
  pub status_totals: StatusBuckets,
  pub top_signatures: Vec<SignatureCount>,
  pub likely_primary_causes: Vec<HintCount>,
  pub checks: Vec<String>,
  pub action_summary: Vec<ActionCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAction {
  pub source: String,
  pub timestamp: String,
  pub rpc_name: Option<String>,
  pub path: Option<String>,
  pub status_code: Option<u16>,
  pub postgrest_error_code: Option<String>,
  pub probable_cause: Option<String>,
  pub action_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGuidance {
  pub summary: Vec<ActionCount>,
  pub per_failure: Vec<FailureAction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
  pub severity: SeverityMode,
  pub selected_sources: Vec<String>,
  pub max_concurrency: usize,
}

/// The single structured report one run produces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub report_id: String,
  pub generated_at: String,
  pub window: Window,
  pub options: ReportOptions,
  pub summary: Summary,
  pub at_glance: AtGlance,
  pub failure_diagnostics: FailureDiagnostics,
  pub action_guidance: ActionGuidance,
  pub diagnostics_by_source: Vec<SourceDiagnostic>,
  pub har_correlation: Option<HarCorrelation>,
  pub results: Vec<SourceResult>,
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Count keys, then rank by count desc and key asc; keep the first `n`.
pub fn rank_counts<'a, I>(keys: I, n: usize) -> Vec<(String, usize)>
where
  I: IntoIterator<Item = &'a str>,
{
  let mut counts: HashMap<&str, usize> = HashMap::new();
  for key in keys {
    *counts.entry(key).or_insert(0) += 1;
  }
  let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
  ranked.sort_by(|(ka, a), (kb, b)| b.cmp(a).then_with(|| ka.cmp(kb)));
  ranked
    .into_iter()
    .take(n)
    .map(|(key, count)| (key.to_string(), count))
    .collect()
}

fn top_signatures<'a, I: IntoIterator<Item = &'a str>>(keys: I, n: usize) -> Vec<SignatureCount> {
  rank_counts(keys, n)
    .into_iter()
    .map(|(signature, count)| SignatureCount { signature, count })
    .collect()
}

fn top_hints<'a, I: IntoIterator<Item = &'a str>>(keys: I, n: usize) -> Vec<HintCount> {
  rank_counts(keys, n)
    .into_iter()
    .map(|(hint, count)| HintCount { hint, count })
    .collect()
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn summarize_results(results: &[SourceResult]) -> Summary {
  let mut summary = Summary {
    total_sources: results.len(),
    ..Summary::default()
  };
  for result in results {
    if result.ok {
      summary.successful_sources += 1;
      summary.total_rows += result.entries.len();
    } else {
      summary.failed_sources += 1;
    }
  }
  summary
}

/// Status/severity buckets and top signatures/hints for one source.
pub fn source_diagnostic(result: &SourceResult, config: &Config) -> SourceDiagnostic {
  let mut status_buckets = StatusBuckets::default();
  let mut severity_buckets = SeverityBuckets::default();

  for entry in &result.entries {
    status_buckets.record(entry.status_code);
    match entry.severity {
      Severity::Error => severity_buckets.error += 1,
      Severity::Warning => severity_buckets.warning += 1,
      Severity::Info => severity_buckets.info += 1,
    }
  }

  SourceDiagnostic {
    source: result.source.clone(),
    ok: result.ok,
    status: result.status,
    error: result.error.clone(),
    matched_entries: result.entries.len(),
    status_buckets,
    severity_buckets,
    top_signatures: top_signatures(result.entries.iter().map(|e| e.signature.as_str()), config.top_n),
    top_hints: top_hints(
      result
        .entries
        .iter()
        .flat_map(|e| e.root_cause_hints.iter().map(String::as_str)),
      config.top_n,
    ),
  }
}

/// Most frequent action suggestions over the correlated failures, plus a per-failure list.
pub fn build_action_guidance(failures: &FailureDiagnostics, config: &Config) -> ActionGuidance {
  let summary = rank_counts(
    failures
      .failures
      .iter()
      .flat_map(|f| f.action_suggestions.iter().map(String::as_str)),
    config.top_n,
  )
  .into_iter()
  .map(|(suggestion, count)| ActionCount { suggestion, count })
  .collect();

  let per_failure = failures
    .failures
    .iter()
    .map(|f| FailureAction {
      source: f.source.clone(),
      timestamp: f.timestamp.clone(),
      rpc_name: f.rpc_name.clone(),
      path: f.path.clone(),
      status_code: f.status_code,
      postgrest_error_code: f.postgrest_error_code.clone(),
      probable_cause: f.probable_cause.clone(),
      action_suggestions: f.action_suggestions.clone(),
    })
    .collect();

  ActionGuidance { summary, per_failure }
}

pub fn source_mode(selected: &[String], supported: &[String]) -> SourceMode {
  let covers_all = supported.iter().all(|s| selected.contains(s));
  if covers_all {
    SourceMode::All
  } else {
    SourceMode::Focused
  }
}

/// Everything the at-a-glance block needs besides the per-source diagnostics.
pub struct GlanceContext<'a> {
  pub summary: &'a Summary,
  pub selected_sources: &'a [String],
  pub window: &'a Window,
  pub action_summary: Vec<ActionCount>,
}

pub fn build_at_glance(
  results: &[SourceResult],
  diagnostics: &[SourceDiagnostic],
  ctx: GlanceContext<'_>,
  config: &Config,
) -> AtGlance {
  let query_failures: Vec<QueryFailure> = results
    .iter()
    .filter(|r| !r.ok)
    .map(|r| QueryFailure {
      source: r.source.clone(),
      status: r.status,
      explanation: query::api_error_message(r.status, &r.source, &r.error),
    })
    .collect();

  let mut status_totals = StatusBuckets::default();
  for diagnostic in diagnostics {
    status_totals.add(&diagnostic.status_buckets);
  }

  let entries = || results.iter().flat_map(|r| r.entries.iter());
  let top_signatures = top_signatures(entries().map(|e| e.signature.as_str()), config.top_n);
  let likely_primary_causes = top_hints(
    entries().flat_map(|e| e.root_cause_hints.iter().map(String::as_str)),
    config.top_n,
  );

  let source_mode = source_mode(ctx.selected_sources, &config.supported_sources);

  let mut checks = Vec::new();
  if ctx.summary.total_rows == 0 {
    checks.push(format!(
      "No warning/error matches found in the last {} minute(s). Increase the window or broaden source focus.",
      ctx.window.minutes
    ));
  }
  if status_totals.status_5xx > 0 {
    checks.push(
      "5xx errors detected. Prioritize server-side traces and correlate request IDs/timestamps across affected sources."
        .to_string(),
    );
  }
  if status_totals.status_4xx > 0 {
    checks.push(
      "4xx errors detected. Review auth, permissions, request paths, and payload schema contracts.".to_string(),
    );
  }
  if !query_failures.is_empty() {
    checks.push(
      "Some source queries failed. Inspect diagnosticsBySource.error and queryFailures explanations.".to_string(),
    );
  }
  if source_mode == SourceMode::Focused {
    checks.push("Focused run active; some root causes may be outside selected sources.".to_string());
  }
  if checks.is_empty() {
    checks.push(
      "No immediate high-risk patterns detected in this window; inspect topSignatures and likelyPrimaryCauses for recurring weak signals."
        .to_string(),
    );
  }

  AtGlance {
    selected_sources: ctx.selected_sources.to_vec(),
    source_mode,
    query_failures,
    status_totals,
    top_signatures,
    likely_primary_causes,
    checks,
    action_summary: ctx.action_summary,
  }
}

/// Stable id for a run: hash of the window and the selected sources.
pub fn report_id(window: &Window, selected_sources: &[String]) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(window.start_iso.as_bytes());
  hasher.update(b"|");
  hasher.update(window.end_iso.as_bytes());
  for source in selected_sources {
    hasher.update(b"|");
    hasher.update(source.as_bytes());
  }
  let hex = hasher.finalize().to_hex();
  format!("rep-{}", &hex[..16])
}

/// Inputs that describe the run rather than its data.
pub struct RunContext<'a> {
  pub window: &'a Window,
  pub selected_sources: &'a [String],
  pub severity: SeverityMode,
  pub generated_at: DateTime<Utc>,
}

/// Assemble the final report from already-correlated data.
pub fn build_report(
  ctx: RunContext<'_>,
  results: Vec<SourceResult>,
  failure_diagnostics: FailureDiagnostics,
  har_correlation: Option<HarCorrelation>,
  config: &Config,
) -> Report {
  let summary = summarize_results(&results);
  let diagnostics_by_source: Vec<SourceDiagnostic> =
    results.iter().map(|r| source_diagnostic(r, config)).collect();
  let action_guidance = build_action_guidance(&failure_diagnostics, config);

  let at_glance = build_at_glance(
    &results,
    &diagnostics_by_source,
    GlanceContext {
      summary: &summary,
      selected_sources: ctx.selected_sources,
      window: ctx.window,
      action_summary: action_guidance.summary.clone(),
    },
    config,
  );

  Report {
    report_id: report_id(ctx.window, ctx.selected_sources),
    generated_at: ctx.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    window: ctx.window.clone(),
    options: ReportOptions {
      severity: ctx.severity,
      selected_sources: ctx.selected_sources.to_vec(),
      max_concurrency: config.max_concurrency,
    },
    summary,
    at_glance,
    failure_diagnostics,
    action_guidance,
    diagnostics_by_source,
    har_correlation,
    results,
  }
}
