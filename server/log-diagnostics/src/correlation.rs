//! Failure ranking and cross-source correlation.
//!
//! Failures (`statusCode >= 400`) are bucketed by identity (rpc name, else
//! path, else `"unknown"`) and ranked by count. The most recent failures are
//! linked to records from *other* sources inside the correlation window that
//! share the rpc name or path.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDateTime};

use crate::config::Config;
use crate::diagnose;
use crate::types::{
  CorrelatedFailure, EnrichedRecord, FailureBucket, FailureDiagnostics, OrderedSet, RelatedEntry, SourceResult,
};

/// Milliseconds since the epoch for an ISO-8601 (or bare epoch) timestamp.
pub fn timestamp_ms(value: &str) -> Option<i64> {
  let value = value.trim();
  if value.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
    return Some(dt.timestamp_millis());
  }
  for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
      return Some(naive.and_utc().timestamp_millis());
    }
  }
  if value.bytes().all(|b| b.is_ascii_digit()) {
    let n: i64 = value.parse().ok()?;
    // 16 digits: microseconds, 13: milliseconds, otherwise seconds.
    return Some(match value.len() {
      16.. => n / 1_000,
      13..=15 => n,
      _ => n.checked_mul(1_000)?,
    });
  }
  None
}

/// `|a - b| <= window_ms`. Unparseable timestamps are never in window.
pub fn within_window(a: &str, b: &str, window_ms: i64) -> bool {
  match (timestamp_ms(a), timestamp_ms(b)) {
    (Some(a), Some(b)) => (a - b).abs() <= window_ms,
    _ => false,
  }
}

/// Failures across all sources, annotated, newest first.
pub fn collect_failures(results: &[SourceResult]) -> Vec<EnrichedRecord> {
  let mut failures: Vec<EnrichedRecord> = results
    .iter()
    .flat_map(|result| result.entries.iter())
    .filter(|entry| entry.is_failure())
    .cloned()
    .map(|mut entry| {
      diagnose::annotate(&mut entry);
      entry
    })
    .collect();

  // ISO-8601 timestamps order lexically. Stable sort keeps source order on ties.
  failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
  failures
}

struct BucketAcc {
  rpc_name: Option<String>,
  path: Option<String>,
  count: usize,
  last_seen: String,
  status_codes: BTreeSet<u16>,
  error_codes: OrderedSet<String>,
  sources: OrderedSet<String>,
  actions: OrderedSet<String>,
}

/// Aggregate failures by identity key; count desc, then key asc; top `limit`.
pub fn bucket_failures(failures: &[EnrichedRecord], limit: usize) -> Vec<FailureBucket> {
  let mut buckets: HashMap<String, BucketAcc> = HashMap::new();

  for entry in failures {
    let acc = buckets
      .entry(entry.identity_key().to_string())
      .or_insert_with(|| BucketAcc {
        rpc_name: entry.rpc_name.clone(),
        path: entry.path.clone(),
        count: 0,
        last_seen: entry.timestamp.clone(),
        status_codes: BTreeSet::new(),
        error_codes: OrderedSet::new(),
        sources: OrderedSet::new(),
        actions: OrderedSet::new(),
      });

    acc.count += 1;
    if entry.timestamp > acc.last_seen {
      acc.last_seen = entry.timestamp.clone();
    }
    if let Some(code) = entry.status_code {
      acc.status_codes.insert(code);
    }
    if let Some(code) = &entry.postgrest_error_code {
      acc.error_codes.insert(code.clone());
    }
    acc.sources.insert(entry.source.clone());
    acc.actions.extend(entry.action_suggestions.iter().cloned());
  }

  let mut ranked: Vec<(String, BucketAcc)> = buckets.into_iter().collect();
  ranked.sort_by(|(ka, a), (kb, b)| b.count.cmp(&a.count).then_with(|| ka.cmp(kb)));

  ranked
    .into_iter()
    .take(limit)
    .map(|(key, acc)| FailureBucket {
      key,
      rpc_name: acc.rpc_name,
      path: acc.path,
      count: acc.count,
      last_seen_timestamp: acc.last_seen,
      status_codes: acc.status_codes.into_iter().collect(),
      error_codes: acc.error_codes.into_vec(),
      sources: acc.sources.into_vec(),
      action_suggestions: acc.actions.into_vec(),
    })
    .collect()
}

fn shares_identity(a: &EnrichedRecord, b: &EnrichedRecord) -> bool {
  let same = |x: &Option<String>, y: &Option<String>| matches!((x, y), (Some(x), Some(y)) if x == y);
  same(&a.rpc_name, &b.rpc_name) || same(&a.path, &b.path)
}

/// Records from other sources near `failure` in time sharing its rpc name or path.
pub fn related_entries<'a, I>(failure: &EnrichedRecord, candidates: I, config: &Config) -> Vec<RelatedEntry>
where
  I: IntoIterator<Item = &'a EnrichedRecord>,
{
  candidates
    .into_iter()
    .filter(|candidate| candidate.source != failure.source)
    .filter(|candidate| shares_identity(failure, candidate))
    .filter(|candidate| within_window(&failure.timestamp, &candidate.timestamp, config.correlation_window_ms))
    .take(config.max_related_entries)
    .map(|entry| RelatedEntry {
      source: entry.source.clone(),
      timestamp: entry.timestamp.clone(),
      status_code: entry.status_code,
      method: entry.method.clone(),
      path: entry.path.clone(),
      request_id: entry.request_id.clone(),
      signature: entry.signature.clone(),
    })
    .collect()
}

/// Bucket, rank and correlate every failure across all source results.
pub fn build_failure_diagnostics(results: &[SourceResult], config: &Config) -> FailureDiagnostics {
  let failures = collect_failures(results);
  let top_failing_rpcs = bucket_failures(&failures, config.max_failure_buckets);

  let correlated = failures
    .iter()
    .take(config.max_correlated_failures)
    .map(|failed| {
      let all = results.iter().flat_map(|result| result.entries.iter());
      CorrelatedFailure {
        source: failed.source.clone(),
        timestamp: failed.timestamp.clone(),
        method: failed.method.clone(),
        path: failed.path.clone(),
        rpc_name: failed.rpc_name.clone(),
        status_code: failed.status_code,
        request_id: failed.request_id.clone(),
        postgrest_error_code: failed.postgrest_error_code.clone(),
        proxy_status: failed.proxy_status.clone(),
        probable_cause: failed.probable_cause.clone(),
        root_cause_hints: failed.root_cause_hints.as_slice().to_vec(),
        action_suggestions: failed.action_suggestions.as_slice().to_vec(),
        request_body_snippet: failed.request_body_snippet.clone(),
        response_body_snippet: failed.response_body_snippet.clone(),
        related_entries: related_entries(failed, all, config),
      }
    })
    .collect();

  FailureDiagnostics {
    total_failures: failures.len(),
    top_failing_rpcs,
    failures: correlated,
  }
}
