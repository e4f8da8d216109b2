//! Bounded fetch coordinator: a fixed pool of workers claiming source indices.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::config::Config;
use crate::enrich;
use crate::error::DiagnosticsError;
use crate::query::{QueryRequest, SeverityMode, SourceQuery};
use crate::types::{SourceResult, Window};

/// Run `mapper` over `items` with at most `limit` calls in flight.
///
/// Each worker claims the next unclaimed index from a shared cursor and writes
/// into that index's slot, so `output[i]` always belongs to `items[i]` no
/// matter which call finishes first. The first `Err` aborts the batch.
pub async fn map_with_concurrency<'a, T, R, E, F, Fut>(
  items: &'a [T],
  limit: usize,
  mapper: F,
) -> Result<Vec<R>, E>
where
  F: Fn(&'a T, usize) -> Fut,
  Fut: Future<Output = Result<R, E>>,
{
  if items.is_empty() {
    return Ok(Vec::new());
  }

  let cursor = AtomicUsize::new(0);
  let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..items.len()).map(|_| None).collect());
  let worker_count = limit.max(1).min(items.len());

  {
    let cursor = &cursor;
    let slots = &slots;
    let mapper = &mapper;
    let workers = (0..worker_count).map(|_| async move {
      loop {
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        if index >= items.len() {
          return Ok::<(), E>(());
        }
        let result = mapper(&items[index], index).await?;
        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
      }
    });
    try_join_all(workers).await?;
  }

  Ok(
    slots
      .into_inner()
      .unwrap_or_else(PoisonError::into_inner)
      .into_iter()
      .flatten()
      .collect(),
  )
}

/// Query every source (bounded by `config.max_concurrency`) and enrich the rows.
///
/// A source whose outcome is `ok: false` becomes a failed `SourceResult`; only
/// an `Err` from the query function itself propagates.
pub async fn fetch_sources<Q: SourceQuery>(
  query: &Q,
  sources: &[String],
  window: &Window,
  severity: SeverityMode,
  config: &Config,
) -> Result<Vec<SourceResult>, DiagnosticsError> {
  map_with_concurrency(sources, config.max_concurrency, |source, _| async move {
    let request = QueryRequest::new(source, &window.start_iso, &window.end_iso, severity, config.row_limit);
    debug!(source = %source, "querying source");
    let outcome = query.query(&request).await?;
    debug!(
      source = %source,
      ok = outcome.ok,
      status = ?outcome.status,
      rows = outcome.rows.len(),
      "source query finished"
    );

    if !outcome.ok {
      warn!(source = %source, status = ?outcome.status, "source query failed");
    }

    let entries = if outcome.ok {
      enrich::enrich(source, &outcome.rows, config)
    } else {
      Vec::new()
    };

    Ok(SourceResult {
      source: source.clone(),
      ok: outcome.ok,
      status: outcome.status,
      error: outcome.error,
      row_count: outcome.rows.len(),
      entries,
    })
  })
  .await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{QueryOutcome, RawRecord};
  use serde_json::json;
  use std::cell::Cell;
  use std::time::Duration;

  #[tokio::test]
  async fn output_order_matches_input_order() {
    // Earlier items sleep longer, so completion order is reversed.
    let items: Vec<u64> = vec![60, 40, 20, 10, 5, 1];
    let out: Vec<(usize, u64)> = map_with_concurrency(&items, 3, |delay, index| {
      let delay = *delay;
      async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, DiagnosticsError>((index, delay))
      }
    })
    .await
    .unwrap();

    assert_eq!(out.len(), items.len());
    for (i, (index, delay)) in out.iter().enumerate() {
      assert_eq!(*index, i);
      assert_eq!(*delay, items[i]);
    }
  }

  #[tokio::test]
  async fn never_exceeds_concurrency_limit() {
    let in_flight = &Cell::new(0usize);
    let peak = &Cell::new(0usize);
    let items: Vec<u32> = (0..10).collect();

    map_with_concurrency(&items, 3, |_, _| async move {
      in_flight.set(in_flight.get() + 1);
      peak.set(peak.get().max(in_flight.get()));
      tokio::time::sleep(Duration::from_millis(5)).await;
      in_flight.set(in_flight.get() - 1);
      Ok::<_, DiagnosticsError>(())
    })
    .await
    .unwrap();

    assert_eq!(peak.get(), 3);
  }

  #[tokio::test]
  async fn empty_input_yields_empty_output() {
    let items: Vec<u8> = Vec::new();
    let out = map_with_concurrency(&items, 3, |_, _| async { Ok::<u8, DiagnosticsError>(1) })
      .await
      .unwrap();
    assert!(out.is_empty());
  }

  #[tokio::test]
  async fn mapper_error_propagates() {
    let items = vec!["a", "b", "c"];
    let err = map_with_concurrency(&items, 3, |item, _| {
      let item = *item;
      async move {
        if item == "b" {
          Err(DiagnosticsError::query(item, "transport panicked"))
        } else {
          Ok(item)
        }
      }
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("transport panicked"));
  }

  struct OneFailing;

  impl SourceQuery for OneFailing {
    async fn query(&self, request: &QueryRequest) -> Result<QueryOutcome, DiagnosticsError> {
      if request.source == "b_logs" {
        return Ok(QueryOutcome::failure(Some(500), json!({"message": "upstream"})));
      }
      Ok(QueryOutcome::success(vec![RawRecord::new(
        &request.source,
        "2025-01-15T10:30:00.000Z",
        "GET /rest/v1/items status=500",
        "{}",
      )]))
    }
  }

  #[tokio::test]
  async fn failed_source_is_data_not_error() {
    let sources: Vec<String> = ["a_logs", "b_logs", "c_logs"].iter().map(|s| s.to_string()).collect();
    let window = Window::new(5.0, "2025-01-15T10:25:00.000Z", "2025-01-15T10:30:00.000Z");
    let results = fetch_sources(&OneFailing, &sources, &window, SeverityMode::Warn, &Config::default())
      .await
      .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].source, "b_logs");
    assert!(!results[1].ok);
    assert!(results[1].entries.is_empty());
    assert!(results[0].ok && results[2].ok);
    assert_eq!(results[0].entries[0].status_code, Some(500));
    assert_eq!(results[2].row_count, 1);
  }
}
