//! Structured error types for the diagnostics engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
  /// The per-source query function itself failed (not an `ok: false` outcome).
  #[error("query: {log_source}: {message}")]
  Query { log_source: String, message: String },

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl DiagnosticsError {
  pub fn query(source: &str, message: impl Into<String>) -> Self {
    Self::Query {
      log_source: source.to_string(),
      message: message.into(),
    }
  }

  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}
