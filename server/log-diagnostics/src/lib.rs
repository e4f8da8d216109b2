//! Log diagnostics & correlation engine: deterministic, heuristic triage.
//!
//! Pulls log rows from several independent sources through a bounded worker
//! pool, enriches each row with extracted fields, a severity and a signature,
//! diagnoses failures, correlates them across sources (and against an optional
//! browser HAR trace), and emits one structured report JSON.
//!
//! No AI, no DB. The network transport sits behind [`query::SourceQuery`].

pub mod config;
pub mod correlation;
pub mod diagnose;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod har;
pub mod query;
pub mod report;
pub mod signature;
pub mod types;

pub use config::Config;
pub use engine::{Engine, FixtureQuery, RunBundle, RunOptions};
pub use error::DiagnosticsError;
pub use query::{SeverityMode, SourceQuery};
pub use report::Report;
pub use types::{EnrichedRecord, RawRecord, SourceResult};
