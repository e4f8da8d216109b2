//! Binary entrypoint: read one run bundle from stdin, write one report to stdout.
//!
//! The output is either a Report or, when the bundle is invalid, an
//! ErrorOutput. Logs go to stderr.

use std::io::{self, Read, Write};

use chrono::Utc;
use log_diagnostics::types::ErrorOutput;
use log_diagnostics::{DiagnosticsError, Engine, RunBundle};
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "log_diagnostics=info".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();
}

async fn run(input: &str) -> Result<log_diagnostics::Report, DiagnosticsError> {
  let bundle: RunBundle = serde_json::from_str(input)?;
  let engine = Engine::new(bundle.config.clone().unwrap_or_default());
  let options = bundle.options(engine.config(), Utc::now())?;
  engine.run(&bundle.fixture(), &options).await
}

#[tokio::main]
async fn main() {
  init_logging();

  let mut input = String::new();
  if let Err(e) = io::stdin().read_to_string(&mut input) {
    error!(error = %e, "failed to read stdin");
    std::process::exit(1);
  }

  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  let written = match run(&input).await {
    Ok(report) => serde_json::to_writer(&mut out, &report),
    Err(e) => {
      error!(error = %e, "diagnostics run failed");
      let err = match &e {
        DiagnosticsError::Validation { field, reason } => ErrorOutput::new(reason.clone()).with_field(field.clone()),
        _ => ErrorOutput::new(e.to_string()),
      };
      serde_json::to_writer(&mut out, &err)
    }
  };

  if let Err(e) = written.map_err(io::Error::from).and_then(|_| writeln!(out)).and_then(|_| out.flush()) {
    error!(error = %e, "failed to write output");
    std::process::exit(1);
  }
}
