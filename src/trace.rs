//! Logging setup and the per-record decision trace.
//!
//! Console output goes to stderr under `RUST_LOG` (default `info`). Every
//! event, plus the decision trace, is also appended to the trace file
//! without ANSI colors.

use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::ConfigError;
use crate::pipeline::types::TraceEvent;

/// Target of decision-trace events; kept out of the console.
pub const TRACE_TARGET: &str = "mail_labeler::decisions";

pub const DEFAULT_TRACE_FILE: &str = "trace.txt";

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered trace lines are lost.
pub fn init_logging(trace_file: &Path) -> Result<WorkerGuard, ConfigError> {
    let dir = trace_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = trace_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_TRACE_FILE.to_string());

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| ConfigError::InvalidValue {
            key: "trace_file".to_string(),
            message: format!("{}: {e}", trace_file.display()),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_filter(filter_fn(|meta| meta.target() != TRACE_TARGET));

    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new(format!("info,{TRACE_TARGET}=trace")));

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(guard)
}

/// Write one record's decision trace as structured events.
pub fn emit_trace(record_index: usize, events: &[TraceEvent]) {
    for event in events {
        let source = event.source.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        let label = event.label.as_deref().unwrap_or("-");
        let neighbors = if event.neighbors.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&event.neighbors).unwrap_or_default()
        };
        info!(
            target: TRACE_TARGET,
            record = record_index,
            kind = %event.kind,
            step = %event.step,
            source = %source,
            label,
            confidence = event.confidence,
            detail = %event.detail,
            neighbors = %neighbors,
            "decision"
        );
    }
}
