/*!
 * Structured Tracing
 * Tracing setup for the launcher and per-run spans for the supervised process
 *
 * Features:
 * - Trace ID per supervised run for log correlation
 * - JSON-formatted logs for structured parsing
 * - Run duration and exit status recorded when the run ends
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - LAUNCHER_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("LAUNCHER_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .init();
        info!("Structured tracing initialized");
    }
}

/// Generate a unique trace ID for run correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one Start-to-Stopped cycle of the supervised process
pub struct RunSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl RunSpan {
    pub fn new(run_id: u64) -> Self {
        let trace_id = generate_trace_id();

        let span = span!(
            Level::INFO,
            "supervised_run",
            trace_id = %trace_id,
            run_id = run_id,
            pid = tracing::field::Empty,
            exit = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let _entered = span.enter();
        debug!(run_id, trace_id = %trace_id, "run started");
        drop(_entered);

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_pid(&self, pid: u32) {
        self.span.record("pid", pid);
    }

    pub fn record_exit(&self, exit: &str) {
        self.span.record("exit", exit);
    }
}

impl Drop for RunSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", duration.as_millis());

        // A run shorter than a second usually means the server died during startup
        if duration.as_secs() == 0 {
            warn!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis(),
                short = true,
                "run ended shortly after start"
            );
        } else {
            info!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis(),
                "run finished"
            );
        }
    }
}
