/*!
 * Monitoring
 * Tracing setup and run-level spans
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, RunSpan};
