/*!
 * Launcher Limits and Constants
 *
 * Centralized location for supervisor-wide limits, markers, and magic numbers.
 * Organized by domain for maintainability and discoverability.
 */

// =============================================================================
// OUTPUT STREAMS
// =============================================================================

/// Bytes requested per read from the child's stdout/stderr
/// Each successful read is forwarded to the observer as one output notification
pub const READ_CHUNK_SIZE: usize = 1024;

/// Longest line the readiness scanner buffers before discarding its head (64KB)
/// Keeps a chatty process without newlines from growing the buffer unbounded
pub const MAX_SCANNED_LINE_BYTES: usize = 64 * 1024;

// =============================================================================
// READINESS
// =============================================================================

/// Substring the server prints on stdout once it accepts connections
pub const READINESS_MARKER: &str = "Listening on:";

// =============================================================================
// THREADS
// =============================================================================

/// Name of the thread delivering observer notifications
pub const DISPATCHER_THREAD_NAME: &str = "supervisor-events";

// =============================================================================
// RUNTIME
// =============================================================================

/// Exported symbol resolved from the JVM shared library
pub const JVM_ENTRY_SYMBOL: &str = "JNI_CreateJavaVM";

/// Default heap limit handed to the server
pub const DEFAULT_MEMORY_LIMIT: &str = "512m";
