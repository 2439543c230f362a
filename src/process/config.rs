/*!
 * Supervisor Configuration
 */

use crate::core::limits::{MAX_SCANNED_LINE_BYTES, READINESS_MARKER, READ_CHUNK_SIZE};

/// Tunables for a [`ProcessSupervisor`](super::ProcessSupervisor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Substring on stdout that moves the run from Starting to Running
    pub readiness_marker: String,

    /// Bytes requested per stream read (default: 1024)
    pub read_chunk_size: usize,

    /// Longest partial line the readiness scanner buffers (default: 64KB)
    pub max_scanned_line: usize,
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self {
            readiness_marker: READINESS_MARKER.to_string(),
            read_chunk_size: READ_CHUNK_SIZE,
            max_scanned_line: MAX_SCANNED_LINE_BYTES,
        }
    }

    /// Defaults overridden by `LAUNCHER_READINESS_MARKER` and `LAUNCHER_READ_CHUNK`
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(marker) = std::env::var("LAUNCHER_READINESS_MARKER") {
            if !marker.is_empty() {
                config.readiness_marker = marker;
            }
        }
        if let Some(chunk) = std::env::var("LAUNCHER_READ_CHUNK")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            config.read_chunk_size = chunk;
        }

        config
    }

    #[must_use]
    pub fn with_readiness_marker(mut self, marker: impl Into<String>) -> Self {
        self.readiness_marker = marker.into();
        self
    }

    #[must_use]
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_scanned_line(mut self, bytes: usize) -> Self {
        self.max_scanned_line = bytes;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}
