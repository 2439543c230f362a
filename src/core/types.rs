/*!
 * Core Types
 * Common types used across the launcher
 */

/// OS-level process ID
pub type Pid = u32;

/// Monotonic identifier of one Start-to-Stopped cycle
pub type RunId = u64;
