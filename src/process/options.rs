/*!
 * Startup Options
 * Immutable description of how to invoke the server, rendered into argv
 */

use crate::core::limits::DEFAULT_MEMORY_LIMIT;
use serde::{Deserialize, Serialize};

/// Tuning flags passed to the runtime before anything else
const TUNING_FLAGS: &[&str] = &["--enable-preview", "-XX:+UseZGC", "-XX:+ZGenerational"];

/// Internal flags the server expects from any launcher
const FEATURE_FLAGS: &[&str] = &[
    "--add-exports",
    "java.base/sun.nio.ch=ALL-UNNAMED",
    "--add-exports",
    "java.base/jdk.internal.access=ALL-UNNAMED",
    "-Ddhfs.objects.writeback.limit=134217728",
    "-Ddhfs.objects.lru.limit=134217728",
];

/// How to launch the supervised server
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StartupOptions {
    /// Runtime install directory; the executable is `<runtime_home>/bin/java`
    pub runtime_home: String,
    /// Heap limit, e.g. `512m`
    pub memory_limit: String,
    /// FUSE mount point
    pub mount_path: String,
    /// Object store root
    pub data_path: String,
    /// Directory with the web UI assets
    pub webui_path: String,
    /// Server payload (jar)
    pub payload_path: String,
    /// Extra flags appended after the path flags, in order
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

impl StartupOptions {
    pub fn new(runtime_home: impl Into<String>, payload_path: impl Into<String>) -> Self {
        Self {
            runtime_home: runtime_home.into(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            payload_path: payload_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    #[must_use]
    pub fn with_mount_path(mut self, path: impl Into<String>) -> Self {
        self.mount_path = path.into();
        self
    }

    #[must_use]
    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = path.into();
        self
    }

    #[must_use]
    pub fn with_webui_path(mut self, path: impl Into<String>) -> Self {
        self.webui_path = path.into();
        self
    }

    #[must_use]
    pub fn with_extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Read options from `LAUNCHER_*` environment variables
    ///
    /// Unset variables become empty strings; nothing is validated here.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        let memory_limit = std::env::var("LAUNCHER_MEMORY_LIMIT")
            .unwrap_or_else(|_| DEFAULT_MEMORY_LIMIT.to_string());

        Self {
            runtime_home: var("LAUNCHER_RUNTIME_HOME"),
            memory_limit,
            mount_path: var("LAUNCHER_MOUNT_PATH"),
            data_path: var("LAUNCHER_DATA_PATH"),
            webui_path: var("LAUNCHER_WEBUI_PATH"),
            payload_path: var("LAUNCHER_PAYLOAD_PATH"),
            extra_flags: var("LAUNCHER_EXTRA_FLAGS")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path of the runtime executable
    pub fn executable(&self) -> String {
        format!("{}/bin/java", self.runtime_home)
    }

    /// Render the argument vector, executable first
    ///
    /// The server's argument parser is order-sensitive, so the layout is fixed:
    /// executable, tuning flags, heap limit, feature flags, path flags, extra
    /// flags, payload.
    pub fn build_arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(
            TUNING_FLAGS.len() + FEATURE_FLAGS.len() + self.extra_flags.len() + 7,
        );

        args.push(self.executable());
        args.extend(TUNING_FLAGS.iter().map(|s| s.to_string()));
        args.push(format!("-Xmx{}", self.memory_limit));
        args.extend(FEATURE_FLAGS.iter().map(|s| s.to_string()));
        args.push(format!("-Ddhfs.fuse.root={}", self.mount_path));
        args.push(format!("-Ddhfs.objects.persistence.files.root={}", self.data_path));
        args.push(format!("-Ddhfs.webui.root={}", self.webui_path));
        args.extend(self.extra_flags.iter().cloned());
        args.push("-jar".to_string());
        args.push(self.payload_path.clone());

        args
    }
}
