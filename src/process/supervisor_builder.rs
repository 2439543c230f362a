/*!
 * Supervisor Builder
 * Builder pattern for ProcessSupervisor construction
 */

use super::config::SupervisorConfig;
use super::executor::OsSpawner;
use super::supervisor::ProcessSupervisor;
use super::traits::{ProcessSpawner, SupervisorObserver};
use crate::core::errors::SupervisorResult;
use crate::runtime::RuntimeLoader;
use std::sync::Arc;
use tracing::info;

/// Builder for ProcessSupervisor
pub struct SupervisorBuilder {
    spawner: Option<Arc<dyn ProcessSpawner>>,
    config: SupervisorConfig,
    runtime: Option<Arc<RuntimeLoader>>,
}

impl SupervisorBuilder {
    /// Create a new builder: OS processes, default config, no runtime preflight
    pub fn new() -> Self {
        Self {
            spawner: None,
            config: SupervisorConfig::default(),
            runtime: None,
        }
    }

    /// Replace the OS spawner, e.g. with a scripted fake
    pub fn with_spawner(mut self, spawner: impl ProcessSpawner + 'static) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the runtime entry point from the options' runtime home before
    /// every spawn
    pub fn with_runtime_loader(mut self, loader: Arc<RuntimeLoader>) -> Self {
        self.runtime = Some(loader);
        self
    }

    /// Build the supervisor; `observer` receives every notification
    pub fn build<O: SupervisorObserver>(self, observer: O) -> SupervisorResult<ProcessSupervisor> {
        let mut features = Vec::new();
        if self.spawner.is_some() {
            features.push("custom spawner");
        }
        if self.runtime.is_some() {
            features.push("runtime preflight");
        }

        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(OsSpawner::new()) as Arc<dyn ProcessSpawner>);

        info!(
            marker = %self.config.readiness_marker,
            chunk = self.config.read_chunk_size,
            features = ?features,
            "Process supervisor initialized"
        );

        ProcessSupervisor::from_parts(observer, spawner, self.config, self.runtime)
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
