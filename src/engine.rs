//! Engine configuration.
use crate::buffer::{Device, Layout};
use crate::exec::{Executor, DEFAULT_PARALLEL_THRESHOLD};
use crate::integrators::AssemblyVariant;
use serde::{Deserialize, Serialize};

/// Settings that every form and layout created through an [`Engine`] share.
///
/// Missing fields take their default values when deserializing, so a configuration file only
/// needs to name the settings it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The algorithm variant used to resolve integrators.
    pub variant: AssemblyVariant,
    /// Residency of layouts created by the engine.
    pub device: Device,
    pub parallel_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variant: AssemblyVariant::default(),
            device: Device::Host,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Hands out layouts and executors according to an [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn variant(&self) -> AssemblyVariant {
        self.config.variant
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.config.parallel_threshold)
    }

    pub fn layout(&self, size: usize) -> Layout {
        Layout::new(size, self.config.device)
    }
}

impl From<EngineConfig> for Engine {
    fn from(config: EngineConfig) -> Self {
        Self::new(config)
    }
}
