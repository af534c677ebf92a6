//! Process-wide backend configuration and the JSON-loadable GAN configuration.
//!
//! The backend settings are applied once, before any model is constructed,
//! through [`initialize_backend`]. They live for the rest of the process; no
//! teardown exists.

use crate::architecture::{DiscriminatorConfig, GeneratorConfig};
use crate::error::{GanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Environment flag read by OpenMP runtimes to tolerate a second copy of the
/// native math library being loaded into the process.
pub const DUPLICATE_LIB_ENV: &str = "KMP_DUPLICATE_LIB_OK";

/// How the backend obtains memory for activations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryPolicy {
    /// Allocate incrementally as tensors are produced.
    #[default]
    Growth,
    /// Reserve a fixed budget up front and refuse graphs that do not fit.
    Preallocate { limit_bytes: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub memory_policy: MemoryPolicy,
    pub tolerate_duplicate_native_libs: bool,
    /// Seed for the backend RNG (dropout masks in training mode).
    pub seed: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            memory_policy: MemoryPolicy::Growth,
            tolerate_duplicate_native_libs: true,
            seed: 0,
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if let MemoryPolicy::Preallocate { limit_bytes: 0 } = self.memory_policy {
            return Err(GanError::BackendConfiguration(
                "a preallocated memory budget must be larger than zero bytes".to_string(),
            ));
        }
        Ok(())
    }
}

static BACKEND_CONFIG: OnceLock<BackendConfig> = OnceLock::new();

/// Applies the backend configuration for the lifetime of the process.
///
/// Calling it again with an identical configuration is a no-op; a different
/// configuration is rejected, since the settings cannot change once applied.
pub fn initialize_backend(config: &BackendConfig) -> Result<&'static BackendConfig> {
    config.validate()?;

    let installed = BACKEND_CONFIG.get_or_init(|| {
        if config.tolerate_duplicate_native_libs {
            std::env::set_var(DUPLICATE_LIB_ENV, "TRUE");
        }
        info!(
            memory_policy = ?config.memory_policy,
            tolerate_duplicate_native_libs = config.tolerate_duplicate_native_libs,
            "backend initialized"
        );
        config.clone()
    });

    if installed != config {
        warn!(?installed, requested = ?config, "conflicting backend configuration");
        return Err(GanError::BackendConfiguration(format!(
            "backend already initialized with {:?}",
            installed
        )));
    }
    Ok(installed)
}

/// The configuration installed by [`initialize_backend`], if any.
pub fn global_backend_config() -> Option<&'static BackendConfig> {
    BACKEND_CONFIG.get()
}

/// Everything needed to build and run a generator/discriminator pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanConfig {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub latent_dim: usize,
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    pub backend: BackendConfig,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            height: 128,
            width: 128,
            channels: 3,
            latent_dim: 100,
            generator: GeneratorConfig::default(),
            discriminator: DiscriminatorConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl GanConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
