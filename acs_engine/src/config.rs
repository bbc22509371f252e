use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables for the interpreter. Every field falls back to the classic
/// engine value when absent from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instructions a single instance may run in one tick before it is
    /// terminated as a runaway.
    pub runaway_limit: u32,
    /// Ticks an open script waits before its first slice.
    pub open_script_delay: u32,
    /// Ticks a deferred execute waits after its map loads.
    pub deferred_start_delay: u32,
    /// Maximum print buffer size in bytes.
    pub print_buffer_limit: usize,
    /// Seed for `Random`; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            runaway_limit: 500_000,
            open_script_delay: 35,
            deferred_start_delay: 35,
            print_buffer_limit: 256,
            rng_seed: None,
        }
    }
}

impl VmConfig {
    /// Loads a config from JSON. A missing path or a path that does not
    /// exist yields the defaults.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(VmConfig::default());
        };
        if !path.exists() {
            log::warn!("config {} not found; using defaults", path.display());
            return Ok(VmConfig::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read vm config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse vm config json: {}", path.display()))
    }
}
