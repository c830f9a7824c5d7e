use std::path::Path;

use anyhow::Context as _;
use ida_backend::BackendConfig;
use ida_health::HealthConfig;
use ida_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Everything the `ida` binary can be configured with. Every section and
/// field is optional in the file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdaConfig {
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub health: HealthConfig,
}

impl IdaConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
