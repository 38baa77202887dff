//! Manager defaults.
//!
//! Every field has a default matching the platform constants, so a config
//! file only needs the keys it overrides:
//!
//! ```toml
//! default_memory_limit = 4294967296
//! default_machine_image = "eclipse/ubuntu_jdk8"
//! parse_cache_capacity = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Applied when neither the machine attributes nor the recipe carry a limit.
    pub default_memory_limit: u64,
    /// Image used by `create_machine` when the caller gives none.
    pub default_machine_image: String,
    /// Installer that marks a machine as the dev machine.
    pub workspace_agent: String,
    /// Installer added alongside the workspace agent.
    pub terminal_agent: String,
    /// Name of the implicit machine of single-machine recipes.
    pub default_machine_name: String,
    /// Entries kept by the YAML parse caches; zero disables caching.
    pub parse_cache_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_memory_limit: 2 * GIB,
            default_machine_image: "eclipse/ubuntu_jdk8".to_string(),
            workspace_agent: "org.eclipse.che.ws-agent".to_string(),
            terminal_agent: "org.eclipse.che.terminal".to_string(),
            default_machine_name: "dev-machine".to_string(),
            parse_cache_capacity: 5,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(input).map_err(|err| Error::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|err| Error::config(format!("{}: {err}", path.display())))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.default_memory_limit == 0 {
            return Err(Error::config("default_memory_limit must be positive"));
        }
        if self.workspace_agent.trim().is_empty() {
            return Err(Error::config("workspace_agent cannot be empty"));
        }
        if self.default_machine_name.trim().is_empty() {
            return Err(Error::config("default_machine_name cannot be empty"));
        }
        Ok(())
    }
}
