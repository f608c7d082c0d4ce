//! Factory configuration
//!
//! Read from the `[typeloom]` table of a TOML document:
//!
//! ```toml
//! [typeloom]
//! async_workers = 4
//! type_name_suffix = "$Generated"
//! default_must_implement = "required"
//! log_target = "calls"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{WeaveError, WeaveResult};
use crate::model::MustImplementPolicy;

/// Factory settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Worker threads for asynchronous members (0 = one per CPU)
    pub async_workers: usize,

    /// Suffix appended to the source name of a generated type
    pub type_name_suffix: String,

    /// Policy for interface members nothing implements, unless a marker says otherwise
    pub default_must_implement: MustImplementPolicy,

    /// Logger name reported by the default call-logging output
    pub log_target: String,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            async_workers: 0,
            type_name_suffix: "$Generated".to_string(),
            default_must_implement: MustImplementPolicy::Required,
            log_target: "typeloom::call".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    typeloom: Option<FactoryConfig>,
}

impl FactoryConfig {
    /// Parse from a TOML document; a missing `[typeloom]` table means defaults
    pub fn from_toml_str(content: &str) -> WeaveResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| WeaveError::Config(format!("Failed to parse config: {}", e)))?;
        let config = file.typeloom.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML file
    pub fn from_file(path: &Path) -> WeaveResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WeaveError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Check the settings
    pub fn validate(&self) -> WeaveResult<()> {
        if self.type_name_suffix.is_empty() {
            return Err(WeaveError::Config("type_name_suffix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Worker count with the CPU default applied
    pub fn worker_count(&self) -> usize {
        if self.async_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.async_workers
        }
    }
}
