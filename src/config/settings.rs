use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::device::{ConfiguredGateway, DeviceTypeCatalog, DeviceTypeEntry, ProbeSettings};

/// Gateway setup settings, read from a TOML file.
///
/// ```toml
/// probe_timeout_ms = 2000
/// serial_path = "/dev/ttyUSB0"
///
/// [[device_type]]
/// identifier = "fam14"
/// baud_rate = 57600
///
/// [[gateway]]
/// id = 1
/// name = "Distribution board"
/// device_type = "fam14"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub probe_timeout_ms: u64,
    pub settle_ms: u64,
    /// Gateway path fixed by the administrator; skips detection entirely
    pub serial_path: Option<String>,
    /// Where validated entries are written
    pub entry_store: Option<PathBuf>,
    /// Device type catalog in match order; empty means the built-in catalog
    #[serde(rename = "device_type")]
    pub device_types: Vec<DeviceTypeEntry>,
    #[serde(rename = "gateway")]
    pub gateways: Vec<ConfiguredGateway>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            settle_ms: 50,
            serial_path: None,
            entry_store: None,
            device_types: Vec::new(),
            gateways: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&content)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "probe_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(path) = &self.serial_path {
            if path.trim().is_empty() {
                return Err(ConfigError::InvalidValue("serial_path is empty".to_string()));
            }
        }
        self.catalog()?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<DeviceTypeCatalog> {
        if self.device_types.is_empty() {
            return Ok(DeviceTypeCatalog::eltako());
        }
        Ok(DeviceTypeCatalog::from_entries(self.device_types.clone())?)
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_millis(self.probe_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
            ..ProbeSettings::default()
        }
    }

    /// Device choices offered to the user. Without declared gateways the
    /// catalog identifiers themselves are offered.
    pub fn gateway_labels(&self) -> Result<Vec<String>> {
        if !self.gateways.is_empty() {
            return Ok(self.gateways.iter().map(ConfiguredGateway::label).collect());
        }
        Ok(self
            .catalog()?
            .entries()
            .iter()
            .map(|entry| entry.identifier.clone())
            .collect())
    }
}
