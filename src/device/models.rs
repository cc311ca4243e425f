use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serial::AckProtocol;

/// One device family and the line speed its gateway runs at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceTypeEntry {
    pub identifier: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub protocol: AckProtocol,
}

impl DeviceTypeEntry {
    pub fn new(identifier: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            identifier: identifier.into(),
            baud_rate,
            protocol: AckProtocol::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: AckProtocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// The record handed to the entry store once a gateway path has validated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub serial_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl GatewayConfig {
    pub fn new(serial_path: impl Into<String>) -> Self {
        Self {
            serial_path: serial_path.into(),
            device: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// A persisted configuration entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigEntry {
    pub entry_id: Uuid,
    pub title: String,
    pub data: GatewayConfig,
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, data: GatewayConfig) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            title: title.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// A gateway declared in the settings file, offered as a device choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredGateway {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub device_type: String,
}

impl ConfiguredGateway {
    /// Label shown to the user; it embeds the device type so the catalog can match it
    pub fn label(&self) -> String {
        let name = self.name.as_deref().unwrap_or("Gateway");
        format!("{} - {} (Id: {})", name, self.device_type, self.id)
    }
}
