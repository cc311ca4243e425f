//! Interactive gateway setup.
//!
//! Three steps: `user` (entry point), `detect` (pick a detected port) and
//! `manual` (type a path). Blocking serial work is handed to tokio's blocking
//! pool so the async caller stays responsive.

pub mod store;

pub use store::{EntryStore, JsonEntryStore, MemoryEntryStore, StoreError};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Settings};
use crate::device::{ConfigEntry, GatewayConfig, GatewayResolver};
use crate::serial::{SerialBackend, SerialError};

pub const ENTRY_TITLE: &str = "Eltako";
/// Choice in the detect form that switches to manual entry
pub const MANUAL_PATH_VALUE: &str = "Custom path";
pub const CONF_DEVICE: &str = "device";
pub const CONF_SERIAL_PATH: &str = "serial_path";
pub const ERROR_INVALID_GATEWAY_PATH: &str = "invalid_gateway_path";
pub const ABORT_SINGLE_INSTANCE: &str = "single_instance_allowed";

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Entry store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    User,
    Detect,
    Manual,
}

/// What the user submitted on a form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupInput {
    pub device: String,
    pub serial_path: String,
}

impl SetupInput {
    pub fn new(device: impl Into<String>, serial_path: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            serial_path: serial_path.into(),
        }
    }

    fn into_config(self) -> GatewayConfig {
        GatewayConfig::new(self.serial_path.trim()).with_device(self.device)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Select { options: Vec<String> },
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl FormField {
    fn select(name: &str, options: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Select { options },
            required: true,
            default: None,
        }
    }

    fn text(name: &str, default: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text,
            required: true,
            default,
        }
    }
}

/// Outcome of a flow step
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        step_id: FlowStep,
        fields: Vec<FormField>,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        entry: ConfigEntry,
    },
    Abort {
        reason: String,
    },
}

impl FlowResult {
    pub fn step_id(&self) -> Option<FlowStep> {
        match self {
            FlowResult::Form { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }
}

/// Marks a path as being probed; a second probe of the same path is refused
/// until the guard drops.
struct ProbeGuard {
    path: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ProbeGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        path: &str,
    ) -> std::result::Result<Self, SerialError> {
        let mut paths = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !paths.insert(path.to_string()) {
            return Err(SerialError::PortBusy(path.to_string()));
        }
        Ok(Self {
            path: path.to_string(),
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let mut paths = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        paths.remove(&self.path);
    }
}

/// Drives gateway setup against a resolver and an entry store
pub struct SetupFlow {
    resolver: GatewayResolver,
    store: Arc<dyn EntryStore>,
    preset_path: Option<String>,
    device_labels: Vec<String>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SetupFlow {
    pub fn new(
        resolver: GatewayResolver,
        store: Arc<dyn EntryStore>,
        device_labels: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            preset_path: None,
            device_labels,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        backend: Arc<dyn SerialBackend>,
        store: Arc<dyn EntryStore>,
    ) -> Result<Self> {
        let resolver = GatewayResolver::new(settings.catalog()?, backend)
            .with_settings(settings.probe_settings());
        let flow = Self::new(resolver, store, settings.gateway_labels()?)
            .with_preset_path(settings.serial_path.clone());
        Ok(flow)
    }

    /// Serial path configured up front; `step_user` stores it without asking
    pub fn with_preset_path(mut self, path: Option<String>) -> Self {
        self.preset_path = path;
        self
    }

    pub fn resolver(&self) -> &GatewayResolver {
        &self.resolver
    }

    /// Entry point of the flow
    pub async fn step_user(&self) -> Result<FlowResult> {
        if let Some(path) = &self.preset_path {
            log::info!("Using configured gateway path {}", path);
            return self.create_entry(GatewayConfig::new(path.clone())).await;
        }

        if !self.store.entries().await?.is_empty() {
            return Ok(FlowResult::Abort {
                reason: ABORT_SINGLE_INSTANCE.to_string(),
            });
        }

        self.step_detect(None).await
    }

    /// Offer detected ports, or validate the one the user picked
    pub async fn step_detect(&self, input: Option<SetupInput>) -> Result<FlowResult> {
        let mut errors = HashMap::new();
        let mut submitted = None;

        if let Some(input) = input {
            if input.serial_path == MANUAL_PATH_VALUE {
                return self.step_manual(None).await;
            }
            if self.validate_input(&input).await? {
                return self.create_entry(input.into_config()).await;
            }
            errors.insert(CONF_SERIAL_PATH.to_string(), ERROR_INVALID_GATEWAY_PATH.to_string());
            submitted = Some(input.serial_path);
        }

        let resolver = self.resolver.clone();
        let mut serial_paths = tokio::task::spawn_blocking(move || resolver.detect()).await?;

        if serial_paths.is_empty() {
            log::info!("No serial ports detected, asking for a path");
            // Keep the error and the path of a failed submission
            return Ok(self.manual_form(submitted, errors));
        }

        serial_paths.push(MANUAL_PATH_VALUE.to_string());

        Ok(FlowResult::Form {
            step_id: FlowStep::Detect,
            fields: vec![
                FormField::select(CONF_DEVICE, self.device_labels.clone()),
                FormField::select(CONF_SERIAL_PATH, serial_paths),
            ],
            errors,
        })
    }

    /// Ask for a path by hand, or validate the one typed in
    pub async fn step_manual(&self, input: Option<SetupInput>) -> Result<FlowResult> {
        let mut default_value = None;
        let mut errors = HashMap::new();

        if let Some(input) = input {
            if self.validate_input(&input).await? {
                return self.create_entry(input.into_config()).await;
            }
            default_value = Some(input.serial_path);
            errors.insert(CONF_SERIAL_PATH.to_string(), ERROR_INVALID_GATEWAY_PATH.to_string());
        }

        Ok(self.manual_form(default_value, errors))
    }

    fn manual_form(
        &self,
        default_value: Option<String>,
        errors: HashMap<String, String>,
    ) -> FlowResult {
        FlowResult::Form {
            step_id: FlowStep::Manual,
            fields: vec![
                FormField::select(CONF_DEVICE, self.device_labels.clone()),
                FormField::text(CONF_SERIAL_PATH, default_value),
            ],
            errors,
        }
    }

    /// Probe the submitted path on the blocking pool
    pub async fn validate_input(&self, input: &SetupInput) -> Result<bool> {
        let serial_path = input.serial_path.trim().to_string();
        log::debug!("serial_path: {}", serial_path);
        log::debug!("gateway_selection: {}", input.device);

        if serial_path.is_empty() {
            return Ok(false);
        }

        let guard = match ProbeGuard::acquire(&self.in_flight, &serial_path) {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("Not probing: {}", e);
                return Ok(false);
            }
        };

        let resolver = self.resolver.clone();
        let label = input.device.clone();
        let valid = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            resolver.validate_selection(&serial_path, &label)
        })
        .await?;

        Ok(valid)
    }

    async fn create_entry(&self, config: GatewayConfig) -> Result<FlowResult> {
        let entry = self.store.create(ConfigEntry::new(ENTRY_TITLE, config)).await?;
        Ok(FlowResult::CreateEntry { entry })
    }
}
