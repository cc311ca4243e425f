use serde::Serialize;

use super::{CatalogError, DeviceTypeEntry, Result};
use crate::serial::AckProtocol;

/// Ordered mapping from device type identifier to line speed.
///
/// Lookups match identifiers as substrings of a longer selection label and the
/// first entry in authored order wins, so order must never be rearranged.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct DeviceTypeCatalog {
    entries: Vec<DeviceTypeEntry>,
}

impl DeviceTypeCatalog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build a catalog, rejecting empty or repeated identifiers and zero speeds
    pub fn from_entries(entries: Vec<DeviceTypeEntry>) -> Result<Self> {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.push(entry)?;
        }
        Ok(catalog)
    }

    /// Gateways supported by the Eltako integration
    pub fn eltako() -> Self {
        Self {
            entries: vec![
                DeviceTypeEntry::new("fam14", 57600),
                DeviceTypeEntry::new("fgw14usb", 57600),
                DeviceTypeEntry::new("fam-usb", 9600),
                DeviceTypeEntry::new("enocean-usb300", 57600).with_protocol(AckProtocol::Esp3),
            ],
        }
    }

    /// Append an entry after all existing ones
    pub fn push(&mut self, entry: DeviceTypeEntry) -> Result<()> {
        if entry.identifier.is_empty() {
            return Err(CatalogError::EmptyIdentifier);
        }
        if entry.baud_rate == 0 {
            return Err(CatalogError::ZeroBaudRate(entry.identifier));
        }
        if self.entries.iter().any(|e| e.identifier == entry.identifier) {
            return Err(CatalogError::DuplicateIdentifier(entry.identifier));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// First entry whose identifier occurs in `label`
    pub fn lookup(&self, label: &str) -> Option<&DeviceTypeEntry> {
        self.entries.iter().find(|entry| {
            log::trace!("Matching device type {} against {}", entry.identifier, label);
            label.contains(entry.identifier.as_str())
        })
    }

    /// Speed of the first entry whose identifier occurs in `label`
    pub fn resolve_speed(&self, label: &str) -> Option<u32> {
        self.lookup(label).map(|entry| entry.baud_rate)
    }

    pub fn entries(&self) -> &[DeviceTypeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
