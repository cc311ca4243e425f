use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPortType};

use super::{Result, SerialError, SerialPortCandidate};

/// Stable, per-device symlinks maintained by udev
pub const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";

/// An open, byte-oriented connection to a gateway.
///
/// The handle is released when the box is dropped.
pub trait GatewayLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> GatewayLink for T {}

/// Host access to serial endpoints
pub trait SerialBackend: Send + Sync {
    /// List the serial endpoints currently attached to the host
    fn available_ports(&self) -> Result<Vec<SerialPortCandidate>>;

    /// Open `path` at `baud_rate`; individual reads give up after `read_timeout`
    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn GatewayLink>>;
}

/// Serial backend talking to the operating system through `serialport`
#[derive(Debug, Clone)]
pub struct SystemSerial {
    by_id_dir: Option<PathBuf>,
}

impl SystemSerial {
    pub fn new() -> Self {
        let by_id_dir = if cfg!(target_os = "linux") {
            Some(PathBuf::from(SERIAL_BY_ID_DIR))
        } else {
            None
        };
        Self { by_id_dir }
    }

    /// Use a different directory of stable device links (or none at all)
    pub fn with_by_id_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.by_id_dir = dir;
        self
    }

    fn enumerate_system_ports() -> Result<Vec<SerialPortCandidate>> {
        let ports = serialport::available_ports()?;
        let mut candidates = Vec::new();

        for port in ports {
            match port.port_type {
                SerialPortType::UsbPort(usb_info) => {
                    log::debug!(
                        "Found USB serial port {} ({:04x}:{:04x})",
                        port.port_name,
                        usb_info.vid,
                        usb_info.pid
                    );
                    candidates.push(SerialPortCandidate {
                        port_name: port.port_name,
                        vid: Some(usb_info.vid),
                        pid: Some(usb_info.pid),
                        serial_number: usb_info.serial_number,
                        manufacturer: usb_info.manufacturer,
                        product: usb_info.product,
                    });
                }
                // Gateways are wired, never paired over the air
                SerialPortType::BluetoothPort => {
                    log::debug!("Skipping bluetooth port {}", port.port_name);
                }
                SerialPortType::PciPort | SerialPortType::Unknown => {
                    candidates.push(SerialPortCandidate::from_path(port.port_name));
                }
            }
        }

        Ok(candidates)
    }

    fn enumerate_by_id(&self) -> Vec<SerialPortCandidate> {
        let Some(dir) = &self.by_id_dir else {
            return Vec::new();
        };

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("No stable serial links in {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut paths: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.path().to_str().map(str::to_string))
            .collect();
        paths.sort();
        paths.into_iter().map(SerialPortCandidate::from_path).collect()
    }
}

impl Default for SystemSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialBackend for SystemSerial {
    fn available_ports(&self) -> Result<Vec<SerialPortCandidate>> {
        // Stable links first, they survive re-plugging
        let mut candidates = self.enumerate_by_id();
        candidates.extend(Self::enumerate_system_ports()?);

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.port_name.clone()));
        Ok(candidates)
    }

    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn GatewayLink>> {
        if baud_rate == 0 {
            return Err(SerialError::InvalidBaudRate(baud_rate));
        }

        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(path.to_string()),
                _ => SerialError::ConnectionFailed(format!("{}: {}", path, e)),
            })?;

        if let Err(e) = port.clear(ClearBuffer::All) {
            log::debug!("Could not clear buffers on {}: {}", path, e);
        }

        log::debug!("Opened {} at {} baud", path, baud_rate);
        Ok(Box::new(port))
    }
}
