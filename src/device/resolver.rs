use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{DeviceTypeCatalog, DeviceTypeEntry};
use crate::serial::{
    AckProtocol, Result, SerialBackend, SerialError, SerialPortCandidate, SystemSerial,
};

/// Upper bound for a single blocking read, so the probe deadline is re-checked
const READ_SLICE: Duration = Duration::from_millis(100);
const IDLE_BACKOFF: Duration = Duration::from_millis(10);
/// Bytes kept while waiting for an acknowledgment
const MAX_PENDING_BYTES: usize = 512;

/// Tunables for the acknowledgment probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    /// Total time allowed for an acknowledgment to arrive
    pub timeout: Duration,
    /// Pause between opening the port and sending the request
    pub settle: Duration,
    /// Framing used by `validate` when no device type is known
    pub default_protocol: AckProtocol,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            settle: Duration::from_millis(50),
            default_protocol: AckProtocol::Esp2,
        }
    }
}

/// Discovers gateway candidates and checks that a chosen path answers.
///
/// Holds no state between calls. `detect` and the `validate*` methods block on
/// serial I/O and belong on a worker thread when driven from async code.
#[derive(Clone)]
pub struct GatewayResolver {
    catalog: DeviceTypeCatalog,
    backend: Arc<dyn SerialBackend>,
    settings: ProbeSettings,
}

impl GatewayResolver {
    pub fn new(catalog: DeviceTypeCatalog, backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            catalog,
            backend,
            settings: ProbeSettings::default(),
        }
    }

    /// Resolver using the operating system's serial ports
    pub fn system(catalog: DeviceTypeCatalog) -> Self {
        Self::new(catalog, Arc::new(SystemSerial::new()))
    }

    pub fn with_settings(mut self, settings: ProbeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &DeviceTypeCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Candidate serial paths on this host. Never fails; an enumeration error
    /// is logged and reported as no candidates.
    pub fn detect(&self) -> Vec<String> {
        self.detect_candidates()
            .into_iter()
            .map(|candidate| candidate.port_name)
            .collect()
    }

    /// Like `detect`, keeping the USB descriptors where the host reports them
    pub fn detect_candidates(&self) -> Vec<SerialPortCandidate> {
        match self.backend.available_ports() {
            Ok(candidates) => {
                log::debug!("Detected {} serial candidate(s)", candidates.len());
                candidates
            }
            Err(e) => {
                log::warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Speed required by the device type named in `label`, if any entry matches
    pub fn resolve_speed(&self, label: &str) -> Option<u32> {
        self.catalog.resolve_speed(label)
    }

    /// Catalog entry matched by `label`
    pub fn resolve(&self, label: &str) -> Option<&DeviceTypeEntry> {
        self.catalog.lookup(label)
    }

    /// Whether a gateway acknowledges on `path` at `speed`
    pub fn validate(&self, path: &str, speed: u32) -> bool {
        self.validate_with(path, speed, self.settings.default_protocol)
    }

    /// Validate `path` for the device type named in `label`, using that
    /// type's speed and framing. An unresolved label never validates.
    pub fn validate_selection(&self, path: &str, label: &str) -> bool {
        match self.catalog.lookup(label) {
            Some(entry) => self.validate_with(path, entry.baud_rate, entry.protocol),
            None => {
                log::warn!("No known device type in gateway selection {:?}", label);
                false
            }
        }
    }

    pub fn validate_with(&self, path: &str, speed: u32, protocol: AckProtocol) -> bool {
        log::debug!("Validating {} at {} baud ({})", path, speed, protocol);
        match self.probe(path, speed, protocol) {
            Ok(()) => {
                log::info!("Gateway acknowledged on {} at {} baud", path, speed);
                true
            }
            Err(e) => {
                log::warn!("Gateway path {} is invalid: {}", path, e);
                false
            }
        }
    }

    /// Open `path`, send the protocol request and wait for an acknowledgment.
    ///
    /// The port handle lives only for the duration of this call.
    pub fn probe(&self, path: &str, speed: u32, protocol: AckProtocol) -> Result<()> {
        if speed == 0 {
            return Err(SerialError::InvalidBaudRate(speed));
        }

        let read_timeout = self.settings.timeout.min(READ_SLICE);
        let mut link = self.backend.open(path, speed, read_timeout)?;

        if !self.settings.settle.is_zero() {
            std::thread::sleep(self.settings.settle);
        }

        let request = protocol.request();
        log::trace!("-> {} {}", path, hex::encode(&request));
        link.write_all(&request)?;
        link.flush()?;

        let deadline = Instant::now() + self.settings.timeout;
        let mut received = Vec::new();
        let mut chunk = [0u8; 64];

        while Instant::now() < deadline {
            match link.read(&mut chunk) {
                Ok(0) => std::thread::sleep(IDLE_BACKOFF),
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    log::trace!("<- {} {}", path, hex::encode(&chunk[..n]));
                    if protocol.is_acknowledgment(&received) {
                        return Ok(());
                    }
                    if received.len() > MAX_PENDING_BYTES {
                        let excess = received.len() - MAX_PENDING_BYTES;
                        received.drain(..excess);
                    }
                }
                Err(e) if is_quiet_line(&e) => {}
                Err(e) => return Err(SerialError::IoError(e)),
            }
        }

        if received.is_empty() {
            Err(SerialError::Timeout(self.settings.timeout.as_millis() as u64))
        } else {
            Err(SerialError::MalformedResponse(hex::encode(&received)))
        }
    }
}

/// Read errors that only mean nothing arrived within the slice
fn is_quiet_line(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

impl std::fmt::Debug for GatewayResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayResolver")
            .field("catalog", &self.catalog)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
