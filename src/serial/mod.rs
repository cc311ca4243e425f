pub mod interface;
pub mod protocol;

pub use interface::{GatewayLink, SerialBackend, SystemSerial};
pub use protocol::AckProtocol;

use serde::{Deserialize, Serialize};

/// A serial endpoint found during enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialPortCandidate {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialPortCandidate {
    pub fn from_path(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("Acknowledgment timeout after {0} ms")]
    Timeout(u64),

    #[error("Malformed acknowledgment: {0}")]
    MalformedResponse(String),

    #[error("Port busy: {0}")]
    PortBusy(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
