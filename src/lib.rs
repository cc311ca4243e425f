pub mod serial;
pub mod device;
pub mod config;
pub mod flow;

pub use config::Settings;
pub use device::{DeviceTypeCatalog, GatewayConfig, GatewayResolver, ProbeSettings};
pub use flow::{FlowResult, SetupFlow, SetupInput};
pub use serial::{AckProtocol, SerialBackend, SystemSerial};
