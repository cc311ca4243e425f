pub mod catalog;
pub mod models;
pub mod resolver;

pub use catalog::DeviceTypeCatalog;
pub use models::*;
pub use resolver::{GatewayResolver, ProbeSettings};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Device type identifier must not be empty")]
    EmptyIdentifier,

    #[error("Duplicate device type identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Device type {0} has no baud rate")]
    ZeroBaudRate(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
