//! Bootstrap (OTA) resolution: the HTTP exchange that returns transport
//! credentials for this device.

pub mod config;
pub mod device;
pub mod resolver;

pub use config::{ActivationInfo, BindInstructions, BootstrapConfig, MqttParams, WebSocketParams};
pub use device::DeviceDescription;
pub use resolver::BootstrapResolver;
