//! Transport A: MQTT control channel with port/TLS negotiation, paired with
//! the encrypted UDP media channel.

pub mod cache;
pub mod client;
pub mod negotiate;

pub use cache::PortProtocolCache;
pub use client::{BrokerEvent, BrokerLink, MqttControl, MqttUdpTransport, RumqttConnector};
pub use negotiate::{negotiate, plan_attempts, BrokerAttempt, BrokerConnector};
