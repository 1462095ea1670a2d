// Bootstrap probe: resolve this device against an OTA endpoint and print
// what the server offers, without connecting to any transport.
//
// Usage:
//   cargo run --example bootstrap_probe -- http://127.0.0.1:8002/xiaozhi/ota/ [mac]

use anyhow::{Context, Result};
use voxlink::config::NetworkConfig;
use voxlink::session::{select_transport, TransportPreference};
use voxlink::{BootstrapResolver, DeviceIdentity};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:8002/xiaozhi/ota/".to_string());
    let identity = match args.next() {
        Some(mac) => DeviceIdentity::from_mac(&mac)?,
        None => DeviceIdentity::generate(),
    };

    println!("=== Bootstrap probe ===\n");
    println!("Endpoint:  {}", url);
    println!("MAC:       {}", identity.mac_address());
    println!("Client id: {}\n", identity.client_id());

    let resolver = BootstrapResolver::new(&url, "bootstrap-probe", &NetworkConfig::default())?;
    let config = resolver
        .resolve(&identity)
        .await
        .context("Bootstrap failed")?;

    if let Some(mqtt) = &config.mqtt {
        println!("MQTT:      {} (valid: {})", mqtt.endpoint, mqtt.is_valid());
        println!("  publish:   {}", mqtt.publish_topic);
        println!("  subscribe: {}", mqtt.subscribe_topic);
    }
    if let Some(udp) = &config.udp {
        println!("UDP:       {}:{}", udp.server, udp.port);
    }
    if let Some(ws) = &config.websocket {
        println!("WebSocket: {} (protocol v{})", ws.url, ws.version);
    }

    for preference in [TransportPreference::MqttUdp, TransportPreference::WebSocket] {
        match select_transport(&config, preference) {
            Ok(kind) => println!("Preference {:?} -> {}", preference, kind),
            Err(e) => println!("Preference {:?} -> {}", preference, e.status_text()),
        }
    }

    if let Some(notice) = config.activation_notice() {
        println!("\n{}", notice);
    }

    Ok(())
}
