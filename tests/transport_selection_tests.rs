// Integration tests for choosing a transport from the bootstrap response

use serde_json::json;
use voxlink::bootstrap::BootstrapConfig;
use voxlink::error::LinkError;
use voxlink::session::{select_transport, TransportKind, TransportPreference};

fn mqtt_section() -> serde_json::Value {
    json!({
        "endpoint": "mqtt.example.com",
        "client_id": "GID_test@@@device",
        "username": "u",
        "password": "p",
        "publish_topic": "device-server"
    })
}

fn websocket_section() -> serde_json::Value {
    json!({ "url": "wss://api.example.com/xiaozhi/v1/", "token": "abc", "version": 3 })
}

#[test]
fn test_only_websocket_valid_wins_over_mqtt_preference() {
    let config = BootstrapConfig::from_json(&json!({ "websocket": websocket_section() })).unwrap();

    assert_eq!(
        select_transport(&config, TransportPreference::MqttUdp).unwrap(),
        TransportKind::WebSocket
    );
}

#[test]
fn test_both_valid_honours_websocket_preference() {
    let config = BootstrapConfig::from_json(&json!({
        "mqtt": mqtt_section(),
        "websocket": websocket_section()
    }))
    .unwrap();

    assert_eq!(
        select_transport(&config, TransportPreference::WebSocket).unwrap(),
        TransportKind::WebSocket
    );
    assert_eq!(
        select_transport(&config, TransportPreference::MqttUdp).unwrap(),
        TransportKind::MqttUdp
    );
}

#[test]
fn test_websocket_preference_without_section_falls_back_to_mqtt() {
    let config = BootstrapConfig::from_json(&json!({ "mqtt": mqtt_section() })).unwrap();

    assert_eq!(
        select_transport(&config, TransportPreference::WebSocket).unwrap(),
        TransportKind::MqttUdp
    );
}

#[test]
fn test_incomplete_mqtt_section_does_not_count() {
    let config = BootstrapConfig::from_json(&json!({
        "mqtt": { "endpoint": "mqtt.example.com" },
        "websocket": websocket_section()
    }))
    .unwrap();

    assert!(!config.has_mqtt());
    assert_eq!(
        select_transport(&config, TransportPreference::MqttUdp).unwrap(),
        TransportKind::WebSocket
    );
}

#[test]
fn test_nothing_usable_is_a_resolution_error() {
    assert!(matches!(
        select_transport(&BootstrapConfig::default(), TransportPreference::MqttUdp),
        Err(LinkError::Resolution(_))
    ));
    assert!(matches!(
        BootstrapConfig::from_json(&json!({ "mqtt": {} })),
        Err(LinkError::Resolution(_))
    ));
}
