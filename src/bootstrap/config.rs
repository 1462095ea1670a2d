use serde_json::{Map, Value};
use std::fmt;

use crate::error::{LinkError, LinkResult};
use crate::protocol::UdpParams;

/// Parsed bootstrap response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapConfig {
    pub activation: Option<ActivationInfo>,
    pub mqtt: Option<MqttParams>,
    pub udp: Option<UdpParams>,
    pub websocket: Option<WebSocketParams>,
    pub bind_instructions: Option<BindInstructions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationInfo {
    pub code: String,
    pub message: String,
    pub challenge: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindInstructions {
    pub web_url: Option<String>,
    pub steps: Vec<String>,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct MqttParams {
    /// `host` or `host:port`
    pub endpoint: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub publish_topic: String,
    pub subscribe_topic: String,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct WebSocketParams {
    pub url: String,
    pub token: String,
    pub version: u32,
}

impl MqttParams {
    pub fn is_valid(&self) -> bool {
        !self.endpoint.is_empty() && !self.client_id.is_empty()
    }

    /// Split the endpoint into host and an optional explicit port
    pub fn host_and_port(&self) -> (String, Option<u16>) {
        if let Some((host, port)) = self.endpoint.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.to_string(), Some(port));
            }
        }
        (self.endpoint.clone(), None)
    }

    fn from_json(obj: &Map<String, Value>) -> Self {
        let with_port = |host: String| match obj.get("port").and_then(Value::as_u64) {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let endpoint = if obj.contains_key("endpoint") {
            str_field(obj, "endpoint")
        } else if obj.contains_key("server") {
            with_port(str_field(obj, "server"))
        } else if obj.contains_key("host") {
            with_port(str_field(obj, "host"))
        } else {
            str_field(obj, "broker")
        };

        Self {
            endpoint,
            client_id: str_field(obj, "client_id"),
            username: str_field(obj, "username"),
            password: str_field(obj, "password"),
            publish_topic: str_field(obj, "publish_topic"),
            subscribe_topic: str_field(obj, "subscribe_topic"),
        }
    }
}

impl fmt::Debug for MqttParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttParams")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("publish_topic", &self.publish_topic)
            .field("subscribe_topic", &self.subscribe_topic)
            .finish()
    }
}

impl WebSocketParams {
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty()
    }

    fn from_json(obj: &Map<String, Value>) -> Self {
        let url = ["url", "endpoint", "server"]
            .iter()
            .find(|key| obj.contains_key(**key))
            .map(|key| str_field(obj, key))
            .unwrap_or_default();

        Self {
            url,
            token: str_field(obj, "token"),
            version: obj
                .get("version")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(1),
        }
    }
}

impl fmt::Debug for WebSocketParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketParams")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

impl ActivationInfo {
    fn from_json(obj: &Map<String, Value>) -> Self {
        Self {
            code: str_field(obj, "code"),
            message: str_field(obj, "message"),
            challenge: str_field(obj, "challenge"),
            timeout_ms: obj.get("timeout_ms").and_then(Value::as_u64).unwrap_or(0),
        }
    }
}

impl BindInstructions {
    fn from_json(obj: &Map<String, Value>) -> Self {
        let web_url = obj
            .get("web_url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        // step2 and step3 only count when the previous step exists
        let mut steps = Vec::new();
        for key in ["step1", "step2", "step3"] {
            match obj.get(key).and_then(Value::as_str) {
                Some(step) => steps.push(step.to_string()),
                None => break,
            }
        }

        Self { web_url, steps }
    }
}

impl BootstrapConfig {
    pub fn from_json(body: &Value) -> LinkResult<Self> {
        let root = body
            .as_object()
            .ok_or_else(|| LinkError::Resolution("response body is not a JSON object".into()))?;

        let section = |name: &str| root.get(name).and_then(Value::as_object);

        let config = Self {
            activation: section("activation").map(ActivationInfo::from_json),
            mqtt: section("mqtt").map(MqttParams::from_json),
            udp: section("udp").and_then(|obj| {
                serde_json::from_value::<UdpParams>(Value::Object(obj.clone())).ok()
            }),
            websocket: section("websocket").map(WebSocketParams::from_json),
            bind_instructions: section("bind_instructions").map(BindInstructions::from_json),
        };

        if !config.has_mqtt() && !config.has_websocket() {
            return Err(LinkError::Resolution(
                "response carries neither a usable mqtt nor websocket section".into(),
            ));
        }

        Ok(config)
    }

    pub fn has_mqtt(&self) -> bool {
        self.mqtt.as_ref().map_or(false, MqttParams::is_valid)
    }

    pub fn has_websocket(&self) -> bool {
        self.websocket.as_ref().map_or(false, WebSocketParams::is_valid)
    }

    /// Human-readable binding notice, present when the server wants the
    /// device activated
    pub fn activation_notice(&self) -> Option<String> {
        let activation = self.activation.as_ref().filter(|a| !a.code.is_empty())?;
        let rule = "----------------------";

        let mut notice = format!(
            "{rule}\nDevice activation code\n{rule}\n\nCode: {}\n\n",
            activation.code
        );
        if !activation.message.is_empty() {
            notice.push_str(&format!("{}\n\n", activation.message));
        }

        if let Some(bind) = &self.bind_instructions {
            if let Some(url) = &bind.web_url {
                notice.push_str(&format!("Control panel: {}\n\n", url));
            }
            if !bind.steps.is_empty() {
                notice.push_str("Binding steps:\n");
                for (i, step) in bind.steps.iter().enumerate() {
                    notice.push_str(&format!("{}. {}\n", i + 1, step));
                }
            }
        }

        notice.push_str(rule);
        Some(notice)
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mqtt_endpoint_from_server_and_port() {
        let body = json!({
            "mqtt": { "server": "broker.local", "port": 1883, "client_id": "c1" }
        });
        let cfg = BootstrapConfig::from_json(&body).unwrap();
        let mqtt = cfg.mqtt.unwrap();

        assert_eq!(mqtt.endpoint, "broker.local:1883");
        assert_eq!(
            mqtt.host_and_port(),
            ("broker.local".to_string(), Some(1883))
        );
    }

    #[test]
    fn endpoint_without_port() {
        let params = MqttParams {
            endpoint: "broker.local".into(),
            client_id: "x".into(),
            ..Default::default()
        };
        assert_eq!(params.host_and_port(), ("broker.local".to_string(), None));
    }

    #[test]
    fn websocket_url_aliases_and_version_default() {
        let body = json!({ "websocket": { "endpoint": "wss://ws.example/v1/", "token": "t" } });
        let cfg = BootstrapConfig::from_json(&body).unwrap();
        let ws = cfg.websocket.as_ref().unwrap();

        assert_eq!(ws.url, "wss://ws.example/v1/");
        assert_eq!(ws.version, 1);
        assert!(!cfg.has_mqtt());
    }

    #[test]
    fn udp_port_defaults() {
        let body = json!({
            "mqtt": { "endpoint": "b:8883", "client_id": "c" },
            "udp": { "server": "10.0.0.1", "key": "00", "nonce": "01" }
        });
        let cfg = BootstrapConfig::from_json(&body).unwrap();
        assert_eq!(cfg.udp.unwrap().port, 8080);
    }

    #[test]
    fn rejects_response_without_transport() {
        let body = json!({ "activation": { "code": "123456" } });
        assert!(matches!(
            BootstrapConfig::from_json(&body),
            Err(LinkError::Resolution(_))
        ));

        let invalid_mqtt = json!({ "mqtt": { "endpoint": "b:1883" } });
        assert!(BootstrapConfig::from_json(&invalid_mqtt).is_err());
    }

    #[test]
    fn activation_notice_lists_steps() {
        let body = json!({
            "websocket": { "url": "ws://x" },
            "activation": { "code": "908172", "message": "Enter the code" },
            "bind_instructions": {
                "web_url": "https://panel.example",
                "step1": "Open the panel",
                "step2": "Add a device"
            }
        });
        let notice = BootstrapConfig::from_json(&body)
            .unwrap()
            .activation_notice()
            .unwrap();

        assert!(notice.contains("Code: 908172"));
        assert!(notice.contains("Enter the code"));
        assert!(notice.contains("Control panel: https://panel.example"));
        assert!(notice.contains("2. Add a device"));
        assert!(!notice.contains("3."));
    }

    #[test]
    fn no_notice_without_code() {
        let body = json!({ "websocket": { "url": "ws://x" }, "activation": { "code": "" } });
        assert!(BootstrapConfig::from_json(&body)
            .unwrap()
            .activation_notice()
            .is_none());
    }
}
