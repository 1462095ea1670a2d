use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{BootstrapConfig, DeviceDescription};
use crate::config::NetworkConfig;
use crate::error::{LinkError, LinkResult};
use crate::identity::DeviceIdentity;

/// One-shot HTTP exchange that turns a device identity into transport
/// credentials. Retry policy belongs to the caller.
pub struct BootstrapResolver {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    locale: String,
    board_name: String,
}

impl BootstrapResolver {
    pub fn new(url: &str, board_name: &str, network: &NetworkConfig) -> LinkResult<Self> {
        Self::with_timeout(url, board_name, network, network.bootstrap_timeout())
    }

    pub fn with_timeout(
        url: &str,
        board_name: &str,
        network: &NetworkConfig,
        timeout: Duration,
    ) -> LinkResult<Self> {
        if url.trim().is_empty() {
            return Err(LinkError::Config("bootstrap url is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            url: url.trim().to_string(),
            user_agent: network.user_agent.clone(),
            locale: network.locale.clone(),
            board_name: board_name.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn resolve(&self, identity: &DeviceIdentity) -> LinkResult<BootstrapConfig> {
        info!("Requesting bootstrap config from {}", self.url);

        let description = DeviceDescription::for_identity(identity, &self.board_name);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Activation-Version", "1")
            .header("Device-Id", identity.mac_address())
            .header("Client-Id", identity.client_id_string())
            .header("User-Agent", &self.user_agent)
            .header("Accept-Language", &self.locale)
            .json(&description)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LinkError::Resolution(format!("request to {} timed out", self.url))
                } else {
                    LinkError::Resolution(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::Resolution(format!("server returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LinkError::Resolution(format!("invalid response body: {e}")))?;

        let config = BootstrapConfig::from_json(&body)?;

        info!(
            "Bootstrap resolved (mqtt={}, websocket={}, udp={})",
            config.has_mqtt(),
            config.has_websocket(),
            config.udp.is_some()
        );
        debug!("Bootstrap sections: {:?}", config);

        Ok(config)
    }
}
