use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::transport::{select_transport, ActiveTransport, TransportEvent, TransportKind, TransportPreference};
use crate::bootstrap::BootstrapConfig;
use crate::config::NetworkConfig;
use crate::conversation::ControlLink;
use crate::error::{LinkError, LinkResult};
use crate::identity::DeviceIdentity;
use crate::mqtt::{MqttUdpTransport, PortProtocolCache};
use crate::protocol::{AudioParams, ClientMessage};
use crate::websocket::WebSocketTransport;

const EVENT_CAPACITY: usize = 256;

/// Server-assigned session id, valid while the transport that produced it lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owns at most one live transport and the session handle it produced.
///
/// Every connect gets a fresh event channel, so nothing from a torn-down
/// transport reaches the consumer of `next_event`.
pub struct SessionOrchestrator {
    identity: DeviceIdentity,
    network: NetworkConfig,
    cache: Arc<PortProtocolCache>,
    transport: Option<ActiveTransport>,
    session: Option<SessionHandle>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl SessionOrchestrator {
    pub fn new(identity: DeviceIdentity, network: NetworkConfig, cache: Arc<PortProtocolCache>) -> Self {
        Self {
            identity,
            network,
            cache,
            transport: None,
            session: None,
            events: None,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(ActiveTransport::kind)
    }

    /// Server audio parameters of the live session
    pub fn audio_params(&self) -> Option<&AudioParams> {
        self.transport.as_ref().map(ActiveTransport::audio_params)
    }

    /// Bring up the transport chosen for `config`, replacing any live one
    pub async fn connect(
        &mut self,
        config: &BootstrapConfig,
        preference: TransportPreference,
    ) -> LinkResult<SessionHandle> {
        if self.transport.is_some() {
            info!("Replacing the current session");
            self.disconnect().await;
        }

        let kind = select_transport(config, preference)?;
        info!("Connecting over {} (preference: {:?})", kind, preference);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let transport = match kind {
            TransportKind::MqttUdp => {
                let params = config
                    .mqtt
                    .as_ref()
                    .ok_or_else(|| LinkError::Resolution("mqtt section missing".into()))?;
                let transport = MqttUdpTransport::connect(
                    params,
                    config.udp.as_ref(),
                    &self.cache,
                    &self.network,
                    events_tx,
                )
                .await?;
                ActiveTransport::MqttUdp(transport)
            }
            TransportKind::WebSocket => {
                let params = config
                    .websocket
                    .as_ref()
                    .ok_or_else(|| LinkError::Resolution("websocket section missing".into()))?;
                let transport = WebSocketTransport::connect(
                    params,
                    &self.identity,
                    self.network.connect_timeout(),
                    self.network.hello_timeout(),
                    events_tx,
                )
                .await?;
                ActiveTransport::WebSocket(transport)
            }
        };

        let handle = SessionHandle(transport.session_id().to_string());
        info!("Session {} established over {}", handle, kind);

        self.transport = Some(transport);
        self.session = Some(handle.clone());
        self.events = Some(events_rx);
        Ok(handle)
    }

    /// Next event from the live transport; pends while there is none.
    ///
    /// `None` means every sender went away and the session is over.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let Some(events) = &mut self.events else {
            return std::future::pending().await;
        };
        let event = events.recv().await;
        if event.is_none() {
            debug!("Transport event stream ended");
            self.events = None;
        }
        event
    }

    pub async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        match (&self.transport, &self.session) {
            (Some(transport), Some(_)) => {
                debug!("Sending {}", message.type_name());
                transport.send_control(message).await
            }
            _ => Err(LinkError::NoSession),
        }
    }

    pub async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        match (&self.transport, &self.session) {
            (Some(transport), Some(_)) => transport.send_audio(opus).await,
            _ => Err(LinkError::NoSession),
        }
    }

    /// Say goodbye and close. A second call is a no-op.
    pub async fn disconnect(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };

        if let Some(session) = self.session.take() {
            info!("Disconnecting session {}", session);
            if let Err(e) = transport
                .send_control(&ClientMessage::goodbye(session.as_str()))
                .await
            {
                debug!("Goodbye not delivered: {}", e);
            }
        }

        transport.close().await;
        self.events = None;
    }

    /// Close after the transport was lost; no goodbye is attempted
    pub async fn teardown(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Some(session) = self.session.take() {
            warn!("Session {} lost", session);
        }
        transport.close().await;
        self.events = None;
    }
}

#[async_trait]
impl ControlLink for SessionOrchestrator {
    fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.as_str().to_string())
    }

    fn media_ready(&self) -> bool {
        self.transport.is_some()
    }

    async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        SessionOrchestrator::send_control(self, message).await
    }

    async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        SessionOrchestrator::send_audio(self, opus).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator::new(
            DeviceIdentity::generate(),
            NetworkConfig::default(),
            Arc::new(PortProtocolCache::in_memory()),
        )
    }

    #[tokio::test]
    async fn sends_without_session_are_rejected() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .send_control(&ClientMessage::goodbye("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSession));

        let err = orchestrator.send_audio(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, LinkError::NoSession));
        assert!(!ControlLink::media_ready(&orchestrator));
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let mut orchestrator = orchestrator();
        orchestrator.disconnect().await;
        orchestrator.disconnect().await;
        orchestrator.teardown().await;
        assert!(!orchestrator.is_connected());
        assert!(orchestrator.session().is_none());
    }

    #[tokio::test]
    async fn connect_without_usable_sections_is_a_resolution_error() {
        let mut orchestrator = orchestrator();
        let err = orchestrator
            .connect(&BootstrapConfig::default(), TransportPreference::WebSocket)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Resolution(_)));
        assert!(!orchestrator.is_connected());
    }
}
