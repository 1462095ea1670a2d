use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::PortProtocolCache;
use super::negotiate::{negotiate, BrokerAttempt, BrokerConnector};
use crate::bootstrap::MqttParams;
use crate::config::NetworkConfig;
use crate::error::{LinkError, LinkResult};
use crate::media::MediaTransport;
use crate::protocol::{AudioParams, ClientMessage, ServerHello, UdpParams};
use crate::session::TransportEvent;

const REQUEST_CAPACITY: usize = 64;
const MQTT_HELLO_VERSION: u32 = 3;
const DEFAULT_VOLUME: u8 = 50;

/// Opens broker connections with rumqttc and waits for the CONNACK
pub struct RumqttConnector {
    params: MqttParams,
    keep_alive: Duration,
}

impl RumqttConnector {
    pub fn new(params: MqttParams, keep_alive: Duration) -> Self {
        Self { params, keep_alive }
    }
}

#[async_trait]
impl BrokerConnector for RumqttConnector {
    type Connection = (AsyncClient, EventLoop);

    async fn try_connect(
        &self,
        host: &str,
        attempt: BrokerAttempt,
    ) -> LinkResult<Self::Connection> {
        let mut options = MqttOptions::new(&self.params.client_id, host, attempt.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if !self.params.username.is_empty() {
            options.set_credentials(&self.params.username, &self.params.password);
        }
        if attempt.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok((client, eventloop));
                    }
                    return Err(LinkError::Handshake(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                Ok(_) => continue,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(LinkError::Handshake(format!(
                        "broker refused connection: {:?}",
                        code
                    )));
                }
                Err(e) => return Err(LinkError::Connection(e.to_string())),
            }
        }
    }
}

/// What the event pump sees of a broker connection
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Payload published on a subscribed topic
    Message(Vec<u8>),
    /// CONNACK accepted
    Connected,
    /// CONNACK refused, with the broker's reason
    Refused(String),
    /// Our own DISCONNECT went out
    Closed,
    Other,
}

/// A broker connection as driven by the event pump.
///
/// Every method takes `&mut self`: the pump is the only user and rumqttc's
/// event loop is not `Sync`.
#[async_trait]
pub trait BrokerLink: Send + 'static {
    /// Next event; an error means the connection dropped
    async fn poll(&mut self) -> LinkResult<BrokerEvent>;

    async fn publish(&mut self, topic: &str, payload: String) -> LinkResult<()>;

    async fn subscribe(&mut self, topic: &str) -> LinkResult<()>;
}

struct RumqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
}

#[async_trait]
impl BrokerLink for RumqttLink {
    async fn poll(&mut self) -> LinkResult<BrokerEvent> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| LinkError::Connection(e.to_string()))?;

        Ok(match event {
            Event::Incoming(Packet::Publish(publish)) => BrokerEvent::Message(publish.payload.to_vec()),
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                BrokerEvent::Connected
            }
            Event::Incoming(Packet::ConnAck(ack)) => BrokerEvent::Refused(format!("{:?}", ack.code)),
            Event::Outgoing(Outgoing::Disconnect) => BrokerEvent::Closed,
            _ => BrokerEvent::Other,
        })
    }

    async fn publish(&mut self, topic: &str, payload: String) -> LinkResult<()> {
        publish_raw(&self.client, topic, payload).await
    }

    async fn subscribe(&mut self, topic: &str) -> LinkResult<()> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| LinkError::Connection(format!("subscribe failed: {e}")))
    }
}

/// Broker control channel: publishes JSON on the device topic and pumps the
/// event loop on its own task.
pub struct MqttControl {
    client: AsyncClient,
    publish_topic: String,
    closing: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttControl {
    /// Start pumping `eventloop`. The first server `hello` goes to
    /// `hello_tx`; everything else except `ping` is forwarded as a control
    /// event.
    pub async fn start(
        client: AsyncClient,
        eventloop: EventLoop,
        params: &MqttParams,
        reconnect_delay: Duration,
        events: mpsc::Sender<TransportEvent>,
        hello_tx: oneshot::Sender<ServerHello>,
    ) -> LinkResult<Self> {
        let closing = Arc::new(AtomicBool::new(false));

        let pump = EventPump {
            link: RumqttLink {
                client: client.clone(),
                eventloop,
            },
            publish_topic: params.publish_topic.clone(),
            subscribe_topic: params.subscribe_topic.clone(),
            client_id: params.client_id.clone(),
            reconnect_delay,
            events,
            hello: Some(hello_tx),
            closing: closing.clone(),
        };

        if !params.subscribe_topic.is_empty() {
            info!("Subscribing to {}", params.subscribe_topic);
            client
                .subscribe(&params.subscribe_topic, QoS::AtMostOnce)
                .await
                .map_err(|e| LinkError::Connection(format!("subscribe failed: {e}")))?;
        }

        let handle = tokio::spawn(pump.run());

        Ok(Self {
            client,
            publish_topic: params.publish_topic.clone(),
            closing,
            pump: Mutex::new(Some(handle)),
        })
    }

    pub async fn publish(&self, message: &ClientMessage) -> LinkResult<()> {
        let payload = message.to_json()?;
        publish_raw(&self.client, &self.publish_topic, payload).await?;
        debug!("Published {} to {}", message.type_name(), self.publish_topic);
        Ok(())
    }

    /// Clean shutdown: no reconnect follows. Idempotent.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing MQTT connection");

        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }

        let handle = self.pump.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
    }
}

impl Drop for MqttControl {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

async fn publish_raw(client: &AsyncClient, topic: &str, payload: String) -> LinkResult<()> {
    client
        .publish(topic, QoS::AtMostOnce, false, payload.into_bytes())
        .await
        .map_err(|e| LinkError::Connection(format!("publish failed: {e}")))
}

struct EventPump<L> {
    link: L,
    publish_topic: String,
    subscribe_topic: String,
    client_id: String,
    reconnect_delay: Duration,
    events: mpsc::Sender<TransportEvent>,
    hello: Option<oneshot::Sender<ServerHello>>,
    closing: Arc<AtomicBool>,
}

impl<L: BrokerLink> EventPump<L> {
    async fn run(mut self) {
        loop {
            match self.link.poll().await {
                Ok(BrokerEvent::Message(payload)) => self.handle_publish(&payload).await,
                Ok(BrokerEvent::Closed) => {
                    info!("MQTT connection closed");
                    let _ = self
                        .events
                        .send(TransportEvent::Disconnected { clean: true })
                        .await;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        let _ = self
                            .events
                            .send(TransportEvent::Disconnected { clean: true })
                            .await;
                        break;
                    }

                    warn!("MQTT connection lost: {}", e);
                    let _ = self
                        .events
                        .send(TransportEvent::Disconnected { clean: false })
                        .await;

                    if !self.reconnect_once().await {
                        let _ = self
                            .events
                            .send(TransportEvent::Failed(format!(
                                "Connection to the control broker was lost: {}",
                                e
                            )))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    /// The single delayed retry after an unclean disconnect
    async fn reconnect_once(&mut self) -> bool {
        tokio::time::sleep(self.reconnect_delay).await;
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }

        info!("Reconnecting to MQTT broker");
        loop {
            match self.link.poll().await {
                Ok(BrokerEvent::Connected) => break,
                Ok(BrokerEvent::Refused(reason)) => {
                    warn!("MQTT reconnect refused: {}", reason);
                    return false;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("MQTT reconnect failed: {}", e);
                    return false;
                }
            }
        }

        if !self.subscribe_topic.is_empty() {
            if let Err(e) = self.link.subscribe(&self.subscribe_topic).await {
                warn!("Re-subscribe to {} failed: {}", self.subscribe_topic, e);
                return false;
            }
        }

        info!("MQTT reconnected");
        let _ = self.events.send(TransportEvent::Reconnected).await;
        true
    }

    async fn handle_publish(&mut self, payload: &[u8]) {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Ignoring non-JSON control message: {}", e);
                return;
            }
        };

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match kind.as_deref() {
            Some("hello") => {
                if let Some(waiter) = self.hello.take() {
                    match serde_json::from_value::<ServerHello>(value) {
                        Ok(hello) => {
                            let _ = waiter.send(hello);
                        }
                        Err(e) => warn!("Malformed server hello: {}", e),
                    }
                    return;
                }
            }
            Some("ping") => {
                self.send_pong().await;
                return;
            }
            _ => {}
        }

        let _ = self.events.send(TransportEvent::Control(value)).await;
    }

    async fn send_pong(&mut self) {
        let pong = ClientMessage::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_id: self.client_id.clone(),
        };
        let result = match pong.to_json() {
            Ok(json) => self.link.publish(&self.publish_topic, json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to answer ping: {}", e);
        }
    }
}

/// Transport A: broker control channel plus the paired encrypted UDP media
/// channel created from the hello reply.
pub struct MqttUdpTransport {
    control: MqttControl,
    media: MediaTransport,
    session_id: String,
    audio_params: AudioParams,
}

impl MqttUdpTransport {
    pub async fn connect(
        params: &MqttParams,
        bootstrap_udp: Option<&UdpParams>,
        cache: &PortProtocolCache,
        network: &NetworkConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> LinkResult<Self> {
        if !params.is_valid() {
            return Err(LinkError::Config("mqtt section is incomplete".into()));
        }
        if params.publish_topic.is_empty() {
            return Err(LinkError::Config("mqtt section has no publish_topic".into()));
        }

        let (host, port) = params.host_and_port();
        let connector = RumqttConnector::new(params.clone(), network.keep_alive());
        let ((client, eventloop), attempt) =
            negotiate(&connector, &host, port, cache, network.connect_timeout()).await?;
        debug!("Broker session on {}", attempt);

        let (hello_tx, hello_rx) = oneshot::channel();
        let control = MqttControl::start(
            client,
            eventloop,
            params,
            network.reconnect_delay(),
            events.clone(),
            hello_tx,
        )
        .await?;

        let hello = ClientMessage::Hello {
            version: MQTT_HELLO_VERSION,
            transport: "udp".to_string(),
            features: None,
            audio_params: AudioParams::upstream(),
        };
        if let Err(e) = control.publish(&hello).await {
            control.close().await;
            return Err(e);
        }

        let hello = match tokio::time::timeout(network.hello_timeout(), hello_rx).await {
            Ok(Ok(hello)) => hello,
            Ok(Err(_)) => {
                control.close().await;
                return Err(LinkError::Handshake("server hello was malformed".into()));
            }
            Err(_) => {
                control.close().await;
                return Err(LinkError::Handshake(format!(
                    "no server hello within {:?}",
                    network.hello_timeout()
                )));
            }
        };

        if hello.session_id.is_empty() {
            control.close().await;
            return Err(LinkError::Handshake("server hello has no session_id".into()));
        }

        let udp = hello
            .udp
            .clone()
            .filter(UdpParams::is_valid)
            .or_else(|| bootstrap_udp.cloned().filter(UdpParams::is_valid));
        let Some(udp) = udp else {
            control.close().await;
            return Err(LinkError::Handshake("no udp media parameters available".into()));
        };

        let media = match MediaTransport::bind(&udp, events).await {
            Ok(media) => media,
            Err(e) => {
                control.close().await;
                return Err(e);
            }
        };

        info!(
            "MQTT session {} ready (server audio {} Hz, {} ch, {} ms)",
            hello.session_id,
            hello.audio_params.sample_rate,
            hello.audio_params.channels,
            hello.audio_params.frame_duration
        );

        let transport = Self {
            control,
            media,
            session_id: hello.session_id,
            audio_params: hello.audio_params,
        };
        transport.announce_capabilities().await;

        Ok(transport)
    }

    async fn announce_capabilities(&self) {
        let descriptors = ClientMessage::iot_descriptors(&self.session_id);
        let states = ClientMessage::iot_states(&self.session_id, DEFAULT_VOLUME);
        for message in [descriptors, states] {
            if let Err(e) = self.control.publish(&message).await {
                warn!("Failed to send device capabilities: {}", e);
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn audio_params(&self) -> &AudioParams {
        &self.audio_params
    }

    pub async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        self.control.publish(message).await
    }

    pub async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        self.media.send_audio(opus).await
    }

    pub async fn close(&self) {
        self.media.close();
        self.control.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Wire {
        published: Vec<(String, String)>,
        subscribed: Vec<String>,
    }

    /// Broker link whose events are fed by the test
    struct ScriptedLink {
        script: mpsc::UnboundedReceiver<LinkResult<BrokerEvent>>,
        wire: Arc<Mutex<Wire>>,
    }

    #[async_trait]
    impl BrokerLink for ScriptedLink {
        async fn poll(&mut self) -> LinkResult<BrokerEvent> {
            match self.script.recv().await {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }

        async fn publish(&mut self, topic: &str, payload: String) -> LinkResult<()> {
            self.wire.lock().published.push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&mut self, topic: &str) -> LinkResult<()> {
            self.wire.lock().subscribed.push(topic.to_string());
            Ok(())
        }
    }

    struct Pump {
        script: mpsc::UnboundedSender<LinkResult<BrokerEvent>>,
        events: mpsc::Receiver<TransportEvent>,
        hello: oneshot::Receiver<ServerHello>,
        wire: Arc<Mutex<Wire>>,
        closing: Arc<AtomicBool>,
        task: JoinHandle<()>,
    }

    fn start_pump() -> Pump {
        let (script_tx, script) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(16);
        let (hello_tx, hello) = oneshot::channel();
        let wire = Arc::new(Mutex::new(Wire::default()));
        let closing = Arc::new(AtomicBool::new(false));

        let pump = EventPump {
            link: ScriptedLink {
                script,
                wire: wire.clone(),
            },
            publish_topic: "device-server".to_string(),
            subscribe_topic: "devices/p2p/aabbccddeeff".to_string(),
            client_id: "GID_test@@@aa_bb_cc_dd_ee_ff".to_string(),
            reconnect_delay: Duration::from_millis(10),
            events: events_tx,
            hello: Some(hello_tx),
            closing: closing.clone(),
        };

        Pump {
            script: script_tx,
            events,
            hello,
            wire,
            closing,
            task: tokio::spawn(pump.run()),
        }
    }

    fn message(value: Value) -> LinkResult<BrokerEvent> {
        Ok(BrokerEvent::Message(value.to_string().into_bytes()))
    }

    async fn next(events: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
    }

    async fn finished(task: &mut JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn first_hello_is_routed_and_ping_is_answered() {
        let mut pump = start_pump();

        pump.script
            .send(message(json!({"type": "hello", "transport": "udp", "session_id": "s-1"})))
            .unwrap();
        let hello = tokio::time::timeout(Duration::from_secs(2), &mut pump.hello)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hello.session_id, "s-1");

        let later_hello = json!({"type": "hello", "transport": "udp", "session_id": "s-2"});
        pump.script.send(message(json!({"type": "ping"}))).unwrap();
        pump.script.send(message(later_hello.clone())).unwrap();
        pump.script.send(Ok(BrokerEvent::Message(b"not json".to_vec()))).unwrap();
        pump.script
            .send(message(json!({"type": "tts", "state": "start"})))
            .unwrap();

        // The ping never reaches the session; later hellos do
        assert_eq!(next(&mut pump.events).await, Some(TransportEvent::Control(later_hello)));
        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Control(json!({"type": "tts", "state": "start"})))
        );

        let wire = pump.wire.lock();
        assert_eq!(wire.published.len(), 1);
        let (topic, payload) = &wire.published[0];
        assert_eq!(topic, "device-server");
        let pong: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["client_id"], "GID_test@@@aa_bb_cc_dd_ee_ff");
    }

    #[tokio::test]
    async fn unclean_drop_reconnects_once_and_resubscribes() {
        let mut pump = start_pump();

        pump.script
            .send(Err(LinkError::Connection("connection reset".into())))
            .unwrap();
        pump.script.send(Ok(BrokerEvent::Other)).unwrap();
        pump.script.send(Ok(BrokerEvent::Connected)).unwrap();

        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Disconnected { clean: false })
        );
        assert_eq!(next(&mut pump.events).await, Some(TransportEvent::Reconnected));
        assert_eq!(pump.wire.lock().subscribed, vec!["devices/p2p/aabbccddeeff"]);

        // Still pumping after the retry
        pump.script
            .send(message(json!({"type": "stt", "text": "hi"})))
            .unwrap();
        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Control(json!({"type": "stt", "text": "hi"})))
        );
    }

    #[tokio::test]
    async fn failed_retry_reports_failure_and_stops() {
        let mut pump = start_pump();

        pump.script
            .send(Err(LinkError::Connection("connection reset".into())))
            .unwrap();
        pump.script
            .send(Ok(BrokerEvent::Refused("NotAuthorized".into())))
            .unwrap();

        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Disconnected { clean: false })
        );
        match next(&mut pump.events).await {
            Some(TransportEvent::Failed(status)) => assert!(status.contains("connection reset")),
            other => panic!("expected failure, got {:?}", other),
        }
        finished(&mut pump.task).await;
        assert!(pump.wire.lock().subscribed.is_empty());
    }

    #[tokio::test]
    async fn client_close_is_clean_and_never_retried() {
        let mut pump = start_pump();
        pump.closing.store(true, Ordering::SeqCst);
        pump.script.send(Ok(BrokerEvent::Closed)).unwrap();

        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Disconnected { clean: true })
        );
        finished(&mut pump.task).await;
        assert_eq!(next(&mut pump.events).await, None);

        // An error while closing is also clean
        let mut pump = start_pump();
        pump.closing.store(true, Ordering::SeqCst);
        pump.script
            .send(Err(LinkError::Connection("socket closed".into())))
            .unwrap();
        pump.script.send(Ok(BrokerEvent::Connected)).unwrap();

        assert_eq!(
            next(&mut pump.events).await,
            Some(TransportEvent::Disconnected { clean: true })
        );
        finished(&mut pump.task).await;
        assert!(pump.wire.lock().subscribed.is_empty());
    }
}
