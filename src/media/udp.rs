use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cipher::PacketCipher;
use crate::error::{LinkError, LinkResult};
use crate::protocol::UdpParams;
use crate::session::TransportEvent;

const RECV_BUFFER: usize = 4096;

/// Encrypted Opus datagrams to and from the media server.
///
/// Sending and receiving each own a cipher clone so sequence numbers are
/// tracked per direction.
pub struct MediaTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    send_cipher: Mutex<PacketCipher>,
    closed: Arc<AtomicBool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaTransport {
    /// Bind an ephemeral local port and start the receive task
    pub async fn bind(params: &UdpParams, events: mpsc::Sender<TransportEvent>) -> LinkResult<Self> {
        if !params.is_valid() {
            return Err(LinkError::Config("udp section has no usable server".into()));
        }

        let cipher = PacketCipher::new(&params.key, &params.nonce)?;

        let remote = lookup_host((params.server.as_str(), params.port))
            .await
            .map_err(|e| LinkError::Connection(format!("resolve {}: {}", params.server, e)))?
            .next()
            .ok_or_else(|| {
                LinkError::Connection(format!("no address found for {}", params.server))
            })?;

        let local: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().map_err(|_| LinkError::Config("bad bind address".into()))?
        } else {
            "0.0.0.0:0".parse().map_err(|_| LinkError::Config("bad bind address".into()))?
        };

        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!(
            "Media channel bound on {} -> {} (ssrc={:08x})",
            socket.local_addr()?,
            remote,
            cipher.ssrc()
        );

        let closed = Arc::new(AtomicBool::new(false));
        let recv_task = tokio::spawn(receive_loop(
            socket.clone(),
            cipher.clone(),
            events,
            closed.clone(),
        ));

        Ok(Self {
            socket,
            remote,
            send_cipher: Mutex::new(cipher),
            closed,
            recv_task: Mutex::new(Some(recv_task)),
        })
    }

    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Encrypt and transmit one Opus frame, stamped with wall-clock ms
    pub async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        if !self.is_open() {
            return Err(LinkError::MediaNotReady);
        }

        // Truncated to 32 bits on the wire
        let timestamp = chrono::Utc::now().timestamp_millis() as u32;
        let packet = self.send_cipher.lock().encrypt(opus, timestamp)?;

        self.socket.send_to(&packet, self.remote).await?;
        Ok(())
    }

    /// Stop receiving; safe to call more than once
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
        info!("Media channel to {} closed", self.remote);
    }
}

impl Drop for MediaTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    mut cipher: PacketCipher,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                warn!("Media receive error: {}", e);
                continue;
            }
        };

        match cipher.decrypt(&buf[..len]) {
            Ok(packet) => {
                if packet.payload.is_empty() {
                    continue;
                }
                if events.send(TransportEvent::Audio(packet.payload)).await.is_err() {
                    debug!("Media event receiver dropped, stopping receive loop");
                    break;
                }
            }
            Err(e) => debug!("Dropping datagram from {}: {}", from, e),
        }
    }
}
