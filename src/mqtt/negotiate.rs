//! Broker port and TLS negotiation.
//!
//! With an explicit port the cached mode for that port is tried first, then
//! the other mode. Without a cache entry the port range picks the first mode:
//! 8xxx prefers TLS, 1xxx prefers plain TCP, anything else prefers TLS.
//! Without a port the conventional 8883 (TLS) and 1883 (TCP) are probed, with
//! cached decisions for those ports going first.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use super::cache::PortProtocolCache;
use crate::error::{LinkError, LinkResult};

pub const SECURE_PORT: u16 = 8883;
pub const INSECURE_PORT: u16 = 1883;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerAttempt {
    pub port: u16,
    pub tls: bool,
}

impl BrokerAttempt {
    pub fn new(port: u16, tls: bool) -> Self {
        Self { port, tls }
    }
}

impl fmt::Display for BrokerAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, if self.tls { "TLS" } else { "TCP" })
    }
}

/// Ordered, de-duplicated list of connection attempts
pub fn plan_attempts(port: Option<u16>, cache: &PortProtocolCache) -> Vec<BrokerAttempt> {
    let mut plan = Vec::with_capacity(4);

    match port {
        Some(port) => {
            let first = cache.get(port).unwrap_or_else(|| prefers_tls(port));
            plan.push(BrokerAttempt::new(port, first));
            plan.push(BrokerAttempt::new(port, !first));
        }
        None => {
            for port in [SECURE_PORT, INSECURE_PORT] {
                if let Some(tls) = cache.get(port) {
                    plan.push(BrokerAttempt::new(port, tls));
                }
            }
            plan.push(BrokerAttempt::new(SECURE_PORT, true));
            plan.push(BrokerAttempt::new(INSECURE_PORT, false));
        }
    }

    let mut seen = Vec::with_capacity(plan.len());
    plan.retain(|attempt| {
        if seen.contains(attempt) {
            false
        } else {
            seen.push(*attempt);
            true
        }
    });
    plan
}

fn prefers_tls(port: u16) -> bool {
    !(1000..2000).contains(&port)
}

/// Opens one broker connection in one mode
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Connection: Send;

    async fn try_connect(&self, host: &str, attempt: BrokerAttempt)
        -> LinkResult<Self::Connection>;
}

/// Walk the attempt plan until one connects; the winning mode is cached.
///
/// Each attempt is bounded by `connect_timeout`. A refused login is reported
/// as a handshake failure if no later attempt succeeds.
pub async fn negotiate<C: BrokerConnector>(
    connector: &C,
    host: &str,
    port: Option<u16>,
    cache: &PortProtocolCache,
    connect_timeout: Duration,
) -> LinkResult<(C::Connection, BrokerAttempt)> {
    let plan = plan_attempts(port, cache);
    let mut refusal: Option<LinkError> = None;

    for attempt in &plan {
        info!("Connecting to MQTT broker {}:{}", host, attempt);

        match tokio::time::timeout(connect_timeout, connector.try_connect(host, *attempt)).await {
            Ok(Ok(connection)) => {
                info!("Connected to MQTT broker {}:{}", host, attempt);
                if let Err(e) = cache.set(attempt.port, attempt.tls) {
                    warn!("Failed to persist broker port decision: {}", e);
                }
                return Ok((connection, *attempt));
            }
            Ok(Err(e)) => {
                warn!("MQTT attempt {} failed: {}", attempt, e);
                if matches!(e, LinkError::Handshake(_)) {
                    refusal = Some(e);
                }
            }
            Err(_) => warn!(
                "MQTT attempt {} timed out after {:?}",
                attempt, connect_timeout
            ),
        }
    }

    if let Some(refusal) = refusal {
        return Err(refusal);
    }

    let tried: Vec<String> = plan.iter().map(ToString::to_string).collect();
    Err(LinkError::Connection(format!(
        "could not reach MQTT broker {} (tried {})",
        host,
        tried.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_uses_range_heuristic() {
        let cache = PortProtocolCache::in_memory();
        assert_eq!(
            plan_attempts(Some(8883), &cache),
            vec![BrokerAttempt::new(8883, true), BrokerAttempt::new(8883, false)]
        );
        assert_eq!(
            plan_attempts(Some(1883), &cache),
            vec![BrokerAttempt::new(1883, false), BrokerAttempt::new(1883, true)]
        );
        assert_eq!(plan_attempts(Some(443), &cache)[0], BrokerAttempt::new(443, true));
    }

    #[test]
    fn explicit_port_prefers_cached_mode() {
        let cache = PortProtocolCache::in_memory();
        cache.set(8883, false).unwrap();
        assert_eq!(
            plan_attempts(Some(8883), &cache),
            vec![BrokerAttempt::new(8883, false), BrokerAttempt::new(8883, true)]
        );
    }

    #[test]
    fn no_port_defaults_secure_first() {
        let cache = PortProtocolCache::in_memory();
        assert_eq!(
            plan_attempts(None, &cache),
            vec![BrokerAttempt::new(8883, true), BrokerAttempt::new(1883, false)]
        );
    }

    #[test]
    fn no_port_cached_entries_first_and_deduplicated() {
        let cache = PortProtocolCache::in_memory();
        cache.set(1883, false).unwrap();
        assert_eq!(
            plan_attempts(None, &cache),
            vec![BrokerAttempt::new(1883, false), BrokerAttempt::new(8883, true)]
        );

        cache.set(8883, false).unwrap();
        assert_eq!(
            plan_attempts(None, &cache),
            vec![
                BrokerAttempt::new(8883, false),
                BrokerAttempt::new(1883, false),
                BrokerAttempt::new(8883, true),
            ]
        );
    }
}
