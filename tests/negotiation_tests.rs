// Integration tests for broker port/TLS negotiation and its cache

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use voxlink::error::{LinkError, LinkResult};
use voxlink::mqtt::{negotiate, BrokerAttempt, BrokerConnector, PortProtocolCache};

/// Succeeds only for the listed attempts and records every try
struct ScriptedBroker {
    accepts: HashSet<(u16, bool)>,
    refuses_credentials: bool,
    tried: Mutex<Vec<BrokerAttempt>>,
}

impl ScriptedBroker {
    fn accepting(accepts: &[(u16, bool)]) -> Self {
        Self {
            accepts: accepts.iter().copied().collect(),
            refuses_credentials: false,
            tried: Mutex::new(Vec::new()),
        }
    }

    fn tried(&self) -> Vec<BrokerAttempt> {
        self.tried.lock().clone()
    }
}

#[async_trait]
impl BrokerConnector for ScriptedBroker {
    type Connection = BrokerAttempt;

    async fn try_connect(&self, _host: &str, attempt: BrokerAttempt) -> LinkResult<BrokerAttempt> {
        self.tried.lock().push(attempt);
        if self.accepts.contains(&(attempt.port, attempt.tls)) {
            Ok(attempt)
        } else if self.refuses_credentials {
            Err(LinkError::Handshake("bad username or password".into()))
        } else {
            Err(LinkError::Connection("connection refused".into()))
        }
    }
}

const TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_tls_success_on_8883_skips_tcp_next_time() {
    let cache = PortProtocolCache::in_memory();
    let broker = ScriptedBroker::accepting(&[(8883, true)]);

    let (_, first) = negotiate(&broker, "broker.local", Some(8883), &cache, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(first, BrokerAttempt::new(8883, true));
    assert_eq!(cache.get(8883), Some(true));

    let broker = ScriptedBroker::accepting(&[(8883, true)]);
    negotiate(&broker, "broker.local", Some(8883), &cache, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.tried(), vec![BrokerAttempt::new(8883, true)]);
}

#[tokio::test]
async fn test_cached_mode_failure_falls_back_to_other_mode() {
    let cache = PortProtocolCache::in_memory();
    cache.set(8883, true).unwrap();
    let broker = ScriptedBroker::accepting(&[(8883, false)]);

    let (_, winner) = negotiate(&broker, "broker.local", Some(8883), &cache, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(winner, BrokerAttempt::new(8883, false));
    assert_eq!(
        broker.tried(),
        vec![BrokerAttempt::new(8883, true), BrokerAttempt::new(8883, false)]
    );
    assert_eq!(cache.get(8883), Some(false));
}

#[tokio::test]
async fn test_no_port_probes_defaults_in_order() {
    let cache = PortProtocolCache::in_memory();
    let broker = ScriptedBroker::accepting(&[(1883, false)]);

    let (_, winner) = negotiate(&broker, "broker.local", None, &cache, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(winner, BrokerAttempt::new(1883, false));
    assert_eq!(
        broker.tried(),
        vec![BrokerAttempt::new(8883, true), BrokerAttempt::new(1883, false)]
    );

    // Second run goes straight to the cached winner
    let broker = ScriptedBroker::accepting(&[(1883, false)]);
    negotiate(&broker, "broker.local", None, &cache, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.tried(), vec![BrokerAttempt::new(1883, false)]);
}

#[tokio::test]
async fn test_all_attempts_failing_is_a_connection_error() {
    let cache = PortProtocolCache::in_memory();
    let broker = ScriptedBroker::accepting(&[]);

    let err = negotiate(&broker, "broker.local", Some(1883), &cache, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, LinkError::Connection(_)));
    assert_eq!(broker.tried().len(), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_credential_refusal_is_reported_as_handshake() {
    let cache = PortProtocolCache::in_memory();
    let mut broker = ScriptedBroker::accepting(&[]);
    broker.refuses_credentials = true;

    let err = negotiate(&broker, "broker.local", Some(8883), &cache, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, LinkError::Handshake(_)));
}

#[tokio::test]
async fn test_cache_survives_reload() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state").join("ports.json");

    {
        let cache = PortProtocolCache::load(&path);
        let broker = ScriptedBroker::accepting(&[(8883, true)]);
        negotiate(&broker, "broker.local", None, &cache, TIMEOUT).await?;
    }

    let reloaded = PortProtocolCache::load(&path);
    assert_eq!(reloaded.get(8883), Some(true));
    Ok(())
}
