//! Registration subsystem: announces a client/hybrid node to its master and
//! retries with exponential backoff until accepted (spec §4.4.1).
//!
//! Uses an exponential backoff with a bounded attempt count rather than an
//! infinite-retry persistent session, per the `registerRetry` setting.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::node::wire::{call, ControlRequest, ControlResponse};
use crate::types::node::NodeInfo;

/// What the registration subsystem hands back to the rest of the node once
/// a master accepts it.
#[derive(Debug, Clone)]
pub struct RegistrationHandle {
    pub node_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Registers against `master_url`, retrying up to `max_retries` times with
/// exponential backoff. Each attempt is itself bounded by `call_timeout`.
pub async fn register_with_retry(
    master_url: &str,
    info: NodeInfo,
    max_retries: u32,
    call_timeout: Duration,
) -> Result<RegistrationHandle> {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match try_register(master_url, &info, call_timeout).await {
            Ok(handle) => {
                info!(node_id = %handle.node_id, master = %master_url, attempt, "registered with master");
                return Ok(handle);
            }
            Err(e) if attempt >= max_retries => {
                warn!(master = %master_url, attempt, error = %e, "registration exhausted retries");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                warn!(master = %master_url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "registration failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_register(master_url: &str, info: &NodeInfo, call_timeout: Duration) -> Result<RegistrationHandle> {
    let request = ControlRequest::Register { info: info.clone() };
    match call(master_url, &request, call_timeout).await? {
        ControlResponse::Registered(resp) if resp.accepted => {
            Ok(RegistrationHandle { node_id: resp.assigned_id, expires_at: resp.expires_at })
        }
        ControlResponse::Registered(_) => {
            Err(Error::AuthenticationFailed { message: "master rejected registration".to_string() })
        }
        ControlResponse::Error { message } => Err(Error::AuthenticationFailed { message }),
        _ => Err(Error::ProtocolMalformed { message: "unexpected response to register".to_string() }),
    }
}

/// Unregisters from `master_url`. Best-effort: errors are logged, not
/// propagated, since this typically runs during shutdown.
pub async fn unregister(master_url: &str, node_id: &str, call_timeout: Duration) {
    let request = ControlRequest::Unregister { node_id: node_id.to_string() };
    if let Err(e) = call(master_url, &request, call_timeout).await {
        warn!(node_id, master = %master_url, error = %e, "failed to unregister cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_fails_fast_when_master_unreachable() {
        let info = test_node_info();
        let err = register_with_retry("ws://127.0.0.1:1", info, 1, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. }));
    }

    fn test_node_info() -> NodeInfo {
        let now = Utc::now();
        NodeInfo {
            id: "pending".into(),
            name: "test-node".into(),
            address: "127.0.0.1".into(),
            port: 9000,
            role: crate::types::node::NodeRole::Client,
            status: crate::types::node::NodeStatus::Online,
            version: "0.1.0".into(),
            tags: vec![],
            metadata: Default::default(),
            capabilities: Default::default(),
            resources: Default::default(),
            created_at: now,
            updated_at: now,
            last_seen: now,
        }
    }
}
