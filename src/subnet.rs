//! Subnet scanner: optional coordinator-side discovery of candidate workers
//! (spec §4.6). Probes host:port pairs for a known "info" HTTP response
//! within a bounded timeout. A hit is only ever a hint handed to the
//! registry — the worker still completes an explicit registration.
//!
//! Sweeps a CIDR block and port range with bounded concurrency, rather than
//! dialing a single known peer, using a timeout-bounded `TcpStream` connect
//! per candidate address.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Error, Result};

/// A discovered candidate worker. Offered to the registry as a hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub address: Ipv4Addr,
    pub port: u16,
}

/// An IPv4 CIDR block, e.g. `192.168.1.0/24`.
#[derive(Debug, Clone, Copy)]
pub struct Cidr {
    network: u32,
    prefix_len: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| Error::config_field_invalid("cidr", format!("'{s}' is missing a /prefix")))?;
        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| Error::config_field_invalid("cidr", format!("'{addr_part}' is not a valid IPv4 address")))?;
        let prefix_len: u8 = len_part
            .parse()
            .map_err(|_| Error::config_field_invalid("cidr", format!("'{len_part}' is not a valid prefix length")))?;
        if prefix_len > 32 {
            return Err(Error::config_field_invalid("cidr", "prefix length must be 0-32"));
        }
        let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
        Ok(Self { network: u32::from(addr) & mask, prefix_len })
    }

    /// Every host address in the block. Network and broadcast addresses are
    /// excluded for prefixes shorter than /31.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let host_bits = 32 - self.prefix_len;
        if host_bits == 0 {
            return vec![Ipv4Addr::from(self.network)];
        }
        let count = 1u32 << host_bits;
        let (start, end) = if host_bits >= 2 { (1, count - 1) } else { (0, count) };
        (start..end).map(|offset| Ipv4Addr::from(self.network + offset)).collect()
    }
}

async fn probe(client: &reqwest::Client, host: Ipv4Addr, port: u16) -> Option<DiscoveredHost> {
    let resp = client.get(format!("http://{host}:{port}/info")).send().await.ok()?;
    if resp.status().is_success() {
        Some(DiscoveredHost { address: host, port })
    } else {
        None
    }
}

/// Sweeps every host in `cidrs` across `port_range`, probing up to
/// `concurrency` targets at a time. Returns every host:port that answered.
pub async fn scan(cidrs: &[Cidr], port_range: RangeInclusive<u16>, request_timeout: Duration, concurrency: usize) -> Vec<DiscoveredHost> {
    let targets: Vec<(Ipv4Addr, u16)> =
        cidrs.iter().flat_map(|cidr| cidr.hosts()).flat_map(|host| port_range.clone().map(move |port| (host, port))).collect();

    debug!(target_count = targets.len(), "starting subnet scan");

    let client = match reqwest::Client::builder().timeout(request_timeout).build() {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(targets.len());
    for (host, port) in targets {
        let semaphore = semaphore.clone();
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            probe(&client, host, port).await
        }));
    }

    let mut found = Vec::new();
    for handle in handles {
        if let Ok(Some(host)) = handle.await {
            found.push(host);
        }
    }
    found
}
