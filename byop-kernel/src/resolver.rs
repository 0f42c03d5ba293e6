/**
 * RÉSOLVEUR DE HOSTS - Adresses sACN tenues à jour hors du tick de rendu
 *
 * RÔLE :
 * - Le tick demande une adresse au cache, sans jamais bloquer
 * - Une tâche de fond résout les noms en attente (DNS / mDNS du système)
 * - Échec : on garde la dernière adresse connue et on réessaie plus tard,
 *   avec un délai qui double jusqu'à MAX_BACKOFF
 */

use crate::e131::E131_PORT;
use crate::state::Shared;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Une adresse résolue est revérifiée après ce délai (baux DHCP).
const REFRESH_AFTER: Duration = Duration::from_secs(60);
const SCAN_INTERVAL: Duration = Duration::from_millis(250);

/// A host given as an IP, with or without a port, needs no lookup. The port
/// belongs to the device's HTTP API and is replaced by the sACN port.
pub fn literal_addr(host: &str) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, E131_PORT));
    }
    host.parse::<SocketAddr>().ok().map(|addr| SocketAddr::new(addr.ip(), E131_PORT))
}

/// `name:port` -> `name`.
pub fn host_name(host: &str) -> &str {
    host.rsplit_once(':').map(|(name, _)| name).unwrap_or(host)
}

struct HostEntry {
    addr: Option<SocketAddr>,
    next_lookup: Instant,
    backoff: Duration,
}

/// Resolved sACN endpoints, shared between the sink and the resolver task.
#[derive(Clone, Default)]
pub struct HostCache {
    hosts: Shared<HashMap<String, HostEntry>>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never blocks. An unknown name is queued for the resolver and `None`
    /// is returned until a lookup succeeds.
    pub fn address(&self, host: &str) -> Option<SocketAddr> {
        if let Some(addr) = literal_addr(host) {
            return Some(addr);
        }
        let mut hosts = self.hosts.lock();
        if let Some(entry) = hosts.get(host) {
            return entry.addr;
        }
        debug!("queueing {host} for resolution");
        hosts.insert(
            host.to_string(),
            HostEntry { addr: None, next_lookup: Instant::now(), backoff: MIN_BACKOFF },
        );
        None
    }

    /// Hosts whose next lookup is due at `now`.
    pub fn due(&self, now: Instant) -> Vec<String> {
        self.hosts
            .lock()
            .iter()
            .filter(|(_, entry)| entry.next_lookup <= now)
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn record(&self, host: &str, result: Option<SocketAddr>, now: Instant) {
        let mut hosts = self.hosts.lock();
        let Some(entry) = hosts.get_mut(host) else {
            return;
        };
        match result {
            Some(addr) => {
                if entry.addr != Some(addr) {
                    info!("{host} resolved to {}", addr.ip());
                }
                entry.addr = Some(addr);
                entry.backoff = MIN_BACKOFF;
                entry.next_lookup = now + REFRESH_AFTER;
            }
            None => {
                debug!("could not resolve {host}, retrying in {:?}", entry.backoff);
                entry.next_lookup = now + entry.backoff;
                entry.backoff = (entry.backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    /// Runs `lookup` for every due host and returns how many lookups ran.
    /// The cache stays unlocked while lookups are in flight.
    pub async fn refresh_due<F, Fut>(&self, now: Instant, lookup: F) -> usize
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Option<SocketAddr>>,
    {
        let due = self.due(now);
        for host in &due {
            let result = lookup(host.clone()).await;
            self.record(host, result, now);
        }
        due.len()
    }
}

/// Lookup through the system resolver, run on tokio's blocking pool.
pub async fn lookup(host: String) -> Option<SocketAddr> {
    match tokio::net::lookup_host((host_name(&host), E131_PORT)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            debug!("lookup of {host} failed: {e}");
            None
        }
    }
}

pub fn spawn_resolver(cache: HostCache) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SCAN_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            cache.refresh_due(Instant::now(), lookup).await;
        }
    })
}
