//! Peer address discovery (§4.5): DNS seeds, a static fallback list, and a
//! reservoir of addresses peers have gossiped to us via `addr`/`addrv2`.

use spv_core::network_params::NetworkParams;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::{debug, warn};

/// Bound on the address book so a chatty or malicious peer cannot grow it
/// without limit; oldest-by-arrival entries are evicted first.
const ADDRESS_BOOK_CAPACITY: usize = 1024;

/// Resolves every configured DNS seed for `params`, returning whatever
/// addresses were found. A seed that fails to resolve is logged and
/// skipped rather than failing discovery outright.
pub async fn resolve_dns_seeds(params: &NetworkParams) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    for seed in params.dns_seeds {
        let host = format!("{seed}:{}", params.default_port);
        match lookup_host(&host).await {
            Ok(addrs) => {
                let mut found = 0;
                for addr in addrs {
                    out.push(addr);
                    found += 1;
                }
                debug!(seed, found, "resolved DNS seed");
            }
            Err(error) => warn!(seed, %error, "DNS seed lookup failed"),
        }
    }
    out
}

/// A bounded, recency-ordered pool of candidate addresses to dial, fed by
/// DNS seeds, a static configured list, and peer-supplied `addr` messages.
pub struct AddressBook {
    entries: VecDeque<SocketAddr>,
    static_seeds: Vec<SocketAddr>,
}

impl AddressBook {
    pub fn new(static_seeds: Vec<SocketAddr>) -> Self {
        AddressBook { entries: VecDeque::new(), static_seeds }
    }

    /// Adds one address, evicting the oldest entry if the book is full.
    /// No-op for addresses already present.
    pub fn insert(&mut self, addr: SocketAddr) {
        if is_routable(&addr.ip()) && !self.entries.contains(&addr) {
            if self.entries.len() >= ADDRESS_BOOK_CAPACITY {
                self.entries.pop_front();
            }
            self.entries.push_back(addr);
        }
    }

    pub fn extend(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            self.insert(addr);
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) {
        self.entries.retain(|a| a != addr);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the next candidate to dial, preferring gossiped addresses
    /// over the static list and rotating so the same address is not
    /// returned twice in a row absent other candidates.
    pub fn next_candidate(&mut self, exclude: &[SocketAddr]) -> Option<SocketAddr> {
        if let Some(pos) = self.entries.iter().position(|a| !exclude.contains(a)) {
            let addr = self.entries.remove(pos).expect("position just found");
            self.entries.push_back(addr);
            return Some(addr);
        }
        self.static_seeds.iter().find(|a| !exclude.contains(a)).copied()
    }
}

fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_loopback(),
        IpAddr::V6(v6) => !v6.is_unspecified() && !v6.is_loopback(),
    }
}
