//! Library-wide configuration (§6): every tunable knob for header storage,
//! orphan handling, peer-group sizing, and timeouts, gathered behind a
//! fluent builder so a caller only states the values it cares to override.

use crate::network_params::Network;
use std::path::PathBuf;
use std::time::Duration;

/// Resolved configuration for a running node. Construct via
/// [`ConfigBuilder`]; there is no public way to build one with invalid
/// combinations (e.g. a header store capacity of zero).
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub data_dir: PathBuf,
    pub header_store_capacity: u32,
    pub max_peers: usize,
    pub min_peers: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub keepalive_interval: Duration,
    pub stale_tip_timeout: Duration,
    pub bloom_false_positive_rate: f64,
    pub user_agent: String,
    pub autosave_interval: Duration,
    /// How long a peer may go without sending any message before it is
    /// dropped for silence (§5 "peer silence").
    pub peer_silence_timeout: Duration,
    /// How long to wait for a requested `tx`/`block` to arrive before
    /// failing that request (§5 "getdata response per fingerprint").
    pub getdata_timeout: Duration,
    /// How long a broadcast gives peers to `getdata` (and not `reject`)
    /// before failing (§5 "broadcast acknowledgement").
    pub broadcast_ack_timeout: Duration,
    /// Maximum peers an outgoing transaction is announced to (§4.5).
    pub max_broadcast_peers: usize,
    /// Fee rate used for size-based fee estimation, in units per kilobyte.
    pub fee_per_kb: i64,
}

impl Config {
    pub fn builder(network: Network) -> ConfigBuilder {
        ConfigBuilder::new(network)
    }
}

/// Builder for [`Config`]. Every setter takes `self` by value and returns
/// `Self`, so calls chain: `Config::builder(Network::Mainnet).max_peers(16).build()`.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    network: Network,
    data_dir: Option<PathBuf>,
    header_store_capacity: u32,
    max_peers: usize,
    min_peers: usize,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    keepalive_interval: Duration,
    stale_tip_timeout: Duration,
    bloom_false_positive_rate: f64,
    user_agent: String,
    autosave_interval: Duration,
    peer_silence_timeout: Duration,
    getdata_timeout: Duration,
    broadcast_ack_timeout: Duration,
    max_broadcast_peers: usize,
    fee_per_kb: i64,
}

impl ConfigBuilder {
    pub fn new(network: Network) -> Self {
        ConfigBuilder {
            network,
            data_dir: None,
            header_store_capacity: 600_000,
            max_peers: 8,
            min_peers: 2,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(120),
            stale_tip_timeout: Duration::from_secs(20 * 60),
            bloom_false_positive_rate: 0.0001,
            user_agent: "/spv-net:0.1.0/".to_string(),
            autosave_interval: Duration::from_secs(60),
            peer_silence_timeout: Duration::from_secs(20 * 60),
            getdata_timeout: Duration::from_secs(60),
            broadcast_ack_timeout: Duration::from_secs(20),
            max_broadcast_peers: 8,
            fee_per_kb: 5000,
        }
    }

    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn header_store_capacity(mut self, capacity: u32) -> Self {
        self.header_store_capacity = capacity;
        self
    }

    pub fn max_peers(mut self, n: usize) -> Self {
        self.max_peers = n;
        self
    }

    pub fn min_peers(mut self, n: usize) -> Self {
        self.min_peers = n;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    pub fn keepalive_interval(mut self, d: Duration) -> Self {
        self.keepalive_interval = d;
        self
    }

    pub fn stale_tip_timeout(mut self, d: Duration) -> Self {
        self.stale_tip_timeout = d;
        self
    }

    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn autosave_interval(mut self, d: Duration) -> Self {
        self.autosave_interval = d;
        self
    }

    pub fn peer_silence_timeout(mut self, d: Duration) -> Self {
        self.peer_silence_timeout = d;
        self
    }

    pub fn getdata_timeout(mut self, d: Duration) -> Self {
        self.getdata_timeout = d;
        self
    }

    pub fn broadcast_ack_timeout(mut self, d: Duration) -> Self {
        self.broadcast_ack_timeout = d;
        self
    }

    pub fn max_broadcast_peers(mut self, n: usize) -> Self {
        self.max_broadcast_peers = n;
        self
    }

    pub fn fee_per_kb(mut self, units: i64) -> Self {
        self.fee_per_kb = units;
        self
    }

    /// Finalizes the configuration, defaulting `data_dir` to
    /// `./spv-data/<network id>` if it was never set, and clamping
    /// `header_store_capacity` and `min_peers`/`max_peers` to sane floors.
    pub fn build(self) -> Config {
        let data_dir = self
            .data_dir
            .unwrap_or_else(|| PathBuf::from("spv-data").join(self.network.id()));
        let max_peers = self.max_peers.max(1);
        let min_peers = self.min_peers.min(max_peers);
        Config {
            network: self.network,
            data_dir,
            header_store_capacity: self.header_store_capacity.max(2016),
            max_peers,
            min_peers,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            keepalive_interval: self.keepalive_interval,
            stale_tip_timeout: self.stale_tip_timeout,
            bloom_false_positive_rate: self.bloom_false_positive_rate,
            user_agent: self.user_agent,
            autosave_interval: self.autosave_interval,
            peer_silence_timeout: self.peer_silence_timeout,
            getdata_timeout: self.getdata_timeout,
            broadcast_ack_timeout: self.broadcast_ack_timeout,
            max_broadcast_peers: self.max_broadcast_peers.max(1),
            fee_per_kb: self.fee_per_kb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_fills_in_a_network_scoped_data_dir() {
        let config = Config::builder(Network::Mainnet).build();
        assert!(config.data_dir.ends_with("bitcoin.main"));
    }

    #[test]
    fn explicit_data_dir_is_respected() {
        let config = Config::builder(Network::Testnet).data_dir("/tmp/custom").build();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn min_peers_is_clamped_to_max_peers() {
        let config = Config::builder(Network::Regtest).max_peers(2).min_peers(10).build();
        assert_eq!(config.min_peers, 2);
    }

    #[test]
    fn header_store_capacity_has_a_floor() {
        let config = Config::builder(Network::Regtest).header_store_capacity(10).build();
        assert_eq!(config.header_store_capacity, 2016);
    }

    #[test]
    fn fluent_chain_overrides_every_field() {
        let config = Config::builder(Network::Signet)
            .max_peers(16)
            .min_peers(4)
            .connect_timeout(Duration::from_secs(3))
            .user_agent("/custom:1.0/")
            .build();
        assert_eq!(config.max_peers, 16);
        assert_eq!(config.min_peers, 4);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.user_agent, "/custom:1.0/");
    }
}
