//! Per-network parameters: magic bytes, default port, genesis header, and
//! retarget rule constants.
//!
//! These are the "context" object referred to in the design notes: a value
//! passed explicitly to every component that needs network-specific
//! constants, rather than a global singleton.

use crate::difficulty::Target;
use crate::fingerprint::Fingerprint;
use crate::header::Header;
use serde::{Deserialize, Serialize};

/// One of the four networks this library knows how to speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    /// The ASCII identifier string used in configuration and logs, of the
    /// form `"<org>.<purpose>"`.
    pub fn id(self) -> &'static str {
        match self {
            Network::Mainnet => "bitcoin.main",
            Network::Testnet => "bitcoin.test",
            Network::Signet => "bitcoin.signet",
            Network::Regtest => "bitcoin.regtest",
        }
    }

    pub fn params(self) -> NetworkParams {
        match self {
            Network::Mainnet => NetworkParams::mainnet(),
            Network::Testnet => NetworkParams::testnet(),
            Network::Signet => NetworkParams::signet(),
            Network::Regtest => NetworkParams::regtest(),
        }
    }
}

/// Network-specific constants needed by the codec, the chain, and the
/// peer-group's dialing/discovery logic.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub network: Network,
    pub magic: [u8; 4],
    pub default_port: u16,
    pub max_money: i64,
    pub genesis: Header,
    /// Target seconds between blocks.
    pub target_block_interval_secs: u32,
    /// Number of headers between difficulty retargets.
    pub retarget_interval: u32,
    /// Maximum permitted target (easiest allowed difficulty).
    pub max_target: Target,
    /// DNS seed hostnames used by peer discovery.
    pub dns_seeds: &'static [&'static str],
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        NetworkParams {
            network: Network::Mainnet,
            magic: [0xF9, 0xBE, 0xB4, 0xD9],
            default_port: 8333,
            max_money: crate::amount::MAX_MONEY,
            genesis: mainnet_genesis(),
            target_block_interval_secs: 600,
            retarget_interval: 2016,
            max_target: Target::from_compact(0x1d00ffff).expect("valid compact target"),
            dns_seeds: &["seed.bitcoin.sipa.be", "dnsseed.bluematt.me"],
        }
    }

    pub fn testnet() -> Self {
        NetworkParams {
            network: Network::Testnet,
            magic: [0x0B, 0x11, 0x09, 0x07],
            default_port: 18333,
            max_money: crate::amount::MAX_MONEY,
            genesis: testnet_genesis(),
            target_block_interval_secs: 600,
            retarget_interval: 2016,
            max_target: Target::from_compact(0x1d00ffff).expect("valid compact target"),
            dns_seeds: &["testnet-seed.bitcoin.jonasschnelli.ch"],
        }
    }

    pub fn signet() -> Self {
        NetworkParams {
            network: Network::Signet,
            magic: [0x0A, 0x03, 0xCF, 0x40],
            default_port: 38333,
            max_money: crate::amount::MAX_MONEY,
            genesis: signet_genesis(),
            target_block_interval_secs: 600,
            retarget_interval: 2016,
            max_target: Target::from_compact(0x1e0377ae).expect("valid compact target"),
            dns_seeds: &["seed.signet.bitcoin.sprovoost.nl"],
        }
    }

    pub fn regtest() -> Self {
        NetworkParams {
            network: Network::Regtest,
            magic: [0xFA, 0xBF, 0xB5, 0xDA],
            default_port: 18444,
            max_money: crate::amount::MAX_MONEY,
            genesis: regtest_genesis(),
            target_block_interval_secs: 600,
            retarget_interval: 2016,
            max_target: Target::from_compact(0x207fffff).expect("valid compact target"),
            dns_seeds: &[],
        }
    }
}

fn mainnet_genesis() -> Header {
    Header {
        version: 1,
        prev_fingerprint: Fingerprint::ZERO,
        merkle_root: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
            .parse()
            .expect("valid fingerprint literal"),
        timestamp: 1_231_006_505,
        bits: 0x1d00ffff,
        nonce: 2_083_236_893,
    }
}

fn testnet_genesis() -> Header {
    let mut g = mainnet_genesis();
    g.timestamp = 1_296_688_602;
    g.nonce = 414_098_458;
    g
}

fn signet_genesis() -> Header {
    let mut g = mainnet_genesis();
    g.timestamp = 1_598_918_400;
    g.bits = 0x1e0377ae;
    g.nonce = 52_613_770;
    g
}

fn regtest_genesis() -> Header {
    let mut g = mainnet_genesis();
    g.bits = 0x207fffff;
    g.nonce = 2;
    g
}
