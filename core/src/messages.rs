//! The P2P message catalog: every payload type a peer connection sends or
//! receives (§4.4, §5), plus the fixed frame header that wraps each one on
//! the wire.
//!
//! Each payload implements [`Encodable`]; [`Message`] is the tagged union
//! dispatched on the frame's 12-byte ASCII command string. Unrecognized
//! commands decode to [`Message::Unknown`] rather than erroring, since a
//! peer speaking a newer protocol version may send message types this
//! library doesn't need to act on.

use crate::codec::{Encodable, Reader, Writer};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::header::Header;
use crate::transaction::Transaction;
use crate::bloom::BloomFilter;
use serde::{Deserialize, Serialize};

pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;
const COMMAND_SIZE: usize = 12;
pub const FRAME_HEADER_SIZE: usize = 4 + COMMAND_SIZE + 4 + 4;

/// The fixed-size frame header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub command: [u8; COMMAND_SIZE],
    pub payload_len: u32,
    pub checksum: [u8; 4],
}

impl FrameHeader {
    pub fn command_str(&self) -> String {
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        String::from_utf8_lossy(&self.command[..end]).into_owned()
    }

    fn command_bytes(name: &str) -> [u8; COMMAND_SIZE] {
        let mut out = [0u8; COMMAND_SIZE];
        let bytes = name.as_bytes();
        out[..bytes.len().min(COMMAND_SIZE)].copy_from_slice(&bytes[..bytes.len().min(COMMAND_SIZE)]);
        out
    }

    pub fn for_payload(magic: [u8; 4], command: &str, payload: &[u8]) -> Self {
        FrameHeader {
            magic,
            command: Self::command_bytes(command),
            payload_len: payload.len() as u32,
            checksum: checksum(payload),
        }
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Fingerprint::hash(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.0[..4]);
    out
}

impl Encodable for FrameHeader {
    fn encode(&self, w: &mut Writer) {
        w.write_bytes(&self.magic);
        w.write_bytes(&self.command);
        w.write_u32_le(self.payload_len);
        w.write_bytes(&self.checksum);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let magic = r.read_array()?;
        let command = r.read_array()?;
        let payload_len = r.read_u32_le()?;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(Error::MessageTooLarge(payload_len));
        }
        let checksum = r.read_array()?;
        Ok(FrameHeader { magic, command, payload_len, checksum })
    }
}

/// `version`: the handshake's first message, advertising protocol version
/// and services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver_services: u64,
    pub receiver_ip: [u8; 16],
    pub receiver_port: u16,
    pub sender_services: u64,
    pub sender_ip: [u8; 16],
    pub sender_port: u16,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl Encodable for VersionPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_i32_le(self.version);
        w.write_u64_le(self.services);
        w.write_i64_le(self.timestamp);
        w.write_u64_le(self.receiver_services);
        w.write_bytes(&self.receiver_ip);
        w.write_u16_le(self.receiver_port.to_be());
        w.write_u64_le(self.sender_services);
        w.write_bytes(&self.sender_ip);
        w.write_u16_le(self.sender_port.to_be());
        w.write_u64_le(self.nonce);
        w.write_var_str(&self.user_agent);
        w.write_i32_le(self.start_height);
        w.write_u8(self.relay as u8);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(VersionPayload {
            version: r.read_i32_le()?,
            services: r.read_u64_le()?,
            timestamp: r.read_i64_le()?,
            receiver_services: r.read_u64_le()?,
            receiver_ip: r.read_array()?,
            receiver_port: u16::from_le_bytes(r.read_array()?).to_be(),
            sender_services: r.read_u64_le()?,
            sender_ip: r.read_array()?,
            sender_port: u16::from_le_bytes(r.read_array()?).to_be(),
            nonce: r.read_u64_le()?,
            user_agent: r.read_var_str(true)?,
            start_height: r.read_i32_le()?,
            relay: r.remaining() > 0 && r.read_u8()? != 0,
        })
    }
}

/// A network address as carried in `addr`/`addrv2` and inside `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub timestamp: u32,
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl Encodable for NetworkAddress {
    fn encode(&self, w: &mut Writer) {
        w.write_u32_le(self.timestamp);
        w.write_u64_le(self.services);
        w.write_bytes(&self.ip);
        w.write_u16_le(self.port.to_be());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(NetworkAddress {
            timestamp: r.read_u32_le()?,
            services: r.read_u64_le()?,
            ip: r.read_array()?,
            port: u16::from_le_bytes(r.read_array()?).to_be(),
        })
    }
}

/// A `BIP155` network identifier tag, as carried in `addrv2` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrV2Network {
    Ipv4,
    Ipv6,
    TorV2,
    TorV3,
    I2p,
    Cjdns,
    Unknown(u8),
}

impl AddrV2Network {
    fn id(self) -> u8 {
        match self {
            AddrV2Network::Ipv4 => 1,
            AddrV2Network::Ipv6 => 2,
            AddrV2Network::TorV2 => 3,
            AddrV2Network::TorV3 => 4,
            AddrV2Network::I2p => 5,
            AddrV2Network::Cjdns => 6,
            AddrV2Network::Unknown(n) => n,
        }
    }

    fn from_id(id: u8) -> Self {
        match id {
            1 => AddrV2Network::Ipv4,
            2 => AddrV2Network::Ipv6,
            3 => AddrV2Network::TorV2,
            4 => AddrV2Network::TorV3,
            5 => AddrV2Network::I2p,
            6 => AddrV2Network::Cjdns,
            n => AddrV2Network::Unknown(n),
        }
    }
}

/// A single `addrv2` entry (BIP155): a network-id byte followed by a
/// variable-length address, unlike `addr`'s fixed 16-byte IPv6-mapped form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddressV2 {
    pub timestamp: u32,
    pub services: u64,
    pub network: AddrV2Network,
    pub addr: Vec<u8>,
    pub port: u16,
}

impl Encodable for NetworkAddressV2 {
    fn encode(&self, w: &mut Writer) {
        w.write_u32_le(self.timestamp);
        w.write_varint(self.services);
        w.write_u8(self.network.id());
        w.write_var_bytes(&self.addr);
        w.write_u16_le(self.port.to_be());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let timestamp = r.read_u32_le()?;
        let services = r.read_varint(true)?;
        let network = AddrV2Network::from_id(r.read_u8()?);
        let addr = r.read_var_bytes(true)?.to_vec();
        let port = u16::from_le_bytes(r.read_array()?).to_be();
        Ok(NetworkAddressV2 { timestamp, services, network, addr, port })
    }
}

/// The `inv`/`getdata`/`notfound` item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryKind {
    Error,
    Transaction,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTransaction,
    WitnessBlock,
}

impl InventoryKind {
    fn to_u32(self) -> u32 {
        match self {
            InventoryKind::Error => 0,
            InventoryKind::Transaction => 1,
            InventoryKind::Block => 2,
            InventoryKind::FilteredBlock => 3,
            InventoryKind::CompactBlock => 4,
            InventoryKind::WitnessTransaction => 0x4000_0001,
            InventoryKind::WitnessBlock => 0x4000_0002,
        }
    }

    fn from_u32(v: u32) -> Self {
        match v {
            1 => InventoryKind::Transaction,
            2 => InventoryKind::Block,
            3 => InventoryKind::FilteredBlock,
            4 => InventoryKind::CompactBlock,
            0x4000_0001 => InventoryKind::WitnessTransaction,
            0x4000_0002 => InventoryKind::WitnessBlock,
            _ => InventoryKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub kind: InventoryKind,
    pub hash: Fingerprint,
}

impl Encodable for InventoryItem {
    fn encode(&self, w: &mut Writer) {
        w.write_u32_le(self.kind.to_u32());
        w.write_bytes(&self.hash.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let kind = InventoryKind::from_u32(r.read_u32_le()?);
        let hash = Fingerprint(r.read_array()?);
        Ok(InventoryItem { kind, hash })
    }
}

fn encode_vec<T: Encodable>(w: &mut Writer, items: &[T]) {
    w.write_varint(items.len() as u64);
    for item in items {
        item.encode(w);
    }
}

fn decode_vec<T: Encodable>(r: &mut Reader<'_>) -> Result<Vec<T>> {
    let count = r.read_varint(true)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(T::decode(r)?);
    }
    Ok(out)
}

/// `getheaders`/`getblocks`: a block locator plus a stop hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHeadersPayload {
    pub version: i32,
    pub locator_hashes: Vec<Fingerprint>,
    pub stop_hash: Fingerprint,
}

impl Encodable for GetHeadersPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_i32_le(self.version);
        w.write_varint(self.locator_hashes.len() as u64);
        for h in &self.locator_hashes {
            w.write_bytes(&h.0);
        }
        w.write_bytes(&self.stop_hash.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let version = r.read_i32_le()?;
        let count = r.read_varint(true)?;
        let mut locator_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            locator_hashes.push(Fingerprint(r.read_array()?));
        }
        let stop_hash = Fingerprint(r.read_array()?);
        Ok(GetHeadersPayload { version, locator_hashes, stop_hash })
    }
}

/// `headers`: a batch of headers, each followed by a (normally zero)
/// transaction count field carried over from the block wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

impl Encodable for HeadersPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_varint(self.headers.len() as u64);
        for h in &self.headers {
            h.encode(w);
            w.write_varint(0);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.read_varint(true)?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(Header::decode(r)?);
            let _tx_count = r.read_varint(true)?;
        }
        Ok(HeadersPayload { headers })
    }
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Encodable for Block {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        encode_vec(w, &self.transactions);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Block { header: Header::decode(r)?, transactions: decode_vec(r)? })
    }
}

/// `merkleblock`: a header plus a partial Merkle tree proving inclusion of
/// the transactions that matched a peer's Bloom filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBlockPayload {
    pub header: Header,
    pub total_transactions: u32,
    pub hashes: Vec<Fingerprint>,
    pub flags: Vec<u8>,
}

impl Encodable for MerkleBlockPayload {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.write_u32_le(self.total_transactions);
        w.write_varint(self.hashes.len() as u64);
        for h in &self.hashes {
            w.write_bytes(&h.0);
        }
        w.write_var_bytes(&self.flags);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let header = Header::decode(r)?;
        let total_transactions = r.read_u32_le()?;
        let hash_count = r.read_varint(true)?;
        let mut hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            hashes.push(Fingerprint(r.read_array()?));
        }
        let flags = r.read_var_bytes(true)?.to_vec();
        Ok(MerkleBlockPayload { header, total_transactions, hashes, flags })
    }
}

/// Packs a bit vector (in the order `crate::merkle::PartialMerkleTree` uses)
/// into the byte-packed, LSB-first form the wire format requires.
pub fn pack_flag_bits(flags: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; flags.len().div_ceil(8)];
    for (i, &flag) in flags.iter().enumerate() {
        if flag {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub fn unpack_flag_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect()
}

/// `reject`: why a prior message was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayload {
    pub message: String,
    pub code: u8,
    pub reason: String,
    pub data: Vec<u8>,
}

impl Encodable for RejectPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_var_str(&self.message);
        w.write_u8(self.code);
        w.write_var_str(&self.reason);
        w.write_bytes(&self.data);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let message = r.read_var_str(true)?;
        let code = r.read_u8()?;
        let reason = r.read_var_str(true)?;
        let data = r.read_bytes(r.remaining())?.to_vec();
        Ok(RejectPayload { message, code, reason, data })
    }
}

/// `filterload`: install a Bloom filter on this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterLoadPayload(pub BloomFilter);

impl Encodable for FilterLoadPayload {
    fn encode(&self, w: &mut Writer) {
        self.0.encode(w);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(FilterLoadPayload(BloomFilter::decode(r)?))
    }
}

/// `filteradd`: add one more element to the installed filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAddPayload(pub Vec<u8>);

impl Encodable for FilterAddPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_var_bytes(&self.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(FilterAddPayload(r.read_var_bytes(true)?.to_vec()))
    }
}

/// `feefilter`: minimum relay fee rate, in units per 1000 weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeFilterPayload(pub i64);

impl Encodable for FeeFilterPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_i64_le(self.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(FeeFilterPayload(r.read_i64_le()?))
    }
}

macro_rules! empty_payload {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
        pub struct $name;

        impl Encodable for $name {
            fn encode(&self, _w: &mut Writer) {}
            fn decode(_r: &mut Reader<'_>) -> Result<Self> {
                Ok($name)
            }
        }
    };
}

empty_payload!(VerAckPayload);
empty_payload!(MemPoolPayload);
empty_payload!(FilterClearPayload);
empty_payload!(SendHeadersPayload);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload(pub u64);

impl Encodable for PingPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_u64_le(self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(PingPayload(r.read_u64_le()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload(pub u64);

impl Encodable for PongPayload {
    fn encode(&self, w: &mut Writer) {
        w.write_u64_le(self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(PongPayload(r.read_u64_le()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrPayload(pub Vec<NetworkAddress>);

impl Encodable for AddrPayload {
    fn encode(&self, w: &mut Writer) {
        encode_vec(w, &self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(AddrPayload(decode_vec(r)?))
    }
}

/// `addrv2`: the BIP155 successor to `addr`, carrying addresses from
/// networks `addr`'s fixed 16-byte field cannot represent (Tor v3, I2P).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrV2Payload(pub Vec<NetworkAddressV2>);

impl Encodable for AddrV2Payload {
    fn encode(&self, w: &mut Writer) {
        encode_vec(w, &self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(AddrV2Payload(decode_vec(r)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvPayload(pub Vec<InventoryItem>);

impl Encodable for InvPayload {
    fn encode(&self, w: &mut Writer) {
        encode_vec(w, &self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(InvPayload(decode_vec(r)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataPayload(pub Vec<InventoryItem>);

impl Encodable for GetDataPayload {
    fn encode(&self, w: &mut Writer) {
        encode_vec(w, &self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(GetDataPayload(decode_vec(r)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundPayload(pub Vec<InventoryItem>);

impl Encodable for NotFoundPayload {
    fn encode(&self, w: &mut Writer) {
        encode_vec(w, &self.0);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(NotFoundPayload(decode_vec(r)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload(pub Transaction);

impl Encodable for TxPayload {
    fn encode(&self, w: &mut Writer) {
        self.0.encode(w);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(TxPayload(Transaction::decode(r)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload(pub Block);

impl Encodable for BlockPayload {
    fn encode(&self, w: &mut Writer) {
        self.0.encode(w);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(BlockPayload(Block::decode(r)?))
    }
}

/// The tagged union of every message this library sends or understands.
/// `Unknown` preserves the command name and raw payload for messages it
/// does not act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Version(VersionPayload),
    VerAck(VerAckPayload),
    Ping(PingPayload),
    Pong(PongPayload),
    Addr(AddrPayload),
    AddrV2(AddrV2Payload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    NotFound(NotFoundPayload),
    GetHeaders(GetHeadersPayload),
    Headers(HeadersPayload),
    GetBlocks(GetHeadersPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    MemPool(MemPoolPayload),
    FilterLoad(FilterLoadPayload),
    FilterAdd(FilterAddPayload),
    FilterClear(FilterClearPayload),
    MerkleBlock(MerkleBlockPayload),
    Reject(RejectPayload),
    SendHeaders(SendHeadersPayload),
    FeeFilter(FeeFilterPayload),
    Unknown { command: String, payload: Vec<u8> },
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::VerAck(_) => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Addr(_) => "addr",
            Message::AddrV2(_) => "addrv2",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::GetBlocks(_) => "getblocks",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::MemPool(_) => "mempool",
            Message::FilterLoad(_) => "filterload",
            Message::FilterAdd(_) => "filteradd",
            Message::FilterClear(_) => "filterclear",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Reject(_) => "reject",
            Message::SendHeaders(_) => "sendheaders",
            Message::FeeFilter(_) => "feefilter",
            Message::Unknown { command, .. } => command,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Message::Version(p) => p.encode(&mut w),
            Message::VerAck(p) => p.encode(&mut w),
            Message::Ping(p) => p.encode(&mut w),
            Message::Pong(p) => p.encode(&mut w),
            Message::Addr(p) => p.encode(&mut w),
            Message::AddrV2(p) => p.encode(&mut w),
            Message::Inv(p) => p.encode(&mut w),
            Message::GetData(p) => p.encode(&mut w),
            Message::NotFound(p) => p.encode(&mut w),
            Message::GetHeaders(p) => p.encode(&mut w),
            Message::Headers(p) => p.encode(&mut w),
            Message::GetBlocks(p) => p.encode(&mut w),
            Message::Block(p) => p.encode(&mut w),
            Message::Tx(p) => p.encode(&mut w),
            Message::MemPool(p) => p.encode(&mut w),
            Message::FilterLoad(p) => p.encode(&mut w),
            Message::FilterAdd(p) => p.encode(&mut w),
            Message::FilterClear(p) => p.encode(&mut w),
            Message::MerkleBlock(p) => p.encode(&mut w),
            Message::Reject(p) => p.encode(&mut w),
            Message::SendHeaders(p) => p.encode(&mut w),
            Message::FeeFilter(p) => p.encode(&mut w),
            Message::Unknown { payload, .. } => return payload.clone(),
        }
        w.into_bytes()
    }

    /// Encodes this message as a full frame (header + payload) for the given
    /// network's magic bytes.
    pub fn to_frame(&self, magic: [u8; 4]) -> Vec<u8> {
        let payload = self.encode_payload();
        let header = FrameHeader::for_payload(magic, self.command(), &payload);
        let mut w = Writer::new();
        header.encode(&mut w);
        w.write_bytes(&payload);
        w.into_bytes()
    }

    /// Decodes a message body given an already-parsed frame header.
    pub fn from_payload(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        if checksum(payload) != header.checksum {
            return Err(Error::ChecksumMismatch);
        }
        let mut r = Reader::new(payload);
        Ok(match header.command_str().as_str() {
            "version" => Message::Version(VersionPayload::decode(&mut r)?),
            "verack" => Message::VerAck(VerAckPayload::decode(&mut r)?),
            "ping" => Message::Ping(PingPayload::decode(&mut r)?),
            "pong" => Message::Pong(PongPayload::decode(&mut r)?),
            "addr" => Message::Addr(AddrPayload::decode(&mut r)?),
            "addrv2" => Message::AddrV2(AddrV2Payload::decode(&mut r)?),
            "inv" => Message::Inv(InvPayload::decode(&mut r)?),
            "getdata" => Message::GetData(GetDataPayload::decode(&mut r)?),
            "notfound" => Message::NotFound(NotFoundPayload::decode(&mut r)?),
            "getheaders" => Message::GetHeaders(GetHeadersPayload::decode(&mut r)?),
            "headers" => Message::Headers(HeadersPayload::decode(&mut r)?),
            "getblocks" => Message::GetBlocks(GetHeadersPayload::decode(&mut r)?),
            "block" => Message::Block(BlockPayload::decode(&mut r)?),
            "tx" => Message::Tx(TxPayload::decode(&mut r)?),
            "mempool" => Message::MemPool(MemPoolPayload::decode(&mut r)?),
            "filterload" => Message::FilterLoad(FilterLoadPayload::decode(&mut r)?),
            "filteradd" => Message::FilterAdd(FilterAddPayload::decode(&mut r)?),
            "filterclear" => Message::FilterClear(FilterClearPayload::decode(&mut r)?),
            "merkleblock" => Message::MerkleBlock(MerkleBlockPayload::decode(&mut r)?),
            "reject" => Message::Reject(RejectPayload::decode(&mut r)?),
            "sendheaders" => Message::SendHeaders(SendHeadersPayload::decode(&mut r)?),
            "feefilter" => Message::FeeFilter(FeeFilterPayload::decode(&mut r)?),
            other => Message::Unknown { command: other.to_string(), payload: payload.to_vec() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xF9, 0xBE, 0xB4, 0xD9];

    #[test]
    fn ping_round_trips_through_frame() {
        let msg = Message::Ping(PingPayload(42));
        let frame = msg.to_frame(MAGIC);
        let mut r = Reader::new(&frame);
        let header = FrameHeader::decode(&mut r).unwrap();
        assert_eq!(header.command_str(), "ping");
        let payload = r.read_bytes(header.payload_len as usize).unwrap();
        let decoded = Message::from_payload(&header, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn frame_rejects_bad_checksum() {
        let msg = Message::Ping(PingPayload(42));
        let mut frame = msg.to_frame(MAGIC);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let mut r = Reader::new(&frame);
        let header = FrameHeader::decode(&mut r).unwrap();
        let payload = r.read_bytes(header.payload_len as usize).unwrap();
        assert!(matches!(Message::from_payload(&header, payload), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn unrecognized_command_decodes_to_unknown() {
        let header = FrameHeader::for_payload(MAGIC, "notacommand", b"abc");
        let decoded = Message::from_payload(&header, b"abc").unwrap();
        assert!(matches!(decoded, Message::Unknown { .. }));
    }

    #[test]
    fn oversized_payload_length_is_rejected() {
        let mut w = Writer::new();
        w.write_bytes(&MAGIC);
        w.write_bytes(&FrameHeader::command_bytes("tx"));
        w.write_u32_le(MAX_PAYLOAD_SIZE + 1);
        w.write_bytes(&[0u8; 4]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(FrameHeader::decode(&mut r), Err(Error::MessageTooLarge(_))));
    }

    #[test]
    fn addrv2_round_trips_a_tor_v3_address() {
        let msg = Message::AddrV2(AddrV2Payload(vec![NetworkAddressV2 {
            timestamp: 1_600_000_000,
            services: 1,
            network: AddrV2Network::TorV3,
            addr: vec![0x11; 32],
            port: 8333,
        }]));
        let frame = msg.to_frame(MAGIC);
        let mut r = Reader::new(&frame);
        let header = FrameHeader::decode(&mut r).unwrap();
        assert_eq!(header.command_str(), "addrv2");
        let payload = r.read_bytes(header.payload_len as usize).unwrap();
        let decoded = Message::from_payload(&header, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn flag_bit_packing_round_trips() {
        let flags = vec![true, false, true, true, false, false, false, false, true];
        let packed = pack_flag_bits(&flags);
        let unpacked = unpack_flag_bits(&packed, flags.len());
        assert_eq!(unpacked, flags);
    }
}
