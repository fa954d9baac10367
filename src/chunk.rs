//! Chunk codec: payload slices <-> DNS query names
//!
//! Every query name carries one chunk:
//!
//! ```text
//! <marker><hex of up to 31 bytes>.<hex of up to 31 bytes>. ... .<suffix domain>
//! ```
//!
//! The marker is `0` (more data follows), `1` (last chunk of the payload),
//! `P` (keepalive ping) or `H` (handshake). Pings and handshakes carry a
//! 2-byte big-endian counter in place of data. Hex is upper case on the
//! wire; decoding accepts either case since resolvers may randomise it.

use crate::dns::{self, build_query, DnsError, Result, MAX_NAME_LEN, T_NULL};

/// Source bytes per sub-label (62 hex characters, plus the marker fits 63)
pub const CHUNK_BYTES: usize = 31;

/// Largest payload the client buffers, and the default decode capacity
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Longest name text whose wire form fits the 255-byte limit
const MAX_NAME_TEXT_LEN: usize = MAX_NAME_LEN - 2;

const MARKER_MORE: u8 = b'0';
const MARKER_LAST: u8 = b'1';
const MARKER_PING: u8 = b'P';
const MARKER_HANDSHAKE: u8 = b'H';

/// One chunk, as carried in a query name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkMessage {
    /// Slice of the pending payload; `last` marks the final slice
    Data { last: bool, bytes: Vec<u8> },
    /// Keepalive, gives the server a query to answer
    Ping { counter: u16 },
    /// Session start signal
    Handshake { counter: u16 },
}

impl ChunkMessage {
    fn marker(&self) -> u8 {
        match self {
            ChunkMessage::Data { last: false, .. } => MARKER_MORE,
            ChunkMessage::Data { last: true, .. } => MARKER_LAST,
            ChunkMessage::Ping { .. } => MARKER_PING,
            ChunkMessage::Handshake { .. } => MARKER_HANDSHAKE,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            ChunkMessage::Data { bytes, .. } => bytes.clone(),
            ChunkMessage::Ping { counter } | ChunkMessage::Handshake { counter } => {
                counter.to_be_bytes().to_vec()
            }
        }
    }
}

/// A query ready to go on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundQuery {
    pub id: u16,
    pub message: Vec<u8>,
}

/// Length of the name text for `n` data bytes under a suffix of `suffix_len`
fn encoded_name_len(n: usize, suffix_len: usize) -> usize {
    let dots = n.div_ceil(CHUNK_BYTES).saturating_sub(1);
    1 + 2 * n + dots + 1 + suffix_len
}

/// Data bytes that fit in one query name under a suffix of `suffix_len`.
///
/// Starts from the classic estimate `a = (255 - S - 2) / 2; a -= a / 31`
/// and settles on the largest count whose name still fits the wire limit,
/// which the estimate misses by one byte in either direction for some
/// suffix lengths.
pub fn chunk_capacity(suffix_len: usize) -> usize {
    let estimate = MAX_NAME_LEN.saturating_sub(suffix_len + 2) / 2;
    let mut avail = estimate - estimate / CHUNK_BYTES;

    while avail > 0 && encoded_name_len(avail, suffix_len) > MAX_NAME_TEXT_LEN {
        avail -= 1;
    }
    while encoded_name_len(avail + 1, suffix_len) <= MAX_NAME_TEXT_LEN {
        avail += 1;
    }
    avail
}

fn normalize_suffix(suffix: &str) -> Result<String> {
    let suffix = suffix.trim_matches('.');
    // Labels and overall length must be valid on their own
    dns::name::wire_len(suffix)?;
    Ok(suffix.to_string())
}

/// Client side: turns payload slices and control signals into queries
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    suffix: String,
    capacity: usize,
}

impl ChunkEncoder {
    /// Create an encoder for the given suffix domain
    pub fn new(suffix: &str) -> Result<Self> {
        let suffix = normalize_suffix(suffix)?;
        let capacity = chunk_capacity(suffix.len());

        // Control signals need room for their 2-byte counter
        if capacity < 2 {
            return Err(DnsError::SuffixTooLong(suffix.len()));
        }

        Ok(Self { suffix, capacity })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Data bytes carried by a full chunk
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the next chunk from the unsent part of a payload.
    ///
    /// The chunk is marked last iff it covers everything in `remaining`.
    pub fn next_data_chunk(&self, remaining: &[u8]) -> ChunkMessage {
        let avail = self.capacity.min(remaining.len());
        ChunkMessage::Data {
            last: avail == remaining.len(),
            bytes: remaining[..avail].to_vec(),
        }
    }

    /// Encode a chunk as a query name
    pub fn encode_name(&self, chunk: &ChunkMessage) -> Result<String> {
        let body = chunk.body();
        if body.len() > self.capacity {
            return Err(DnsError::PayloadTooLarge(body.len(), self.capacity));
        }

        let mut name = String::with_capacity(encoded_name_len(body.len(), self.suffix.len()));
        name.push(chunk.marker() as char);

        for (i, part) in body.chunks(CHUNK_BYTES).enumerate() {
            if i > 0 {
                name.push('.');
            }
            name.push_str(&hex::encode_upper(part));
        }

        name.push('.');
        name.push_str(&self.suffix);

        Ok(name)
    }

    /// Encode a chunk as a complete NULL query with transaction id `id`
    pub fn encode_query(&self, id: u16, chunk: &ChunkMessage) -> Result<OutboundQuery> {
        let name = self.encode_name(chunk)?;
        let message = build_query(id, &name, T_NULL)?;
        Ok(OutboundQuery { id, message })
    }
}

/// Server side: recovers chunks from query names
#[derive(Debug, Clone)]
pub struct ChunkDecoder {
    suffix: String,
    capacity: usize,
}

impl ChunkDecoder {
    /// Create a decoder for the given suffix domain
    pub fn new(suffix: &str) -> Result<Self> {
        Self::with_capacity(suffix, MAX_PAYLOAD_LEN)
    }

    /// Create a decoder refusing chunks of more than `capacity` data bytes
    pub fn with_capacity(suffix: &str, capacity: usize) -> Result<Self> {
        let suffix = normalize_suffix(suffix)?.to_ascii_lowercase();
        Ok(Self { suffix, capacity })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Decode a query name into the chunk it carries
    pub fn decode(&self, name: &str) -> Result<ChunkMessage> {
        let name = name.trim_end_matches('.');

        // ASCII lowercasing keeps byte offsets intact
        let at = name
            .to_ascii_lowercase()
            .strip_suffix(self.suffix.as_str())
            .filter(|rest| rest.is_empty() || rest.ends_with('.'))
            .map(|rest| rest.len())
            .ok_or_else(|| DnsError::SuffixNotFound(self.suffix.clone()))?;

        let encoded = &name[..at];
        let marker = *encoded
            .as_bytes()
            .first()
            .ok_or_else(|| DnsError::InvalidMessage(format!("no chunk before {}", self.suffix)))?;
        if !marker.is_ascii() {
            return Err(DnsError::UnknownMarker(marker));
        }

        let mut bytes = Vec::new();
        for label in encoded[1..].split('.').filter(|l| !l.is_empty()) {
            let decoded = hex::decode(label)?;
            if bytes.len() + decoded.len() > self.capacity {
                return Err(DnsError::CapacityExceeded(self.capacity));
            }
            bytes.extend_from_slice(&decoded);
        }

        match marker.to_ascii_uppercase() {
            MARKER_MORE => Ok(ChunkMessage::Data { last: false, bytes }),
            MARKER_LAST => Ok(ChunkMessage::Data { last: true, bytes }),
            MARKER_PING => Ok(ChunkMessage::Ping {
                counter: counter_from(&bytes)?,
            }),
            MARKER_HANDSHAKE => Ok(ChunkMessage::Handshake {
                counter: counter_from(&bytes)?,
            }),
            other => Err(DnsError::UnknownMarker(other)),
        }
    }
}

fn counter_from(bytes: &[u8]) -> Result<u16> {
    match bytes {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(DnsError::InvalidMessage(format!(
            "control signal carries {} bytes, expected 2",
            bytes.len()
        ))),
    }
}
