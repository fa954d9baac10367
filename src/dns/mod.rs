// DNS wire format for the tunnel
//
// Handles the label encoding of domain names and the handful of DNS
// messages the tunnel exchanges: NULL queries with an EDNS0 OPT record
// upstream, NULL answers downstream.

pub mod name;
pub mod protocol;

pub use name::{decode_labels, encode_labels};
pub use protocol::{
    build_query, build_response, parse_query, parse_response, DnsHeader, ParsedResponse,
    QueryRecord,
};

use thiserror::Error;

/// Maximum DNS label length (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum DNS name length on the wire (RFC 1035)
pub const MAX_NAME_LEN: usize = 255;

/// UDP payload size advertised in the EDNS0 OPT record
pub const EDNS_UDP_PAYLOAD: u16 = 4096;

/// Compression pointers followed before a name is considered looping
pub const MAX_POINTER_JUMPS: usize = 16;

/// NULL resource record type (RFC 1035)
pub const T_NULL: u16 = 10;

/// OPT pseudo-record type (RFC 6891)
pub const T_OPT: u16 = 41;

/// Internet class
pub const C_IN: u16 = 1;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Label too long: {0} bytes (max: 63)")]
    LabelTooLong(usize),

    #[error("Name too long: {0} bytes (max: 255)")]
    NameTooLong(usize),

    #[error("Truncated message: {0}")]
    Truncated(&'static str),

    #[error("Invalid DNS message: {0}")]
    InvalidMessage(String),

    #[error("Compression pointer loop at offset {0}")]
    PointerLoop(usize),

    #[error("Expected a response, got a query")]
    NotAResponse,

    #[error("Expected a query, got a response")]
    NotAQuery,

    #[error("Expected exactly one question, got {0}")]
    QuestionCount(u16),

    #[error("Suffix domain {0:?} not found in query name")]
    SuffixNotFound(String),

    #[error("Suffix domain too long: {0} bytes leaves no room for data")]
    SuffixTooLong(usize),

    #[error("Invalid hex in query name: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Unknown control marker: {0:#04x}")]
    UnknownMarker(u8),

    #[error("Decoded chunk exceeds capacity of {0} bytes")]
    CapacityExceeded(usize),

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("Query already answered")]
    AlreadyAnswered,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DnsError {
    /// True for errors caused by a bad datagram rather than local I/O.
    /// The transports drop such datagrams and carry on.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DnsError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, DnsError>;
