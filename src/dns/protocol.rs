// Minimal DNS message codec for the tunnel
//
// Implements just enough of the DNS protocol to:
// - Build NULL queries carrying an EDNS0 OPT record
// - Build NULL answers echoing the question
// - Parse both back, following name compression

use super::name::{decode_labels, write_labels};
use super::{DnsError, Result, C_IN, EDNS_UDP_PAYLOAD, T_NULL, T_OPT};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use std::net::SocketAddr;

/// Query/response flag
const FLAG_QR: u16 = 0x8000;
/// Authoritative answer
const FLAG_AA: u16 = 0x0400;
/// Recursion desired
const FLAG_RD: u16 = 0x0100;

/// Pointer to the question name, which always starts right after the header
const QUESTION_NAME_PTR: u16 = 0xC000 | DnsHeader::SIZE as u16;

/// DNS message header (12 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    /// Matches a response to its query
    pub id: u16,
    /// QR, opcode, AA, TC, RD, RA and rcode bits
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    /// Additional records; the query's OPT record lives here
    pub arcount: u16,
}

impl DnsHeader {
    pub const SIZE: usize = 12;

    /// Query header: one question plus the OPT record
    pub fn new_query(id: u16) -> Self {
        Self {
            id,
            flags: FLAG_RD,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 1,
        }
    }

    /// Authoritative response header with one question and one answer
    pub fn new_response(id: u16) -> Self {
        Self {
            id,
            flags: FLAG_QR | FLAG_AA,
            qdcount: 1,
            ancount: 1,
            nscount: 0,
            arcount: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(DnsError::Truncated("header"));
        }

        Ok(Self {
            id: buf.get_u16(),
            flags: buf.get_u16(),
            qdcount: buf.get_u16(),
            ancount: buf.get_u16(),
            nscount: buf.get_u16(),
            arcount: buf.get_u16(),
        })
    }

    /// Write header to buffer
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        buf.put_u16(self.flags);
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
    }

    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        (self.flags & FLAG_QR) != 0
    }
}

/// A query captured on the server so it can be answered later.
///
/// The transaction id is cleared when the query is answered; a record
/// can only produce one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    id: Option<u16>,
    pub name: String,
    pub qtype: u16,
    pub from: SocketAddr,
}

impl QueryRecord {
    pub fn new(id: u16, name: String, qtype: u16, from: SocketAddr) -> Self {
        Self {
            id: Some(id),
            name,
            qtype,
            from,
        }
    }

    /// Transaction id, `None` once answered
    pub fn id(&self) -> Option<u16> {
        self.id
    }

    pub fn is_answered(&self) -> bool {
        self.id.is_none()
    }

    /// Build the response for this query and invalidate the record
    pub fn answer(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let id = self.id.ok_or(DnsError::AlreadyAnswered)?;
        let response = build_response(id, &self.name, self.qtype, payload)?;
        self.id = None;
        Ok(response)
    }
}

/// A response as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Transaction id, matched against the last sent chunk
    pub id: u16,
    /// Type of the single answer record, if there was exactly one
    pub record_type: Option<u16>,
    /// NULL record data; empty unless exactly one NULL answer was present
    pub data: Vec<u8>,
}

/// Build a query for `name` with an EDNS0 OPT record advertising 4096 bytes
pub fn build_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(512);

    DnsHeader::new_query(id).write(&mut buf);

    write_labels(name, &mut buf)?;
    buf.put_u16(qtype);
    buf.put_u16(C_IN);

    // EDNS0
    buf.put_u8(0x00); // Root
    buf.put_u16(T_OPT);
    buf.put_u16(EDNS_UDP_PAYLOAD); // Class carries the payload size
    buf.put_u16(0x0000); // Extended rcode / version
    buf.put_u16(0x8000); // Z
    buf.put_u16(0x0000); // Data length

    Ok(buf.to_vec())
}

/// Build an authoritative response carrying `payload` in a NULL record
pub fn build_response(id: u16, name: &str, qtype: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(DnsError::PayloadTooLarge(payload.len(), u16::MAX as usize));
    }

    let mut buf = BytesMut::with_capacity(DnsHeader::SIZE + 256 + 16 + payload.len());

    DnsHeader::new_response(id).write(&mut buf);

    write_labels(name, &mut buf)?;
    buf.put_u16(qtype);
    buf.put_u16(C_IN);

    buf.put_u16(QUESTION_NAME_PTR);
    buf.put_u16(T_NULL);
    buf.put_u16(C_IN);
    buf.put_u32(0); // TTL
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);

    Ok(buf.to_vec())
}

/// Parse a response, extracting the data of a single NULL answer
pub fn parse_response(message: &[u8]) -> Result<ParsedResponse> {
    let mut cursor = Cursor::new(message);
    let header = DnsHeader::parse(&mut cursor)?;

    if !header.is_response() {
        return Err(DnsError::NotAResponse);
    }

    for _ in 0..header.qdcount {
        read_name(&mut cursor)?;
        if cursor.remaining() < 4 {
            return Err(DnsError::Truncated("question"));
        }
        cursor.advance(4); // QTYPE + QCLASS
    }

    let mut parsed = ParsedResponse {
        id: header.id,
        record_type: None,
        data: Vec::new(),
    };

    if header.ancount == 1 {
        read_name(&mut cursor)?;
        if cursor.remaining() < 10 {
            return Err(DnsError::Truncated("answer"));
        }

        let rtype = cursor.get_u16();
        let _class = cursor.get_u16();
        let _ttl = cursor.get_u32();
        let rdlen = cursor.get_u16() as usize;

        if cursor.remaining() < rdlen {
            return Err(DnsError::Truncated("record data"));
        }

        parsed.record_type = Some(rtype);
        if rtype == T_NULL {
            parsed.data = cursor.chunk()[..rdlen].to_vec();
        }
    }

    Ok(parsed)
}

/// Parse a query received from `from` into a [`QueryRecord`]
pub fn parse_query(message: &[u8], from: SocketAddr) -> Result<QueryRecord> {
    let mut cursor = Cursor::new(message);
    let header = DnsHeader::parse(&mut cursor)?;

    if header.is_response() {
        return Err(DnsError::NotAQuery);
    }
    if header.qdcount != 1 {
        return Err(DnsError::QuestionCount(header.qdcount));
    }

    let name = read_name(&mut cursor)?;
    if cursor.remaining() < 4 {
        return Err(DnsError::Truncated("question"));
    }
    let qtype = cursor.get_u16();
    let _class = cursor.get_u16();

    Ok(QueryRecord::new(header.id, name, qtype, from))
}

/// Read a name at the cursor position (handles DNS compression)
fn read_name(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let (name, end) = decode_labels(cursor.get_ref(), cursor.position() as usize)?;
    cursor.set_position(end as u64);
    Ok(name)
}
