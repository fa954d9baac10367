// Domain name <-> label sequence conversion
//
// "a.example.com" <-> \x01a\x07example\x03com\x00

use super::{DnsError, Result, MAX_LABEL_LEN, MAX_NAME_LEN, MAX_POINTER_JUMPS};
use bytes::{BufMut, BytesMut};

/// Length of `domain` once encoded as labels, terminator included.
///
/// Empty segments are skipped, so "a..b." measures like "a.b".
pub fn wire_len(domain: &str) -> Result<usize> {
    let mut len = 1;
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(DnsError::LabelTooLong(label.len()));
        }
        len += 1 + label.len();
    }

    if len > MAX_NAME_LEN {
        return Err(DnsError::NameTooLong(len));
    }
    Ok(len)
}

/// Append `domain` to `buf` as length-prefixed labels
pub fn write_labels(domain: &str, buf: &mut BytesMut) -> Result<()> {
    buf.reserve(wire_len(domain)?);

    for label in domain.split('.').filter(|l| !l.is_empty()) {
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);

    Ok(())
}

/// Encode a dot-delimited domain as a DNS label sequence
pub fn encode_labels(domain: &str) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    write_labels(domain, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode the name starting at `offset` inside `message`.
///
/// Compression pointers are resolved against `message`, so it must be the
/// whole DNS message. Returns the dotted name and the offset of the first
/// byte after the name as it appears at `offset` (after the first pointer
/// when the name is compressed).
pub fn decode_labels(message: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut pos = offset;
    let mut end = None;
    let mut jumps = 0;
    let mut len_on_wire = 1;

    loop {
        let len = *message.get(pos).ok_or(DnsError::Truncated("name"))?;

        match len & 0xC0 {
            0xC0 => {
                let low = *message
                    .get(pos + 1)
                    .ok_or(DnsError::Truncated("compression pointer"))?;
                if end.is_none() {
                    end = Some(pos + 2);
                }

                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DnsError::PointerLoop(pos));
                }
                pos = (((len & 0x3F) as usize) << 8) | low as usize;
            }
            0x00 if len == 0 => break,
            0x00 => {
                let len = len as usize;
                let label = message
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(DnsError::Truncated("label"))?;

                len_on_wire += 1 + len;
                if len_on_wire > MAX_NAME_LEN {
                    return Err(DnsError::NameTooLong(len_on_wire));
                }

                // Would split into different labels when written back
                if label.contains(&b'.') {
                    return Err(DnsError::InvalidMessage(format!(
                        "dot inside label at offset {}",
                        pos
                    )));
                }

                let label = std::str::from_utf8(label).map_err(|_| {
                    DnsError::InvalidMessage(format!("non UTF-8 label at offset {}", pos))
                })?;
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(label);
                pos += 1 + len;
            }
            _ => {
                return Err(DnsError::InvalidMessage(format!(
                    "reserved label type {:#04x} at offset {}",
                    len, pos
                )))
            }
        }
    }

    Ok((name, end.unwrap_or(pos + 1)))
}
