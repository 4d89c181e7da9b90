// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal Network Message wire format.
//!
//! The full OPC UA Part 14 Network Message codec (bit-exact UADP/JSON
//! encoding, extended headers, fragmentation) is an external
//! collaborator out of scope for this crate (spec §1, §6). This module
//! implements a small, honestly-scoped fixed-endian subset — enough
//! fields to drive the receive pipeline and the spec's worked
//! end-to-end scenarios: version/flags, a typed PublisherId, a
//! GroupHeader (WriterGroupId), a PayloadHeader (one DataSetMessage's
//! DataSetWriterId), an optional SecurityHeader (nonce), one DataSetMessage
//! payload, and an optional signature footer.
//!
//! Grounded on `protocol::builder`'s packet-building style and this
//! crate's CDR convention of explicit-offset fixed-size primitive
//! encoding.

use crate::pubsub::config::PublisherId;
use crate::pubsub::error::{PubSubError, PubSubResult};

const MARKER: u8 = 0xDA;
const FLAG_SECURITY: u8 = 0b0000_0001;
const FLAG_JSON: u8 = 0b0000_0010;

fn publisher_id_type_tag(id: &PublisherId) -> u8 {
    match id {
        PublisherId::Byte(_) => 0,
        PublisherId::UInt16(_) => 1,
        PublisherId::UInt32(_) => 2,
        PublisherId::UInt64(_) => 3,
        PublisherId::String(_) => 4,
    }
}

fn encode_publisher_id(id: &PublisherId, out: &mut Vec<u8>) {
    match id {
        PublisherId::Byte(v) => out.push(*v),
        PublisherId::UInt16(v) => out.extend_from_slice(&v.to_be_bytes()),
        PublisherId::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
        PublisherId::UInt64(v) => out.extend_from_slice(&v.to_be_bytes()),
        PublisherId::String(s) => {
            let bytes = s.as_bytes();
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
}

fn decode_publisher_id(tag: u8, buf: &[u8], pos: &mut usize) -> PubSubResult<PublisherId> {
    let remaining = || buf.len() - *pos;
    let id = match tag {
        0 => {
            if remaining() < 1 {
                return Err(truncated());
            }
            let v = buf[*pos];
            *pos += 1;
            PublisherId::Byte(v)
        }
        1 => {
            if remaining() < 2 {
                return Err(truncated());
            }
            let v = u16::from_be_bytes(buf[*pos..*pos + 2].try_into().unwrap());
            *pos += 2;
            PublisherId::UInt16(v)
        }
        2 => {
            if remaining() < 4 {
                return Err(truncated());
            }
            let v = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap());
            *pos += 4;
            PublisherId::UInt32(v)
        }
        3 => {
            if remaining() < 8 {
                return Err(truncated());
            }
            let v = u64::from_be_bytes(buf[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            PublisherId::UInt64(v)
        }
        4 => {
            if remaining() < 2 {
                return Err(truncated());
            }
            let len = u16::from_be_bytes(buf[*pos..*pos + 2].try_into().unwrap()) as usize;
            *pos += 2;
            if remaining() < len {
                return Err(truncated());
            }
            let s = String::from_utf8(buf[*pos..*pos + len].to_vec())
                .map_err(|_| PubSubError::InternalError("publisher id not valid utf-8".into()))?;
            *pos += len;
            PublisherId::String(s)
        }
        _ => return Err(PubSubError::InternalError("unknown publisher id type tag".into())),
    };
    Ok(id)
}

fn truncated() -> PubSubError {
    PubSubError::InternalError("truncated network message".into())
}

/// Decoded NetworkMessage headers (spec §4.5 step 1, §6 "Wire formats").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessageHeader {
    pub json_encoding: bool,
    pub publisher_id: PublisherId,
    pub writer_group_id: u16,
    pub data_set_writer_id: u16,
    /// `Some(nonce)` when a SecurityHeader is present.
    pub security_nonce: Option<u32>,
}

/// One fully decoded frame: headers, the (already opened) payload
/// bytes, and whatever footer tag accompanied it.
pub struct DecodedFrame {
    pub header: NetworkMessageHeader,
    pub sealed_payload: Vec<u8>,
    pub footer_tag: Vec<u8>,
    /// Byte offset in the source buffer immediately after this frame.
    pub consumed: usize,
}

/// Encode a frame. `sealed_payload`/`footer_tag` are whatever
/// [`crate::pubsub::security::seal_frame`] produced (plaintext and
/// empty footer when security mode is `None`).
pub fn encode_frame(
    header: &NetworkMessageHeader,
    sealed_payload: &[u8],
    footer_tag: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + sealed_payload.len() + footer_tag.len());
    out.push(MARKER);
    let mut flags = 0u8;
    if header.security_nonce.is_some() {
        flags |= FLAG_SECURITY;
    }
    if header.json_encoding {
        flags |= FLAG_JSON;
    }
    out.push(flags);
    out.push(publisher_id_type_tag(&header.publisher_id));
    encode_publisher_id(&header.publisher_id, &mut out);
    out.extend_from_slice(&header.writer_group_id.to_be_bytes());
    out.extend_from_slice(&header.data_set_writer_id.to_be_bytes());
    if let Some(nonce) = header.security_nonce {
        out.extend_from_slice(&nonce.to_be_bytes());
    }
    out.extend_from_slice(&(sealed_payload.len() as u32).to_be_bytes());
    out.extend_from_slice(sealed_payload);
    if header.security_nonce.is_some() {
        out.extend_from_slice(&(footer_tag.len() as u16).to_be_bytes());
        out.extend_from_slice(footer_tag);
    }
    out
}

/// Decode one frame starting at `pos` in `buf`. On success, advances
/// past the frame (spec §4.5 edge case "Partial buffer: the codec
/// advances `pos`; loop from step 1 while bytes remain").
pub fn decode_frame(buf: &[u8], pos: usize) -> PubSubResult<DecodedFrame> {
    let mut p = pos;
    if buf.len() - p < 2 {
        return Err(truncated());
    }
    if buf[p] != MARKER {
        return Err(PubSubError::InternalError("bad network message marker".into()));
    }
    p += 1;
    let flags = buf[p];
    p += 1;
    let has_security = flags & FLAG_SECURITY != 0;
    let json_encoding = flags & FLAG_JSON != 0;

    if buf.len() - p < 1 {
        return Err(truncated());
    }
    let pid_tag = buf[p];
    p += 1;
    let publisher_id = decode_publisher_id(pid_tag, buf, &mut p)?;

    if buf.len() - p < 4 {
        return Err(truncated());
    }
    let writer_group_id = u16::from_be_bytes(buf[p..p + 2].try_into().unwrap());
    p += 2;
    let data_set_writer_id = u16::from_be_bytes(buf[p..p + 2].try_into().unwrap());
    p += 2;

    let security_nonce = if has_security {
        if buf.len() - p < 4 {
            return Err(truncated());
        }
        let nonce = u32::from_be_bytes(buf[p..p + 4].try_into().unwrap());
        p += 4;
        Some(nonce)
    } else {
        None
    };

    if buf.len() - p < 4 {
        return Err(truncated());
    }
    let payload_len = u32::from_be_bytes(buf[p..p + 4].try_into().unwrap()) as usize;
    p += 4;
    if buf.len() - p < payload_len {
        return Err(truncated());
    }
    let sealed_payload = buf[p..p + payload_len].to_vec();
    p += payload_len;

    let footer_tag = if has_security {
        if buf.len() - p < 2 {
            return Err(truncated());
        }
        let tag_len = u16::from_be_bytes(buf[p..p + 2].try_into().unwrap()) as usize;
        p += 2;
        if buf.len() - p < tag_len {
            return Err(truncated());
        }
        let tag = buf[p..p + tag_len].to_vec();
        p += tag_len;
        tag
    } else {
        Vec::new()
    };

    Ok(DecodedFrame {
        header: NetworkMessageHeader {
            json_encoding,
            publisher_id,
            writer_group_id,
            data_set_writer_id,
            security_nonce,
        },
        sealed_payload,
        footer_tag,
        consumed: p,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_no_security() {
        let header = NetworkMessageHeader {
            json_encoding: false,
            publisher_id: PublisherId::UInt16(7),
            writer_group_id: 1,
            data_set_writer_id: 42,
            security_nonce: None,
        };
        let payload = 99i32.to_be_bytes();
        let bytes = encode_frame(&header, &payload, &[]);
        let decoded = decode_frame(&bytes, 0).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.sealed_payload, payload);
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn roundtrip_with_security_header() {
        let header = NetworkMessageHeader {
            json_encoding: false,
            publisher_id: PublisherId::String("pub-a".into()),
            writer_group_id: 3,
            data_set_writer_id: 5,
            security_nonce: Some(17),
        };
        let bytes = encode_frame(&header, b"ciphertext", b"tagtagtagtagtagt");
        let decoded = decode_frame(&bytes, 0).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.sealed_payload, b"ciphertext");
        assert_eq!(decoded.footer_tag, b"tagtagtagtagtagt");
    }

    #[test]
    fn two_frames_in_one_buffer_decode_in_sequence() {
        let h1 = NetworkMessageHeader {
            json_encoding: false,
            publisher_id: PublisherId::Byte(1),
            writer_group_id: 1,
            data_set_writer_id: 1,
            security_nonce: None,
        };
        let h2 = NetworkMessageHeader {
            json_encoding: false,
            publisher_id: PublisherId::Byte(2),
            writer_group_id: 2,
            data_set_writer_id: 2,
            security_nonce: None,
        };
        let mut buf = encode_frame(&h1, b"aaaa", &[]);
        buf.extend(encode_frame(&h2, b"bb", &[]));

        let first = decode_frame(&buf, 0).unwrap();
        assert_eq!(first.header.writer_group_id, 1);
        let second = decode_frame(&buf, first.consumed).unwrap();
        assert_eq!(second.header.writer_group_id, 2);
        assert_eq!(second.consumed, buf.len());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let header = NetworkMessageHeader {
            json_encoding: false,
            publisher_id: PublisherId::UInt16(7),
            writer_group_id: 1,
            data_set_writer_id: 42,
            security_nonce: None,
        };
        let bytes = encode_frame(&header, b"xx", &[]);
        let truncated_buf = &bytes[..bytes.len() - 1];
        assert!(decode_frame(truncated_buf, 0).is_err());
    }

    #[test]
    fn bad_marker_is_rejected() {
        let buf = [0u8; 8];
        assert!(decode_frame(&buf, 0).is_err());
    }
}
