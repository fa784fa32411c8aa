//! Binary codec for the device LAN protocol packets.
//!
//! Wire format:
//! ```text
//! [magic:2][length:2][reserved:4][device_id:4][stamp:4][checksum:16][body:N]
//! ```
//! Total header size: 32 bytes.  All multi-byte integers are big-endian.
//! `length` counts the whole packet including the header.  The body is the
//! AES-128-CBC ciphertext of a JSON command or response; a zero-length body
//! marks a hello probe or announcement, in which case the checksum field
//! doubles as the device's token (or an all-`0`/`f` "unknown" sentinel).

use thiserror::Error;

use crate::protocol::crypto::{self, SecretToken, SessionKey, BLOCK_SIZE};

/// Protocol magic marker, first two bytes of every packet.
pub const MAGIC: u16 = 0x2131;

/// Total size of the packet header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Stamp value marking an unauthenticated hello probe.
pub const STAMP_SENTINEL: u32 = 0xFFFF_FFFF;

/// The fixed 32-byte hello probe: magic, length 0x0020, then all-ones
/// device id, stamp, and checksum.  Sent for discovery and to bootstrap a
/// session's first clock anchor.
pub const HELLO_PACKET: [u8; HEADER_SIZE] = hello_packet();

const fn hello_packet() -> [u8; HEADER_SIZE] {
    let mut packet = [0xFF; HEADER_SIZE];
    packet[0] = 0x21;
    packet[1] = 0x31;
    packet[2] = 0x00;
    packet[3] = 0x20;
    packet
}

/// Errors that can occur while encoding or decoding a packet.
///
/// Note that a checksum mismatch is deliberately **not** an error: on a
/// shared broadcast domain many packets are addressed to other sessions,
/// so [`decode_packet`] reports it as [`DecodedPacket::Invalid`] and the
/// caller drops the packet silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The byte slice is shorter than the declared or minimum length.
    #[error("truncated packet: need at least {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The first two bytes are not the protocol magic.
    #[error("bad magic: expected 0x2131, got 0x{0:04X}")]
    BadMagic(u16),

    /// The encoded packet would exceed the 16-bit length field.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// The packet carries an encrypted body but no token is available.
    #[error("packet for device {device_id} has an encrypted body but no token is known")]
    MissingToken { device_id: u32 },
}

/// The fixed header fields, parsed without touching the body.
///
/// This is the decode path discovery relies on: announcements are
/// classified entirely from the header, and the checksum field is read as
/// a possible token rather than verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared total packet length including the header.
    pub length: u16,
    /// Numeric device identifier, or the sentinel pattern in a probe.
    pub device_id: u32,
    /// Device-reported replay-protection counter.
    pub stamp: u32,
    /// MD5 checksum — or the device token in a zero-body hello response.
    pub checksum: [u8; BLOCK_SIZE],
    /// Length of the body that follows the header.
    pub body_len: usize,
}

/// Result of a full [`decode_packet`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPacket {
    /// Zero-body hello probe or announcement.  `token_field` carries the
    /// raw checksum bytes, which in an announcement are either the device
    /// token or the "unknown" sentinel (see [`is_token_sentinel`]).
    Hello {
        device_id: u32,
        stamp: u32,
        token_field: [u8; BLOCK_SIZE],
    },
    /// Authenticated message with a verified checksum and decrypted body.
    Message {
        device_id: u32,
        stamp: u32,
        plaintext: Vec<u8>,
    },
    /// Checksum mismatch or undecryptable body.  Dropped by callers,
    /// never surfaced as an error.
    Invalid,
}

/// Encodes `plaintext` into a complete packet for `device_id`.
///
/// `stamp` is the caller-computed effective stamp; `None` writes the
/// all-ones sentinel, which devices accept only on hello-style traffic.
///
/// # Errors
///
/// Returns [`PacketError::PayloadTooLarge`] if header plus ciphertext
/// exceeds the 16-bit length field.
///
/// # Examples
///
/// ```rust
/// use homelink_core::protocol::crypto::SecretToken;
/// use homelink_core::protocol::packet::{decode_packet, encode_packet, DecodedPacket};
///
/// let token = SecretToken::from_hex("00112233445566778899aabbccddeeff").unwrap();
/// let packet = encode_packet(br#"{"id":1}"#, 1234, &token, Some(100)).unwrap();
/// match decode_packet(&packet, Some(&token)).unwrap() {
///     DecodedPacket::Message { device_id, stamp, plaintext } => {
///         assert_eq!(device_id, 1234);
///         assert_eq!(stamp, 100);
///         assert_eq!(plaintext, br#"{"id":1}"#);
///     }
///     other => panic!("unexpected decode: {other:?}"),
/// }
/// ```
pub fn encode_packet(
    plaintext: &[u8],
    device_id: u32,
    token: &SecretToken,
    stamp: Option<u32>,
) -> Result<Vec<u8>, PacketError> {
    let session = SessionKey::for_token(token);
    let body = crypto::encrypt(plaintext, &session);

    let total = HEADER_SIZE + body.len();
    if total > u16::MAX as usize {
        return Err(PacketError::PayloadTooLarge(total));
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.extend_from_slice(&(total as u16).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // reserved
    buf.extend_from_slice(&device_id.to_be_bytes());
    buf.extend_from_slice(&stamp.unwrap_or(STAMP_SENTINEL).to_be_bytes());

    let digest = crypto::checksum(&buf[..16], token, &body);
    buf.extend_from_slice(&digest);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parses the fixed header fields of `raw` without verifying or
/// decrypting anything.
///
/// # Errors
///
/// Returns [`PacketError::Truncated`] if fewer than 32 bytes (or fewer
/// than the declared length) are available, and [`PacketError::BadMagic`]
/// for a foreign first word.
pub fn decode_header(raw: &[u8]) -> Result<PacketHeader, PacketError> {
    if raw.len() < HEADER_SIZE {
        return Err(PacketError::Truncated {
            needed: HEADER_SIZE,
            available: raw.len(),
        });
    }

    let magic = u16::from_be_bytes([raw[0], raw[1]]);
    if magic != MAGIC {
        return Err(PacketError::BadMagic(magic));
    }

    let length = u16::from_be_bytes([raw[2], raw[3]]);
    if raw.len() < length as usize {
        return Err(PacketError::Truncated {
            needed: length as usize,
            available: raw.len(),
        });
    }

    // raw[4..8] is the reserved word — ignored on decode.

    let device_id = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
    let stamp = u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]);
    let mut checksum = [0u8; BLOCK_SIZE];
    checksum.copy_from_slice(&raw[16..32]);

    Ok(PacketHeader {
        length,
        device_id,
        stamp,
        checksum,
        body_len: length as usize - HEADER_SIZE,
    })
}

/// Decodes a complete packet, verifying the checksum and decrypting the
/// body when one is present.
///
/// Trailing bytes beyond the declared length are ignored (UDP reads hand
/// over whole datagrams; TCP reads may batch).
///
/// # Errors
///
/// Propagates header errors from [`decode_header`], and returns
/// [`PacketError::MissingToken`] when the packet has a body but `token`
/// is `None`.  A checksum or decryption failure is **not** an error —
/// see [`DecodedPacket::Invalid`].
pub fn decode_packet(
    raw: &[u8],
    token: Option<&SecretToken>,
) -> Result<DecodedPacket, PacketError> {
    let header = decode_header(raw)?;
    let body = &raw[HEADER_SIZE..header.length as usize];

    if body.is_empty() {
        return Ok(DecodedPacket::Hello {
            device_id: header.device_id,
            stamp: header.stamp,
            token_field: header.checksum,
        });
    }

    let token = token.ok_or(PacketError::MissingToken {
        device_id: header.device_id,
    })?;

    let digest = crypto::checksum(&raw[..16], token, body);
    if digest != header.checksum {
        return Ok(DecodedPacket::Invalid);
    }

    let session = SessionKey::for_token(token);
    match crypto::decrypt(body, &session) {
        Some(plaintext) => Ok(DecodedPacket::Message {
            device_id: header.device_id,
            stamp: header.stamp,
            plaintext,
        }),
        None => Ok(DecodedPacket::Invalid),
    }
}

/// Returns `true` when a hello-response token field is the reserved
/// "unknown" pattern: every nibble `0x0` or `0xF`.
///
/// Devices that will not reveal their secret over broadcast fill the
/// field with `ff…ff` (or zeros); anything else is the token itself.
pub fn is_token_sentinel(field: &[u8; BLOCK_SIZE]) -> bool {
    field.iter().all(|&byte| {
        let high = byte >> 4;
        let low = byte & 0x0F;
        (high == 0x0 || high == 0xF) && (low == 0x0 || low == 0xF)
    })
}
