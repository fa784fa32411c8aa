//! Protocol module: packet codec, crypto, JSON payloads, and id generation.

pub mod crypto;
pub mod message;
pub mod packet;
pub mod sequence;

pub use crypto::{SecretToken, SessionKey, TokenError};
pub use message::{RpcError, RpcRequest, RpcResponse};
pub use packet::{
    decode_header, decode_packet, encode_packet, is_token_sentinel, DecodedPacket, PacketError,
    PacketHeader, HEADER_SIZE, HELLO_PACKET, MAGIC, STAMP_SENTINEL,
};
pub use sequence::RequestIdCounter;
