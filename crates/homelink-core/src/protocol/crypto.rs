//! Symmetric crypto for the device LAN protocol.
//!
//! Every device shares a 16-byte secret token with the controller.  The
//! packet body is encrypted with AES-128-CBC using a key and IV derived
//! from that token:
//!
//! ```text
//! key = MD5(token)
//! iv  = MD5(key ++ token)
//! ```
//!
//! Packet integrity is an MD5 digest over the first 16 header bytes, the
//! token, and the ciphertext.  MD5 is fixed by the wire protocol — it is an
//! integrity check against corruption and mis-addressed packets on a shared
//! broadcast domain, not a modern MAC.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use md5::{Digest, Md5};
use thiserror::Error;

/// AES block size in bytes; also the size of the token, key, IV, and checksum.
pub const BLOCK_SIZE: usize = 16;

/// Error type for secret-token parsing.
#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    /// The hex string does not decode to exactly 16 bytes.
    #[error("token must be 32 hex characters (16 bytes), got {0} bytes")]
    WrongLength(usize),

    /// The string contains non-hex characters.
    #[error("token is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A device's 16-byte secret token.
///
/// Tokens are usually configured as 32 hex characters, but a device that
/// has never been paired with a cloud account also announces its raw token
/// in the checksum field of its hello response.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretToken([u8; BLOCK_SIZE]);

impl SecretToken {
    /// Wraps 16 raw token bytes (e.g. lifted from a hello response).
    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses the usual 32-hex-character representation.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the string is not exactly 16 bytes of hex.
    pub fn from_hex(s: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        let arr: [u8; BLOCK_SIZE] = bytes
            .try_into()
            .map_err(|_| TokenError::WrongLength(len))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

// Tokens are credentials; keep them out of logs even at debug level.
impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(****)")
    }
}

/// AES key/IV pair derived from a [`SecretToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; BLOCK_SIZE],
    iv: [u8; BLOCK_SIZE],
}

/// Cache of derived session keys, one entry per distinct token.
///
/// Derivation costs two MD5 passes; sessions encode a packet per call, so
/// the derived pair is computed once and read many times afterwards.
static KEY_CACHE: LazyLock<Mutex<HashMap<SecretToken, SessionKey>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

impl SessionKey {
    /// Returns the cached key/IV pair for `token`, deriving it on first use.
    pub fn for_token(token: &SecretToken) -> Self {
        let mut cache = KEY_CACHE.lock().expect("session key cache lock poisoned");
        *cache.entry(*token).or_insert_with(|| Self::derive(token))
    }

    fn derive(token: &SecretToken) -> Self {
        let key = md5_digest(&[token.as_bytes()]);
        let iv = md5_digest(&[&key, token.as_bytes()]);
        Self { key, iv }
    }
}

/// Computes the packet checksum: `MD5(header[0..16] ++ token ++ ciphertext)`.
pub fn checksum(header: &[u8], token: &SecretToken, ciphertext: &[u8]) -> [u8; BLOCK_SIZE] {
    md5_digest(&[header, token.as_bytes(), ciphertext])
}

fn md5_digest(parts: &[&[u8]]) -> [u8; BLOCK_SIZE] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encrypts `plaintext` with AES-128-CBC and PKCS#7 padding.
///
/// The output length is always a non-zero multiple of 16 bytes (a full
/// padding block is appended when the input is already block-aligned).
pub fn encrypt(plaintext: &[u8], session: &SessionKey) -> Vec<u8> {
    let cipher = Aes128::new((&session.key).into());

    // PKCS#7: pad with N bytes of value N up to the next block boundary.
    let pad = BLOCK_SIZE - (plaintext.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(plaintext.len() + pad);
    padded.extend_from_slice(plaintext);
    padded.extend(std::iter::repeat(pad as u8).take(pad));

    let mut prev = session.iv;
    for chunk in padded.chunks_exact_mut(BLOCK_SIZE) {
        for (byte, mask) in chunk.iter_mut().zip(prev.iter()) {
            *byte ^= mask;
        }
        let block = Block::<Aes128>::from_mut_slice(chunk);
        cipher.encrypt_block(block);
        prev.copy_from_slice(chunk);
    }

    padded
}

/// Decrypts an AES-128-CBC ciphertext and strips PKCS#7 padding.
///
/// Returns `None` for any length or padding violation.  Callers treat
/// `None` the same as a checksum mismatch: drop the packet and move on.
pub fn decrypt(ciphertext: &[u8], session: &SessionKey) -> Option<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return None;
    }

    let cipher = Aes128::new((&session.key).into());

    let mut decrypted = ciphertext.to_vec();
    let mut prev = session.iv;
    for chunk in decrypted.chunks_exact_mut(BLOCK_SIZE) {
        let mut carried = [0u8; BLOCK_SIZE];
        carried.copy_from_slice(chunk);

        let block = Block::<Aes128>::from_mut_slice(chunk);
        cipher.decrypt_block(block);
        for (byte, mask) in chunk.iter_mut().zip(prev.iter()) {
            *byte ^= mask;
        }
        prev = carried;
    }

    // Strip and verify PKCS#7 padding (constant-time comparison).
    let &pad = decrypted.last()?;
    if pad == 0 || pad as usize > BLOCK_SIZE || decrypted.len() < pad as usize {
        return None;
    }
    let start = decrypted.len() - pad as usize;
    let mut mismatched: u8 = 0;
    for &byte in &decrypted[start..] {
        mismatched |= byte ^ pad;
    }
    if mismatched != 0 {
        return None;
    }
    decrypted.truncate(start);
    Some(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_token() -> SecretToken {
        SecretToken::from_hex("00112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn test_token_from_hex_round_trips() {
        let token = test_token();
        assert_eq!(token.to_hex(), "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_token_from_hex_rejects_wrong_length() {
        assert_eq!(
            SecretToken::from_hex("001122"),
            Err(TokenError::WrongLength(3))
        );
    }

    #[test]
    fn test_token_from_hex_rejects_non_hex() {
        assert!(matches!(
            SecretToken::from_hex("zz112233445566778899aabbccddeeff"),
            Err(TokenError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_token_debug_does_not_leak_bytes() {
        let shown = format!("{:?}", test_token());
        assert!(!shown.contains("00112233"));
    }

    #[test]
    fn test_session_key_derivation_is_deterministic() {
        let token = test_token();
        assert_eq!(SessionKey::for_token(&token), SessionKey::for_token(&token));
    }

    #[test]
    fn test_session_keys_differ_per_token() {
        let a = SessionKey::for_token(&test_token());
        let b = SessionKey::for_token(&SecretToken::from_bytes([0x42; 16]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let session = SessionKey::for_token(&test_token());
        let plaintext = br#"{"id":1,"method":"get_prop","params":["power"]}"#;
        let ciphertext = encrypt(plaintext, &session);
        assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);
        assert_eq!(decrypt(&ciphertext, &session).unwrap(), plaintext);
    }

    #[test]
    fn test_encrypt_pads_block_aligned_input_with_full_block() {
        let session = SessionKey::for_token(&test_token());
        let plaintext = [0x41u8; 32];
        let ciphertext = encrypt(&plaintext, &session);
        assert_eq!(ciphertext.len(), 48);
        assert_eq!(decrypt(&ciphertext, &session).unwrap(), plaintext);
    }

    #[test]
    fn test_encrypt_empty_plaintext_yields_one_block() {
        let session = SessionKey::for_token(&test_token());
        let ciphertext = encrypt(&[], &session);
        assert_eq!(ciphertext.len(), BLOCK_SIZE);
        assert_eq!(decrypt(&ciphertext, &session).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decrypt_rejects_unaligned_length() {
        let session = SessionKey::for_token(&test_token());
        assert_eq!(decrypt(&[0u8; 15], &session), None);
        assert_eq!(decrypt(&[], &session), None);
    }

    #[test]
    fn test_decrypt_with_wrong_key_never_returns_the_plaintext() {
        let session = SessionKey::for_token(&test_token());
        let other = SessionKey::for_token(&SecretToken::from_bytes([0x99; 16]));
        let plaintext = b"hello device".to_vec();
        let ciphertext = encrypt(&plaintext, &session);
        // Wrong key produces garbage; almost always the padding check
        // rejects it, and in the rare false-accept the bytes are still not
        // the original plaintext.
        assert_ne!(decrypt(&ciphertext, &other), Some(plaintext));
    }

    #[test]
    fn test_decrypt_rejects_corrupt_padding() {
        let session = SessionKey::for_token(&test_token());
        // One block that decrypts to a declared pad length of 0 cannot
        // exist, but a tampered final block routinely produces pad bytes
        // that disagree with each other; craft one deterministically by
        // re-encrypting a known plaintext and flipping its last byte.
        let mut ciphertext = encrypt(b"0123456789abcde", &session);
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert_ne!(
            decrypt(&ciphertext, &session),
            Some(b"0123456789abcde".to_vec())
        );
    }

    #[test]
    fn test_checksum_changes_with_any_input() {
        let token = test_token();
        let base = checksum(&[1, 2, 3], &token, &[9, 9]);
        assert_ne!(base, checksum(&[1, 2, 4], &token, &[9, 9]));
        assert_ne!(base, checksum(&[1, 2, 3], &token, &[9, 8]));
        let other = SecretToken::from_bytes([7; 16]);
        assert_ne!(base, checksum(&[1, 2, 3], &other, &[9, 9]));
    }
}
