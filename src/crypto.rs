//! Hashing and key encoding primitives shared by every ledger component

use crate::constants::PUBLIC_KEY_COORDS_LEN;
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use ripemd::Ripemd160;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

/// SHA256: 𝕊 → ℍ
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA256D: 𝕊 → ℍ, i.e. SHA256(SHA256(data))
pub fn sha256d(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// HashPubKey: 𝕊 → 𝕊
///
/// Locking hash of a public key: RIPEMD160(SHA256(public_key)), 20 bytes.
pub fn hash_pub_key(public_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).to_vec()
}

/// Fixed-width big-endian encoding of a signed integer
pub fn int_to_bytes(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Public coordinates (X ‖ Y) of a secp256k1 key, 64 bytes
pub fn public_key_coords(public_key: &PublicKey) -> ByteString {
    // Drop the 0x04 uncompressed-point tag
    public_key.serialize_uncompressed()[1..].to_vec()
}

/// Public coordinates of the key matching `secret_key`
pub fn public_key_from_secret(secret_key: &SecretKey) -> ByteString {
    let secp = Secp256k1::new();
    public_key_coords(&PublicKey::from_secret_key(&secp, secret_key))
}

/// Parse 64 bytes of public coordinates back into a key. `None` when the bytes
/// are not a point on the curve.
pub fn parse_public_key(coords: &[u8]) -> Option<PublicKey> {
    if coords.len() != PUBLIC_KEY_COORDS_LEN {
        return None;
    }
    let mut uncompressed = [0u8; PUBLIC_KEY_COORDS_LEN + 1];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(coords);
    PublicKey::from_slice(&uncompressed).ok()
}

/// Interpret a byte string as a 256-bit hash
pub fn to_hash(bytes: &[u8]) -> Option<Hash> {
    bytes.try_into().ok()
}
