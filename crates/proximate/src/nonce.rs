//! Nonce generation — opaque identifier strings for request correlation
//! and receiver naming.
//!
//! Both namespaces draw from the same generator; they need not be disjoint.

use rand::RngCore;

/// Default entropy per nonce: 16 bytes (128 bits).
pub const DEFAULT_NONCE_BYTES: usize = 16;

/// Generate a fresh hex-encoded nonce with the default entropy.
pub fn nonce() -> String {
    nonce_with_len(DEFAULT_NONCE_BYTES)
}

/// Generate a fresh hex-encoded nonce from `bytes` random bytes.
pub fn nonce_with_len(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
