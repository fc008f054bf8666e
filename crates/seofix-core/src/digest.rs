//! Stable digests.
//!
//! - FNV-1a 64-bit for small identity keys (scope ids, cache keys, text
//!   hashes in fingerprints). Non-cryptographic, deterministic across runs
//!   and platforms.
//! - SHA-256 for the input-document content hash that keys the resolution
//!   cache.

use sha2::{Digest as _, Sha256};

/// Prefix used in serialized FNV digests.
pub const FNV_DIGEST_PREFIX: &str = "fnv1a64:";

/// Prefix used in serialized document digests.
pub const DOCUMENT_DIGEST_PREFIX: &str = "sha256:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// Raw FNV-1a 64-bit hash.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `"fnv1a64:<16 lowercase hex digits>"`.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    format!("{FNV_DIGEST_PREFIX}{:016x}", fnv1a64(bytes))
}

/// Digest of several labelled parts. Each part is length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` never collide structurally.
pub fn fnv1a64_parts(parts: &[(&str, &str)]) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    let mut add = |s: &str| {
        for b in s.as_bytes() {
            hash ^= (*b) as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };
    for (label, value) in parts {
        add(label);
        add("=");
        add(&value.len().to_string());
        add(":");
        add(value);
        add(";");
    }
    format!("{FNV_DIGEST_PREFIX}{hash:016x}")
}

/// Content hash of an input document.
pub fn document_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let bytes: [u8; 32] = hasher.finalize().into();
    let mut out = String::with_capacity(DOCUMENT_DIGEST_PREFIX.len() + 64);
    out.push_str(DOCUMENT_DIGEST_PREFIX);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
