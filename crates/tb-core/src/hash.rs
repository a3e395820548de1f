//! Hash functions for trackerblock
//!
//! Two unrelated jobs live here:
//!
//! - `hash_domains` summarizes a domain list into a version token for the
//!   rules identifier. It must stay stable across process restarts because the
//!   token ends up on disk next to cached rule lists, so it is a SHA-256 digest
//!   of the normalized, sorted list. `content_digest` is the same digest over
//!   raw bytes, for inputs that arrive without a version.
//! - `crc32` guards cached rule list files against truncation and bit rot.

use sha2::{Digest, Sha256};

/// Separator used when joining domains before hashing.
/// Domains cannot contain a newline, so joined lists never collide by concatenation.
const DOMAIN_SEPARATOR: &str = "\n";

/// Normalize a single domain for hashing and comparison.
#[inline]
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Compute an order-independent digest of a domain list.
///
/// Returns `None` for a list with no usable entries, which the identifier
/// renders as the empty token.
pub fn hash_domains<S: AsRef<str>>(domains: &[S]) -> Option<String> {
    let mut normalized: Vec<String> = domains
        .iter()
        .map(|d| normalize_domain(d.as_ref()))
        .filter(|d| !d.is_empty())
        .collect();

    if normalized.is_empty() {
        return None;
    }

    normalized.sort_unstable();
    normalized.dedup();

    Some(content_digest(normalized.join(DOMAIN_SEPARATOR).as_bytes()))
}

/// Lowercase hex SHA-256 of `data`.
pub fn content_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compute CRC32 for cache file integrity checking.
/// Uses the standard CRC32 polynomial (IEEE 802.3).
pub fn crc32(data: &[u8]) -> u32 {
    static CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 {
                    0xedb88320 ^ (c >> 1)
                } else {
                    c >> 1
                };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    let mut crc = 0xffffffff_u32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc ^ 0xffffffff
}
