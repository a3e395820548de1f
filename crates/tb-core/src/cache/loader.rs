//! Zero-copy RLC cache loader

use crate::hash::crc32;
use crate::identifier::{IdentifierParseError, RulesIdentifier};
use super::format::*;

/// Error type for cache loading.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierParseError),
    #[error("Identifier is not valid utf-8")]
    IdentifierEncoding,
    #[error("Payload is not valid utf-8")]
    PayloadEncoding,
    #[error("Data too short")]
    DataTooShort,
}

/// Zero-copy view over a cached rule list file.
#[derive(Debug)]
pub struct CachedRuleList<'a> {
    pub version: u16,
    pub flags: u16,
    pub rule_count: u32,
    pub identifier: RulesIdentifier,
    payload: &'a str,
}

impl<'a> CachedRuleList<'a> {
    /// Load a cached rule list from bytes.
    pub fn load(data: &'a [u8]) -> Result<Self, CacheError> {
        if data.len() < HEADER_SIZE {
            return Err(CacheError::DataTooShort);
        }

        if !validate_magic(data) {
            return Err(CacheError::InvalidMagic);
        }

        let version = read_u16_le(data, header::VERSION);
        if version != RLC_VERSION {
            return Err(CacheError::UnsupportedVersion(version));
        }

        let flags = read_u16_le(data, header::FLAGS);
        let header_bytes = read_u32_le(data, header::HEADER_BYTES) as usize;
        let identifier_bytes = read_u32_le(data, header::IDENTIFIER_BYTES) as usize;
        let payload_bytes = read_u32_le(data, header::PAYLOAD_BYTES) as usize;
        let rule_count = read_u32_le(data, header::RULE_COUNT);

        let identifier_start = header_bytes.max(HEADER_SIZE);
        let payload_start = identifier_start
            .checked_add(identifier_bytes)
            .ok_or(CacheError::DataTooShort)?;
        let end = payload_start
            .checked_add(payload_bytes)
            .ok_or(CacheError::DataTooShort)?;
        if end > data.len() {
            return Err(CacheError::DataTooShort);
        }

        if flags & header_flags::HAS_CRC32 != 0 {
            let stored = read_u32_le(data, header::CRC32);
            let computed = crc32(&data[identifier_start..end]);
            if stored != computed {
                return Err(CacheError::Crc32Mismatch { stored, computed });
            }
        }

        let identifier = std::str::from_utf8(&data[identifier_start..payload_start])
            .map_err(|_| CacheError::IdentifierEncoding)?
            .parse::<RulesIdentifier>()?;
        let payload = std::str::from_utf8(&data[payload_start..end])
            .map_err(|_| CacheError::PayloadEncoding)?;

        Ok(Self {
            version,
            flags,
            rule_count,
            identifier,
            payload,
        })
    }

    /// Encoded rule list.
    pub fn payload(&self) -> &'a str {
        self.payload
    }
}

/// Serialize a compiled rule list into the cache format.
pub fn encode_cache_file(identifier: &RulesIdentifier, payload: &str, rule_count: u32) -> Vec<u8> {
    let identifier = identifier.to_string();
    let total = HEADER_SIZE + identifier.len() + payload.len();
    let mut buffer = vec![0u8; HEADER_SIZE];
    buffer.reserve(total - HEADER_SIZE);

    buffer[0..4].copy_from_slice(&RLC_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, RLC_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, header_flags::HAS_CRC32);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::IDENTIFIER_BYTES, identifier.len() as u32);
    write_u32_le(&mut buffer, header::PAYLOAD_BYTES, payload.len() as u32);
    write_u32_le(&mut buffer, header::RULE_COUNT, rule_count);

    buffer.extend_from_slice(identifier.as_bytes());
    buffer.extend_from_slice(payload.as_bytes());

    let crc = crc32(&buffer[HEADER_SIZE..]);
    write_u32_le(&mut buffer, header::CRC32, crc);
    buffer
}
