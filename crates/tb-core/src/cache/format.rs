//! RLC Cache Format v1 Constants
//!
//! All values are little-endian. Layout:
//!
//! ```text
//! [header: 32 bytes][identifier: utf-8][payload: encoded rule list]
//! ```

/// Magic bytes: "RLC1"
pub const RLC_MAGIC: [u8; 4] = [0x52, 0x4c, 0x43, 0x31];

/// Current format version
pub const RLC_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "RLC1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 32)
    pub const HEADER_BYTES: usize = 8;
    /// u32 identifierBytes
    pub const IDENTIFIER_BYTES: usize = 12;
    /// u32 payloadBytes
    pub const PAYLOAD_BYTES: usize = 16;
    /// u32 ruleCount
    pub const RULE_COUNT: usize = 20;
    /// u32 crc32 over identifier and payload
    pub const CRC32: usize = 24;
}

/// Header flags.
pub mod header_flags {
    /// File includes CRC32 checksum
    pub const HAS_CRC32: u16 = 1 << 0;
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == RLC_MAGIC
}

/// Read u16 little-endian.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read u32 little-endian.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Write u16 little-endian.
#[inline]
pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write u32 little-endian.
#[inline]
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
