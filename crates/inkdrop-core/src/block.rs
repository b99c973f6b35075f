//! Scratch buffer a block is reassembled into.
//!
//! The first four bytes of every block are a header (`u16` length, `u16`
//! additive checksum), carried inside the parts like the payload.

use crate::parts::{MAX_PARTS, PART_DATA_LEN};

/// Largest payload a block can carry.
pub const BLOCK_DATA_LEN: usize = 4096;
pub const BLOCK_HEADER_LEN: usize = 4;
pub const BLOCK_BUFFER_LEN: usize = BLOCK_DATA_LEN + BLOCK_HEADER_LEN;

/// 16-bit wrapping sum of every byte.
pub fn additive_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// Parts needed to carry `bytes` of payload plus the block header.
pub fn parts_for_block(bytes: usize) -> usize {
    (bytes + BLOCK_HEADER_LEN).div_ceil(PART_DATA_LEN).min(MAX_PARTS)
}

pub struct BlockBuffer {
    bytes: [u8; BLOCK_BUFFER_LEN],
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; BLOCK_BUFFER_LEN],
        }
    }

    /// Copies a part into place. Returns `false` when the index is out of
    /// range or the part would start at or past the last byte.
    pub fn store_part(&mut self, part_index: usize, data: &[u8]) -> bool {
        let start = part_index * PART_DATA_LEN;
        if part_index >= MAX_PARTS || start >= BLOCK_BUFFER_LEN - 1 {
            return false;
        }
        let len = data.len().min(BLOCK_BUFFER_LEN - start);
        self.bytes[start..start + len].copy_from_slice(&data[..len]);
        true
    }

    pub fn declared_len(&self) -> usize {
        usize::from(u16::from_le_bytes([self.bytes[0], self.bytes[1]]))
    }

    pub fn declared_checksum(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    /// Checks the header against the reassembled payload.
    pub fn validate(&self) -> bool {
        let len = self.declared_len();
        len <= BLOCK_DATA_LEN
            && additive_checksum(&self.bytes[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + len])
                == self.declared_checksum()
    }

    /// Payload covered by the header's length, clamped to the buffer.
    pub fn payload(&self) -> &[u8] {
        let len = self.declared_len().min(BLOCK_DATA_LEN);
        &self.bytes[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + len]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
