//! Requested-parts bitset for one block.

/// Payload bytes carried by one block part.
pub const PART_DATA_LEN: usize = 99;
/// Most parts a block can be split into.
pub const MAX_PARTS: usize = 42;
/// Bytes used to pack the mask on the wire.
pub const MASK_BYTES: usize = 6;

/// Bit `i` set means part `i` is still wanted. Bits at or above the block's
/// part count are never set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PartMask {
    bytes: [u8; MASK_BYTES],
}

impl PartMask {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MASK_BYTES],
        }
    }

    /// Mask asking for parts `0..required`. `required` is capped at [`MAX_PARTS`].
    pub fn requesting(required: usize) -> Self {
        let mut mask = Self::empty();
        for index in 0..required.min(MAX_PARTS) {
            mask.set(index);
        }
        mask
    }

    pub const fn from_bytes(bytes: [u8; MASK_BYTES]) -> Self {
        Self { bytes }
    }

    pub const fn to_bytes(&self) -> [u8; MASK_BYTES] {
        self.bytes
    }

    pub fn is_requested(&self, index: usize) -> bool {
        index < MAX_PARTS && self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn set(&mut self, index: usize) {
        if index < MAX_PARTS {
            self.bytes[index / 8] |= 1 << (index % 8);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < MAX_PARTS {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
    }

    /// True once no part in `0..required` is still wanted.
    pub fn is_complete(&self, required: usize) -> bool {
        self.missing(required).next().is_none()
    }

    /// Indices in `0..required` still wanted, ascending.
    pub fn missing(&self, required: usize) -> impl Iterator<Item = usize> + '_ {
        (0..required.min(MAX_PARTS)).filter(move |index| self.is_requested(*index))
    }

    pub fn count_missing(&self, required: usize) -> usize {
        self.missing(required).count()
    }
}
