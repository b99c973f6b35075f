use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use log::info;

use super::raw::{FLASH_SECTOR_SIZE, RawFlash, RawFlashError};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PartitionError {
    PartitionTable,
    ContentPartitionMissing,
    PartitionTooSmall,
    OutOfBounds,
    Flash(RawFlashError),
}

impl NorFlashError for PartitionError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::Flash(err) => err.kind(),
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// The content partition, addressed from its own start.
///
/// Image slots and the firmware staging area both live here. The first
/// writable data partition of undefined subtype is used.
#[derive(Debug)]
pub struct PartitionFlash {
    flash: RawFlash,
    offset: u32,
    len: u32,
}

impl PartitionFlash {
    pub fn locate(min_len: u32) -> Result<Self, PartitionError> {
        let mut flash = RawFlash::new().map_err(PartitionError::Flash)?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| PartitionError::PartitionTable)?;

        let mut found: Option<(u32, u32)> = None;
        for entry in table.iter() {
            if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
                continue;
            }
            if let PartitionType::Data(DataPartitionSubType::Undefined) = entry.partition_type() {
                found = Some((entry.offset(), entry.len()));
                break;
            }
        }

        let (offset, len) = found.ok_or(PartitionError::ContentPartitionMissing)?;
        if len < min_len {
            return Err(PartitionError::PartitionTooSmall);
        }
        info!("storage: content partition at {:#x}, {} KiB", offset, len / 1024);
        Ok(Self { flash, offset, len })
    }

    /// Absolute flash address of a partition-relative one.
    pub fn base(&self) -> u32 {
        self.offset
    }

    fn span(&self, offset: u32, len: usize) -> Result<u32, PartitionError> {
        let end = offset as u64 + len as u64;
        if end > self.len as u64 {
            return Err(PartitionError::OutOfBounds);
        }
        Ok(self.offset + offset)
    }
}

impl ErrorType for PartitionFlash {
    type Error = PartitionError;
}

impl ReadNorFlash for PartitionFlash {
    const READ_SIZE: usize = RawFlash::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let addr = self.span(offset, bytes.len())?;
        self.flash
            .read_bytes(addr, bytes)
            .map_err(PartitionError::Flash)
    }

    fn capacity(&self) -> usize {
        self.len as usize
    }
}

impl NorFlash for PartitionFlash {
    const WRITE_SIZE: usize = RawFlash::WRITE_SIZE;
    const ERASE_SIZE: usize = RawFlash::ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if to < from {
            return Err(PartitionError::OutOfBounds);
        }
        let start = self.span(from, (to - from) as usize)?;
        NorFlash::erase(&mut self.flash, start, start + (to - from)).map_err(PartitionError::Flash)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let addr = self.span(offset, bytes.len())?;
        NorFlash::write(&mut self.flash, addr, bytes).map_err(PartitionError::Flash)
    }
}
