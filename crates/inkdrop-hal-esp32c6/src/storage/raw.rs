use embedded_storage::{
    ReadStorage, Storage,
    nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash},
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};

pub const FLASH_SECTOR_SIZE: u32 = 4096;
const FLASH_CAPACITY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RawFlashError {
    OpFailed(i32),
    Misaligned,
    OutOfBounds,
}

impl NorFlashError for RawFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OpFailed(_) => NorFlashErrorKind::Other,
            Self::Misaligned => NorFlashErrorKind::NotAligned,
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
        }
    }
}

/// Whole-chip access through the ROM spiflash routines.
///
/// The handle carries no state, so several may exist at once; callers keep
/// their accesses from interleaving.
#[derive(Debug, Clone, Copy)]
pub struct RawFlash;

impl RawFlash {
    pub fn new() -> Result<Self, RawFlashError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(RawFlashError::OpFailed(rc));
        }
        Ok(Self)
    }

    fn read_word(&self, addr: u32) -> Result<u32, RawFlashError> {
        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(RawFlashError::OpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), RawFlashError> {
        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(RawFlashError::OpFailed(rc));
        }
        Ok(())
    }

    /// Reads any byte range by widening it to whole words.
    pub fn read_bytes(&self, addr: u32, out: &mut [u8]) -> Result<(), RawFlashError> {
        if out.is_empty() {
            return Ok(());
        }

        let start = addr & !0b11;
        let end = (addr + out.len() as u32 + 3) & !0b11;
        for word_addr in (start..end).step_by(4) {
            let bytes = self.read_word(word_addr)?.to_le_bytes();
            for (i, b) in bytes.iter().enumerate() {
                let pos = word_addr + i as u32;
                if pos < addr {
                    continue;
                }
                let dst = (pos - addr) as usize;
                if dst >= out.len() {
                    break;
                }
                out[dst] = *b;
            }
        }
        Ok(())
    }

    pub fn erase_sector(&mut self, sector_addr: u32) -> Result<(), RawFlashError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(RawFlashError::Misaligned);
        }
        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(RawFlashError::OpFailed(rc));
        }
        Ok(())
    }
}

impl ErrorType for RawFlash {
    type Error = RawFlashError;
}

impl ReadNorFlash for RawFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), RawFlashError> {
        if offset as usize + bytes.len() > FLASH_CAPACITY_BYTES {
            return Err(RawFlashError::OutOfBounds);
        }
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        FLASH_CAPACITY_BYTES
    }
}

impl NorFlash for RawFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), RawFlashError> {
        if !from.is_multiple_of(FLASH_SECTOR_SIZE) || !to.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(RawFlashError::Misaligned);
        }
        if to < from || to as usize > FLASH_CAPACITY_BYTES {
            return Err(RawFlashError::OutOfBounds);
        }
        for sector in (from..to).step_by(FLASH_SECTOR_SIZE as usize) {
            self.erase_sector(sector)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), RawFlashError> {
        if !offset.is_multiple_of(4) || !bytes.len().is_multiple_of(4) {
            return Err(RawFlashError::Misaligned);
        }
        if offset as usize + bytes.len() > FLASH_CAPACITY_BYTES {
            return Err(RawFlashError::OutOfBounds);
        }
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_word(offset + 4 * i as u32, word)?;
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = RawFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), RawFlashError> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        FLASH_CAPACITY_BYTES
    }
}

// The partition table reader never writes; anything else goes through
// `NorFlash` or an `RmwNorFlashStorage` wrapper.
impl Storage for RawFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), RawFlashError> {
        NorFlash::write(self, offset, bytes)
    }
}
