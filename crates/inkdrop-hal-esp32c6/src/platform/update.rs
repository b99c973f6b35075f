use embedded_storage::{
    ReadStorage, Storage,
    nor_flash::{NorFlash, RmwNorFlashStorage},
};
use esp_bootloader_esp_idf::{
    ota::OtaImageState,
    ota_updater::OtaUpdater,
    partitions::PARTITION_TABLE_MAX_LEN,
};
use inkdrop_core::platform::FirmwareUpdater;
use log::{info, warn};

use crate::storage::raw::{RawFlash, RawFlashError};

const COPY_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpdateError {
    Flash(RawFlashError),
    /// Partition table or OTA data could not be used.
    Ota,
    /// The staged image does not fit the next app partition.
    TooLarge,
}

/// Copies a staged image into the inactive OTA app partition, marks it for
/// the next boot and resets.
pub struct OtaInstaller {
    flash: RawFlash,
    base: u32,
    merge: [u8; RawFlash::ERASE_SIZE],
    table: [u8; PARTITION_TABLE_MAX_LEN],
}

impl OtaInstaller {
    /// `base` is the absolute address the staged addresses are relative to.
    pub fn new(flash: RawFlash, base: u32) -> Self {
        Self {
            flash,
            base,
            merge: [0; RawFlash::ERASE_SIZE],
            table: [0; PARTITION_TABLE_MAX_LEN],
        }
    }

    fn install(&mut self, address: u32, len: u32) -> Result<(), UpdateError> {
        let source = self.flash;
        let start = self.base + address;
        let mut writer = self.flash;
        let mut storage = RmwNorFlashStorage::new(&mut writer, &mut self.merge);

        let mut ota = OtaUpdater::new(&mut storage, &mut self.table).map_err(|err| {
            warn!("update: no OTA layout: {:?}", err);
            UpdateError::Ota
        })?;
        let (mut target, subtype) = ota.next_partition().map_err(|_| UpdateError::Ota)?;
        if len as usize > target.capacity() {
            return Err(UpdateError::TooLarge);
        }
        info!("update: writing {} bytes to {:?}", len, subtype);

        let mut chunk = [0u8; COPY_CHUNK];
        let mut copied = 0u32;
        while copied < len {
            let take = COPY_CHUNK.min((len - copied) as usize);
            source
                .read_bytes(start + copied, &mut chunk[..take])
                .map_err(UpdateError::Flash)?;
            target
                .write(copied, &chunk[..take])
                .map_err(|_| UpdateError::Ota)?;
            copied += take as u32;
        }

        ota.activate_next_partition().map_err(|_| UpdateError::Ota)?;
        ota.set_current_ota_state(OtaImageState::New)
            .map_err(|_| UpdateError::Ota)
    }
}

impl FirmwareUpdater for OtaInstaller {
    type Error = UpdateError;

    fn apply(&mut self, address: u32, len: u32) -> Result<(), Self::Error> {
        self.install(address, len)?;
        info!("update: rebooting into the new image");
        esp_hal::system::software_reset()
    }
}
