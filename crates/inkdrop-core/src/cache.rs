//! Persistent content slots on a NOR flash device.
//!
//! Layout: a firmware staging area, then a ring of equally sized image
//! slots. Every slot starts with a 32-byte header:
//!
//! | offset | field                 |
//! |--------|-----------------------|
//! | 0..8   | content version       |
//! | 8..12  | content size          |
//! | 12..16 | slot id (monotonic)   |
//! | 16     | content type          |
//! | 24..28 | validity marker       |
//!
//! The marker is written after everything else, so a slot is either fully
//! valid or not found at all.

use embedded_storage::nor_flash::NorFlash;
use log::{debug, info, warn};

use crate::{
    block::BLOCK_DATA_LEN,
    config::StorageLayout,
    message::AvailabilityResponse,
    transfer::BlockSink,
};

pub const SLOT_VALID_MARKER: u32 = 0x474D_4721;
pub const SLOT_HEADER_LEN: u32 = 32;
pub const MAX_SLOTS: u32 = 254;

const FIELDS_LEN: usize = 24;
const MARKER_OFFSET: u32 = 24;
/// Chunk size for padded writes; must be a multiple of the flash write size.
const WRITE_CHUNK: usize = 256;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SlotId(pub u8);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotHeader {
    pub version: u64,
    pub size: u32,
    pub id: u32,
    pub content_type: u8,
}

impl SlotHeader {
    fn fields(&self) -> [u8; FIELDS_LEN] {
        let mut bytes = [0xFF; FIELDS_LEN];
        bytes[0..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.id.to_le_bytes());
        bytes[16] = self.content_type;
        bytes
    }

    /// Parses a raw header, or `None` when the marker is missing.
    pub fn parse(raw: &[u8; SLOT_HEADER_LEN as usize]) -> Option<Self> {
        let marker = u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]);
        if marker != SLOT_VALID_MARKER {
            return None;
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&raw[0..8]);
        Some(Self {
            version: u64::from_le_bytes(version),
            size: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            id: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            content_type: raw[16],
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheError<E> {
    Flash(E),
    /// The device cannot hold the staging area and at least one slot.
    StorageTooSmall,
    SlotOutOfRange,
    /// Data would run past the end of its slot or staging area.
    Overflow,
    /// A write does not start on a flash write boundary.
    Misaligned,
}

pub struct ContentCache<F> {
    flash: F,
    layout: StorageLayout,
    slot_count: u8,
    highest_id: u32,
    highest_slot: Option<SlotId>,
    last_allocated: Option<u8>,
}

impl<F> ContentCache<F>
where
    F: NorFlash,
{
    pub fn open(flash: F, layout: StorageLayout) -> Result<Self, CacheError<F::Error>> {
        let capacity = u32::try_from(flash.capacity()).unwrap_or(u32::MAX);
        let update_end = layout
            .update_start
            .checked_add(layout.update_len)
            .ok_or(CacheError::StorageTooSmall)?;
        if capacity < layout.image_start
            || capacity < update_end
            || layout.slot_len <= SLOT_HEADER_LEN
        {
            warn!("cache: storage of {} bytes is too small", capacity);
            return Err(CacheError::StorageTooSmall);
        }
        let slots = (capacity - layout.image_start) / layout.slot_len;
        if slots == 0 {
            warn!("cache: storage of {} bytes holds no slot", capacity);
            return Err(CacheError::StorageTooSmall);
        }
        if slots > MAX_SLOTS {
            debug!("cache: {} slots fit, using {}", slots, MAX_SLOTS);
        }

        Ok(Self {
            flash,
            layout,
            slot_count: slots.min(MAX_SLOTS) as u8,
            highest_id: 0,
            highest_slot: None,
            last_allocated: None,
        })
    }

    pub fn slot_count(&self) -> u8 {
        self.slot_count
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Slot with the highest id seen so far.
    pub fn highest_slot(&self) -> Option<SlotId> {
        self.highest_slot
    }

    /// Id the next committed slot will carry.
    pub fn next_id(&self) -> u32 {
        self.highest_id.wrapping_add(1)
    }

    /// Bytes of content a slot can hold.
    pub fn slot_capacity(&self) -> u32 {
        self.layout.slot_len - SLOT_HEADER_LEN
    }

    pub fn update_address(&self) -> u32 {
        self.layout.update_start
    }

    pub fn update_capacity(&self) -> u32 {
        self.layout.update_len
    }

    pub fn slot_address(&self, slot: SlotId) -> Result<u32, CacheError<F::Error>> {
        if slot.0 >= self.slot_count {
            return Err(CacheError::SlotOutOfRange);
        }
        Ok(self.layout.image_start + u32::from(slot.0) * self.layout.slot_len)
    }

    /// Address of the content itself, past the slot header.
    pub fn content_address(&self, slot: SlotId) -> Result<u32, CacheError<F::Error>> {
        Ok(self.slot_address(slot)? + SLOT_HEADER_LEN)
    }

    pub fn read_header(
        &mut self,
        slot: SlotId,
    ) -> Result<Option<SlotHeader>, CacheError<F::Error>> {
        let address = self.slot_address(slot)?;
        let mut raw = [0u8; SLOT_HEADER_LEN as usize];
        self.flash.read(address, &mut raw).map_err(CacheError::Flash)?;
        Ok(SlotHeader::parse(&raw))
    }

    /// First valid slot holding `version`.
    pub fn find_slot(&mut self, version: u64) -> Result<Option<SlotId>, CacheError<F::Error>> {
        for index in 0..self.slot_count {
            let slot = SlotId(index);
            if let Some(header) = self.read_header(slot)?
                && header.version == version
            {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Finds the valid slot with the highest id. Seeds the id counter and the
    /// allocation ring from it.
    pub fn scan_highest(&mut self) -> Result<Option<SlotId>, CacheError<F::Error>> {
        let mut best: Option<(SlotId, u32)> = None;
        for index in 0..self.slot_count {
            let slot = SlotId(index);
            if let Some(header) = self.read_header(slot)?
                && best.is_none_or(|(_, id)| header.id > id)
            {
                best = Some((slot, header.id));
            }
        }

        if let Some((slot, id)) = best {
            info!("cache: highest id {} in slot {}", id, slot.0);
            self.highest_id = id;
            self.highest_slot = Some(slot);
            self.last_allocated = Some(slot.0);
        } else {
            info!("cache: no valid slots");
        }
        Ok(best.map(|(slot, _)| slot))
    }

    /// Takes the next slot in the ring and erases it.
    pub fn allocate_slot(&mut self) -> Result<SlotId, CacheError<F::Error>> {
        let next = match self.last_allocated {
            Some(last) if last + 1 < self.slot_count => last + 1,
            _ => 0,
        };
        let slot = SlotId(next);
        let address = self.slot_address(slot)?;
        self.flash
            .erase(address, address + self.layout.slot_len)
            .map_err(CacheError::Flash)?;
        self.last_allocated = Some(next);
        if self.highest_slot == Some(slot) {
            self.highest_slot = None;
        }
        debug!("cache: allocated slot {}", next);
        Ok(slot)
    }

    /// Writes the header fields, then the marker.
    pub fn commit(
        &mut self,
        slot: SlotId,
        header: &SlotHeader,
    ) -> Result<(), CacheError<F::Error>> {
        let address = self.slot_address(slot)?;
        self.write_padded(address, &header.fields())?;
        self.write_padded(address + MARKER_OFFSET, &SLOT_VALID_MARKER.to_le_bytes())?;
        if header.id >= self.highest_id {
            self.highest_id = header.id;
            self.highest_slot = Some(slot);
        }
        info!(
            "cache: slot {} holds v{:#x} ({} bytes, id {})",
            slot.0, header.version, header.size, header.id
        );
        Ok(())
    }

    /// Writes one block of content into `slot`, clamped to the slot's end.
    pub fn write_image_block(
        &mut self,
        slot: SlotId,
        block: u8,
        data: &[u8],
    ) -> Result<(), CacheError<F::Error>> {
        let offset = u32::from(block) * BLOCK_DATA_LEN as u32;
        let room = self
            .slot_capacity()
            .checked_sub(offset)
            .filter(|room| *room > 0)
            .ok_or(CacheError::Overflow)?;
        let len = data.len().min(room as usize);
        let address = self.content_address(slot)? + offset;
        self.write_padded(address, &data[..len])
    }

    pub fn erase_update_area(&mut self) -> Result<(), CacheError<F::Error>> {
        let start = self.layout.update_start;
        self.flash
            .erase(start, start + self.layout.update_len)
            .map_err(CacheError::Flash)
    }

    pub fn write_update_block(
        &mut self,
        block: u8,
        data: &[u8],
    ) -> Result<(), CacheError<F::Error>> {
        let offset = u32::from(block) * BLOCK_DATA_LEN as u32;
        if offset + data.len() as u32 > self.layout.update_len {
            return Err(CacheError::Overflow);
        }
        self.write_padded(self.layout.update_start + offset, data)
    }

    /// Writes `data`, padding the tail with 0xFF up to the write granularity.
    fn write_padded(&mut self, address: u32, data: &[u8]) -> Result<(), CacheError<F::Error>> {
        let unit = F::WRITE_SIZE.max(1);
        if address as usize % unit != 0 || WRITE_CHUNK % unit != 0 {
            return Err(CacheError::Misaligned);
        }
        let mut chunk = [0xFF; WRITE_CHUNK];
        let mut offset = address;
        for piece in data.chunks(WRITE_CHUNK) {
            let padded = piece.len().div_ceil(unit) * unit;
            chunk[..piece.len()].copy_from_slice(piece);
            chunk[piece.len()..padded].fill(0xFF);
            self.flash
                .write(offset, &chunk[..padded])
                .map_err(CacheError::Flash)?;
            offset += piece.len() as u32;
        }
        Ok(())
    }
}

/// Sink that stores an image in a freshly allocated slot and commits the
/// slot header once the last block is in.
pub struct ImageSink<'a, F> {
    cache: &'a mut ContentCache<F>,
    slot: SlotId,
}

impl<'a, F: NorFlash> ImageSink<'a, F> {
    pub fn new(cache: &'a mut ContentCache<F>, slot: SlotId) -> Self {
        Self { cache, slot }
    }
}

impl<F: NorFlash> BlockSink for ImageSink<'_, F> {
    type Error = CacheError<F::Error>;

    fn commit_block(&mut self, index: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.cache.write_image_block(self.slot, index, data)
    }

    fn finalize(&mut self, content: &AvailabilityResponse) -> Result<(), Self::Error> {
        let header = SlotHeader {
            version: content.version,
            size: content.size,
            id: self.cache.next_id(),
            content_type: content.content_type.code(),
        };
        self.cache.commit(self.slot, &header)
    }
}

/// Sink that stages a firmware image in the update area.
pub struct UpdateSink<'a, F> {
    cache: &'a mut ContentCache<F>,
}

impl<'a, F: NorFlash> UpdateSink<'a, F> {
    pub fn new(cache: &'a mut ContentCache<F>) -> Self {
        Self { cache }
    }
}

impl<F: NorFlash> BlockSink for UpdateSink<'_, F> {
    type Error = CacheError<F::Error>;

    fn commit_block(&mut self, index: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.cache.write_update_block(index, data)
    }

    fn finalize(&mut self, content: &AvailabilityResponse) -> Result<(), Self::Error> {
        info!("cache: staged {} bytes of firmware", content.size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::nor_flash::{NorFlashErrorKind, ReadNorFlash};

    use super::*;
    use crate::{message::ContentType, sim::RamFlash};

    const SLOT_LEN: u32 = 0x2000;

    fn layout() -> StorageLayout {
        StorageLayout::default()
            .with_update_area(0, 0x2000)
            .with_image_start(0x2000)
            .with_slot_len(SLOT_LEN)
    }

    fn cache(slots: u32) -> ContentCache<RamFlash> {
        let flash = RamFlash::new((0x2000 + slots * SLOT_LEN) as usize);
        ContentCache::open(flash, layout()).unwrap()
    }

    fn header(version: u64, id: u32) -> SlotHeader {
        SlotHeader {
            version,
            size: 100,
            id,
            content_type: ContentType::Image.code(),
        }
    }

    #[test]
    fn storage_smaller_than_one_slot_is_rejected() {
        let flash = RamFlash::new(0x3000);
        assert!(matches!(
            ContentCache::open(flash, layout()),
            Err(CacheError::StorageTooSmall)
        ));
    }

    #[test]
    fn slot_count_is_capped() {
        let layout = StorageLayout::default()
            .with_update_area(0, 0x1000)
            .with_image_start(0x1000)
            .with_slot_len(0x1000);
        let flash = RamFlash::new(0x1000 + 300 * 0x1000);
        let cache = ContentCache::open(flash, layout).unwrap();
        assert_eq!(cache.slot_count(), 254);
    }

    #[test]
    fn committed_slot_is_found_by_version() {
        let mut cache = cache(3);
        let slot = cache.allocate_slot().unwrap();
        cache.commit(slot, &header(0xAA, 1)).unwrap();

        assert_eq!(cache.find_slot(0xAA), Ok(Some(slot)));
        assert_eq!(cache.find_slot(0xAB), Ok(None));
        assert_eq!(cache.read_header(slot), Ok(Some(header(0xAA, 1))));
    }

    #[test]
    fn slot_without_marker_is_absent() {
        let mut cache = cache(3);
        let slot = cache.allocate_slot().unwrap();
        cache.commit(slot, &header(0xAA, 1)).unwrap();
        let marker_at = (cache.slot_address(slot).unwrap() + MARKER_OFFSET) as usize;
        cache.flash_mut().bytes_mut()[marker_at..marker_at + 4].fill(0xFF);

        assert_eq!(cache.find_slot(0xAA), Ok(None));
        assert_eq!(cache.scan_highest(), Ok(None));
    }

    #[test]
    fn allocation_wraps_and_erases() {
        let mut cache = cache(3);
        let slots: Vec<u8> = (0..4).map(|_| cache.allocate_slot().unwrap().0).collect();
        assert_eq!(slots, [0, 1, 2, 0]);

        let erases = cache.flash().erases();
        assert_eq!(erases.len(), 4);
        assert_eq!(erases[3], (0x2000, 0x2000 + SLOT_LEN));
    }

    #[test]
    fn boot_scan_seeds_ids_and_ring() {
        let mut cache = cache(4);
        cache.commit(SlotId(1), &header(0x10, 5)).unwrap();
        cache.commit(SlotId(2), &header(0x20, 3)).unwrap();

        let flash = RamFlash::with_contents(cache.flash().bytes().to_vec());
        let mut reopened = ContentCache::open(flash, layout()).unwrap();

        assert_eq!(reopened.scan_highest(), Ok(Some(SlotId(1))));
        assert_eq!(reopened.highest_slot(), Some(SlotId(1)));
        assert_eq!(reopened.next_id(), 6);
        assert_eq!(reopened.allocate_slot(), Ok(SlotId(2)));
    }

    #[test]
    fn image_blocks_are_padded_and_clamped() {
        let mut cache = cache(2);
        let slot = cache.allocate_slot().unwrap();
        cache.write_image_block(slot, 0, &[0x11; 10]).unwrap();
        let start = cache.content_address(slot).unwrap() as usize;
        let bytes = cache.flash().bytes();
        assert_eq!(&bytes[start..start + 10], &[0x11; 10]);
        assert_eq!(bytes[start + 10], 0xFF);

        // second block only has room for the slot remainder
        cache.write_image_block(slot, 1, &[0x22; 4096]).unwrap();
        let end = (cache.slot_address(slot).unwrap() + SLOT_LEN) as usize;
        assert_eq!(cache.flash().bytes()[end - 1], 0x22);
        assert_eq!(cache.flash().bytes()[end], 0xFF);

        assert_eq!(
            cache.write_image_block(slot, 2, &[0x33; 16]),
            Err(CacheError::Overflow)
        );
    }

    #[test]
    fn update_area_is_erased_and_written_per_block() {
        let mut cache = cache(1);
        cache.flash_mut().bytes_mut()[..0x2000].fill(0);
        cache.erase_update_area().unwrap();
        assert!(cache.flash().bytes()[..0x2000].iter().all(|b| *b == 0xFF));

        cache.write_update_block(1, &[0x5A; 904]).unwrap();
        let mut readback = [0u8; 904];
        cache.flash_mut().read(4096, &mut readback).unwrap();
        assert_eq!(readback, [0x5A; 904]);

        assert_eq!(
            cache.write_update_block(2, &[0; 1]),
            Err(CacheError::Overflow)
        );
    }

    #[test]
    fn flash_failures_surface() {
        let mut cache = cache(1);
        cache.flash_mut().set_fail_writes(true);
        assert_eq!(
            cache.commit(SlotId(0), &header(1, 1)),
            Err(CacheError::Flash(NorFlashErrorKind::Other))
        );
        assert_eq!(
            cache.slot_address(SlotId(1)),
            Err(CacheError::SlotOutOfRange)
        );
    }

    #[test]
    fn image_sink_commits_header_last() {
        let mut cache = cache(2);
        let slot = cache.allocate_slot().unwrap();
        let content = AvailabilityResponse {
            version: 0x77,
            size: 10,
            content_type: ContentType::RawImage,
            next_check_in_minutes: 0,
        };
        let mut sink = ImageSink::new(&mut cache, slot);
        sink.commit_block(0, &[1; 10]).unwrap();
        assert_eq!(sink.cache.find_slot(0x77), Ok(None));
        sink.finalize(&content).unwrap();

        assert_eq!(cache.find_slot(0x77), Ok(Some(slot)));
        let header = cache.read_header(slot).unwrap().unwrap();
        assert_eq!(header.id, 1);
        assert_eq!(header.content_type, 2);
        assert_eq!(cache.highest_slot(), Some(slot));
    }
}
