//! Host-side stand-ins for the radio, the AP, the clock and the flash chip.

use core::cell::Cell;
use std::{collections::VecDeque, vec::Vec};

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use crate::{
    block::{BLOCK_DATA_LEN, additive_checksum},
    config::PROTOCOL_PAN_ID,
    frame::{self, Addressing, ExtAddr},
    message::{AvailabilityResponse, BlockPart, BlockRequestAck, Message},
    parts::{MAX_PARTS, PART_DATA_LEN},
    platform::{Clock, FirmwareUpdater, Renderer, Telemetry, Transport},
};

pub const TAG_ADDR: ExtAddr = [0x02, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55];
pub const AP_ADDR: ExtAddr = [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11];

/// Advances one tick (one millisecond) every time it is read.
pub struct SimClock {
    now: Cell<u64>,
    slept: Vec<u32>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            slept: Vec::new(),
        }
    }

    pub fn slept(&self) -> &[u32] {
        &self.slept
    }
}

impl Clock for SimClock {
    const TICKS_PER_MS: u64 = 1;

    fn now(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + 1);
        now
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.slept.push(ms);
        self.now.set(self.now.get() + u64::from(ms));
    }
}

/// A radio whose far end is a scripted access point.
///
/// Replies are only delivered while reception is on. Parts that answer a
/// block request are held back until the tag reopens reception without
/// flushing, which is when it starts listening for them.
pub struct SimAp {
    rx_enabled: bool,
    inbox: VecDeque<Vec<u8>>,
    staged: Vec<Vec<u8>>,
    sent_frames: Vec<Vec<u8>>,
    sequence: u8,
    offer: Option<AvailabilityResponse>,
    content: Vec<u8>,
    silent_checkins: usize,
    drop_once: Vec<(u8, u8)>,
    starved_block: Option<u8>,
    cancel_requests: bool,
    ack_wait_ms: u16,
    skip_ack: bool,
    corrupt_headers: usize,
    ack_completion: bool,
    power_downs: usize,
    reinits: usize,
}

impl SimAp {
    pub fn new() -> Self {
        Self {
            rx_enabled: false,
            inbox: VecDeque::new(),
            staged: Vec::new(),
            sent_frames: Vec::new(),
            sequence: 0,
            offer: None,
            content: Vec::new(),
            silent_checkins: 0,
            drop_once: Vec::new(),
            starved_block: None,
            cancel_requests: false,
            ack_wait_ms: 0,
            skip_ack: false,
            corrupt_headers: 0,
            ack_completion: true,
            power_downs: 0,
            reinits: 0,
        }
    }

    /// Answers check-ins with `offer` and serves `content` for its blocks.
    pub fn with_offer(mut self, offer: AvailabilityResponse, content: Vec<u8>) -> Self {
        self.offer = Some(offer);
        self.content = content;
        self
    }

    pub fn with_silent_checkins(mut self, count: usize) -> Self {
        self.silent_checkins = count;
        self
    }

    /// Loses each listed `(block, part)` the first time it is sent.
    pub fn with_dropped_parts(mut self, parts: &[(u8, u8)]) -> Self {
        self.drop_once = parts.to_vec();
        self
    }

    /// Acks requests for `block` but never sends its parts.
    pub fn with_starved_block(mut self, block: u8) -> Self {
        self.starved_block = Some(block);
        self
    }

    pub fn with_cancel(mut self) -> Self {
        self.cancel_requests = true;
        self
    }

    pub fn with_ack_wait(mut self, wait_ms: u16) -> Self {
        self.ack_wait_ms = wait_ms;
        self
    }

    /// Sends parts straight away instead of an ack.
    pub fn with_skipped_ack(mut self) -> Self {
        self.skip_ack = true;
        self
    }

    /// Sends a wrong block checksum the next `count` times part 0 goes out.
    pub fn with_corrupt_headers(mut self, count: usize) -> Self {
        self.corrupt_headers = count;
        self
    }

    pub fn without_completion_ack(mut self) -> Self {
        self.ack_completion = false;
        self
    }

    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent_frames
    }

    /// Every frame the tag transmitted, decoded.
    pub fn sent(&self) -> Vec<Message> {
        self.sent_frames
            .iter()
            .filter_map(|raw| Message::decode(raw).ok().map(|(_, message)| message))
            .collect()
    }

    pub fn block_requests(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|message| {
                matches!(
                    message,
                    Message::BlockRequest(_) | Message::PartialBlockRequest(_)
                )
            })
            .collect()
    }

    pub fn count_sent(&self, matcher: impl Fn(&Message) -> bool) -> usize {
        self.sent().iter().filter(|message| matcher(message)).count()
    }

    pub fn power_downs(&self) -> usize {
        self.power_downs
    }

    pub fn reinits(&self) -> usize {
        self.reinits
    }

    /// Queues a frame for the tag as if it had just arrived.
    pub fn inject(&mut self, addressing: Addressing, message: &Message) {
        let frame = self.encode(addressing, message);
        self.inbox.push_back(frame);
    }

    pub fn inject_raw(&mut self, bytes: &[u8]) {
        self.inbox.push_back(bytes.to_vec());
    }

    fn encode(&mut self, addressing: Addressing, message: &Message) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        let header = frame::MacHeader::new(self.sequence, addressing);
        let mut out = heapless::Vec::new();
        message
            .encode_into(&header, &mut out)
            .expect("sim frame fits");
        out.to_vec()
    }

    fn reply(&mut self, message: &Message) -> Vec<u8> {
        self.encode(
            Addressing::Unicast {
                pan: PROTOCOL_PAN_ID,
                dst: TAG_ADDR,
                src: AP_ADDR,
            },
            message,
        )
    }

    fn block_bytes(&mut self, block: u8, with_header_part: bool) -> Vec<u8> {
        let start = (usize::from(block) * BLOCK_DATA_LEN).min(self.content.len());
        let end = (start + BLOCK_DATA_LEN).min(self.content.len());
        let payload = self.content[start..end].to_vec();
        let mut checksum = additive_checksum(&payload);
        if with_header_part && self.corrupt_headers > 0 {
            self.corrupt_headers -= 1;
            checksum ^= 0x0001;
        }
        let mut bytes = Vec::with_capacity(payload.len() + 4);
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn answer(&mut self, message: Message) {
        match message {
            Message::AvailabilityRequest(_) => {
                if self.silent_checkins > 0 {
                    self.silent_checkins -= 1;
                    return;
                }
                if let Some(offer) = self.offer {
                    let frame = self.reply(&Message::AvailabilityResponse(offer));
                    self.inbox.push_back(frame);
                }
            }
            Message::BlockRequest(request) | Message::PartialBlockRequest(request) => {
                self.staged.clear();
                if self.cancel_requests {
                    let frame = self.reply(&Message::CancelTransfer);
                    self.inbox.push_back(frame);
                    return;
                }
                if !self.skip_ack {
                    let ack = Message::BlockRequestAck(BlockRequestAck {
                        wait_ms: self.ack_wait_ms,
                    });
                    let frame = self.reply(&ack);
                    self.inbox.push_back(frame);
                }
                if self.starved_block == Some(request.block_index) {
                    return;
                }

                let block = request.block_index;
                let bytes = self.block_bytes(block, request.parts.is_requested(0));
                let wanted: Vec<usize> = request.parts.missing(MAX_PARTS).collect();
                for index in wanted {
                    let start = index * PART_DATA_LEN;
                    if start >= bytes.len() {
                        continue;
                    }
                    let part_id = (block, index as u8);
                    if let Some(at) = self.drop_once.iter().position(|id| *id == part_id) {
                        self.drop_once.remove(at);
                        continue;
                    }
                    let end = (start + PART_DATA_LEN).min(bytes.len());
                    let part = BlockPart::new(block, index as u8, &bytes[start..end]);
                    let frame = self.reply(&Message::BlockPart(part));
                    if self.skip_ack {
                        self.inbox.push_back(frame);
                    } else {
                        self.staged.push(frame);
                    }
                }
            }
            Message::TransferComplete => {
                if self.ack_completion {
                    let frame = self.reply(&Message::TransferCompleteAck);
                    self.inbox.push_back(frame);
                }
            }
            _ => {}
        }
    }
}

impl Transport for SimAp {
    type Error = core::convert::Infallible;

    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.sent_frames.push(frame.to_vec());
        if !self.rx_enabled {
            return Ok(());
        }
        if let Ok((_, message)) = Message::decode(frame) {
            self.answer(message);
        }
        Ok(())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> usize {
        if !self.rx_enabled {
            return 0;
        }
        let Some(frame) = self.inbox.pop_front() else {
            return 0;
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        len
    }

    fn set_reception(&mut self, enabled: bool, flush: bool) {
        self.rx_enabled = enabled;
        if flush {
            self.inbox.clear();
        } else if enabled {
            self.inbox.extend(self.staged.drain(..));
        }
    }

    fn flush_pending(&mut self) {
        self.inbox.clear();
    }

    fn last_lqi(&self) -> u8 {
        180
    }

    fn last_rssi(&self) -> i8 {
        -60
    }

    fn reinitialize(&mut self) {
        self.reinits += 1;
    }

    fn power_down(&mut self) {
        self.power_downs += 1;
        self.set_reception(false, true);
    }
}

/// NOR flash in RAM: erase sets bytes to 0xFF, writes can only clear bits.
pub struct RamFlash {
    data: Vec<u8>,
    erases: Vec<(u32, u32)>,
    fail_writes: bool,
}

impl RamFlash {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0xFF; capacity],
            erases: Vec::new(),
            fail_writes: false,
        }
    }

    /// Flash that starts out holding `data`.
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data,
            erases: Vec::new(),
            fail_writes: false,
        }
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn erases(&self) -> &[(u32, u32)] {
        &self.erases
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.erases.push((from, to));
        self.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub rendered: Vec<u32>,
}

impl Renderer for RecordingRenderer {
    type Error = core::convert::Infallible;

    fn render(&mut self, address: u32) -> Result<(), Self::Error> {
        self.rendered.push(address);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUpdater {
    pub applied: Vec<(u32, u32)>,
}

impl FirmwareUpdater for RecordingUpdater {
    type Error = core::convert::Infallible;

    fn apply(&mut self, address: u32, len: u32) -> Result<(), Self::Error> {
        self.applied.push((address, len));
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
pub struct FixedTelemetry {
    pub battery_mv: u16,
    pub temperature: u8,
    pub button: bool,
}

impl Telemetry for FixedTelemetry {
    fn battery_mv(&mut self) -> u16 {
        self.battery_mv
    }

    fn temperature(&mut self) -> u8 {
        self.temperature
    }

    fn take_button_press(&mut self) -> bool {
        core::mem::take(&mut self.button)
    }
}

/// Deterministic test content of `len` bytes.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 256) as u8).collect()
}
