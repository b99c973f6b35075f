//! Block transfer engine.
//!
//! Content is pulled one block at a time. Each round requests the parts
//! still missing from the current block, waits out the AP's requested delay,
//! listens for parts, and then either re-requests what is missing, retries a
//! block that failed its checksum, or commits it and moves on.

use log::{debug, info, trace, warn};

use crate::{
    block::{BLOCK_DATA_LEN, BlockBuffer, parts_for_block},
    link::Link,
    message::{AvailabilityResponse, BlockPart, BlockRequest, Message},
    parts::PartMask,
    platform::{Clock, Transport},
};

/// Largest content the one-byte block index can address.
pub const MAX_CONTENT_LEN: u32 = 256 * BLOCK_DATA_LEN as u32;

/// Destination for validated blocks.
pub trait BlockSink {
    type Error: core::fmt::Debug;

    fn commit_block(&mut self, index: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Called once after the last block has been committed.
    fn finalize(&mut self, content: &AvailabilityResponse) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferError<E> {
    /// The AP sent a cancel in reply to a block request.
    Cancelled,
    /// Too many consecutive receive windows without a single usable part.
    NoParts,
    /// Too many consecutive complete blocks that failed their checksum.
    Validation,
    Sink(E),
    /// The content cannot fit its destination.
    TooLarge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferReport {
    pub blocks: u16,
    /// Whether the AP acknowledged the transfer-complete message.
    pub acknowledged: bool,
}

/// What one request/receive round achieved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Round {
    Incomplete,
    Invalid,
    Committed,
    Finished,
}

enum Reply {
    Ack(u16),
    Cancel,
}

pub struct BlockTransfer {
    content: AvailabilityResponse,
    request: BlockRequest,
    partial: bool,
    remaining: u32,
    parts_this_block: usize,
    empty_windows: u8,
    validation_failures: u8,
    accepted: usize,
    committed: u16,
}

impl BlockTransfer {
    pub fn new(content: AvailabilityResponse) -> Self {
        let remaining = content.size;
        let parts_this_block = parts_for_block(block_len(remaining));
        Self {
            content,
            request: BlockRequest {
                version: content.version,
                block_index: 0,
                content_type: content.content_type,
                parts: PartMask::requesting(parts_this_block),
            },
            partial: false,
            remaining,
            parts_this_block,
            empty_windows: 0,
            validation_failures: 0,
            accepted: 0,
            committed: 0,
        }
    }

    pub fn request(&self) -> &BlockRequest {
        &self.request
    }

    pub fn parts_this_block(&self) -> usize {
        self.parts_this_block
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    fn is_last_block(&self) -> bool {
        self.remaining as usize <= BLOCK_DATA_LEN
    }

    /// Downloads every block into `sink`, then tells the AP the transfer is
    /// complete.
    pub fn run<T, C, S>(
        &mut self,
        link: &mut Link<T, C>,
        buffer: &mut BlockBuffer,
        sink: &mut S,
    ) -> Result<TransferReport, TransferError<S::Error>>
    where
        T: Transport,
        C: Clock,
        S: BlockSink,
    {
        if self.content.size > MAX_CONTENT_LEN {
            warn!("transfer: {} bytes exceeds the block index range", self.content.size);
            return Err(TransferError::TooLarge);
        }
        info!(
            "transfer: v{:#x} {:?}, {} bytes",
            self.content.version, self.content.content_type, self.content.size
        );

        loop {
            match self.run_round(link, buffer, sink)? {
                Round::Finished => break,
                Round::Incomplete | Round::Invalid | Round::Committed => {}
            }
        }

        let acknowledged = send_transfer_complete(link);
        info!("transfer: done, {} blocks, ack {}", self.committed, acknowledged);
        Ok(TransferReport {
            blocks: self.committed,
            acknowledged,
        })
    }

    fn run_round<T, C, S>(
        &mut self,
        link: &mut Link<T, C>,
        buffer: &mut BlockBuffer,
        sink: &mut S,
    ) -> Result<Round, TransferError<S::Error>>
    where
        T: Transport,
        C: Clock,
        S: BlockSink,
    {
        self.accepted = 0;
        debug!(
            "transfer: request block {} ({} of {} parts missing)",
            self.request.block_index,
            self.request.parts.count_missing(self.parts_this_block),
            self.parts_this_block
        );

        let Some(wait_ms) = self.request_block(link, buffer) else {
            return Err(TransferError::Cancelled);
        };
        await_parts(link, wait_ms);
        self.receive_parts(link, buffer);

        if self.accepted == 0 {
            self.empty_windows += 1;
            if self.empty_windows > link.config().max_empty_windows {
                warn!(
                    "transfer: no parts for block {} in {} windows",
                    self.request.block_index, self.empty_windows
                );
                return Err(TransferError::NoParts);
            }
        } else {
            self.empty_windows = 0;
        }

        if !self.request.parts.is_complete(self.parts_this_block) {
            self.partial = true;
            return Ok(Round::Incomplete);
        }

        if !buffer.validate() {
            self.validation_failures += 1;
            if self.validation_failures > link.config().max_validation_failures {
                warn!(
                    "transfer: block {} failed validation {} times",
                    self.request.block_index, self.validation_failures
                );
                return Err(TransferError::Validation);
            }
            debug!("transfer: block {} failed validation", self.request.block_index);
            self.request.parts = PartMask::requesting(self.parts_this_block);
            self.partial = false;
            return Ok(Round::Invalid);
        }

        self.validation_failures = 0;
        self.partial = false;
        sink.commit_block(self.request.block_index, buffer.payload())
            .map_err(TransferError::Sink)?;
        self.committed += 1;

        if self.is_last_block() {
            sink.finalize(&self.content).map_err(TransferError::Sink)?;
            return Ok(Round::Finished);
        }

        self.remaining -= BLOCK_DATA_LEN as u32;
        self.request.block_index = self.request.block_index.wrapping_add(1);
        self.parts_this_block = parts_for_block(block_len(self.remaining));
        self.request.parts = PartMask::requesting(self.parts_this_block);
        Ok(Round::Committed)
    }

    /// Sends the block request until the AP acks it. A part arriving instead
    /// counts as an ack with no wait. Returns the AP's requested wait, or
    /// `None` if it cancelled.
    fn request_block<T, C>(
        &mut self,
        link: &mut Link<T, C>,
        buffer: &mut BlockBuffer,
    ) -> Option<u16>
    where
        T: Transport,
        C: Clock,
    {
        link.enable_reception();
        let attempts = link.config().block_request_attempts;
        for attempt in 0..attempts {
            let message = if self.partial {
                Message::PartialBlockRequest(self.request)
            } else {
                Message::BlockRequest(self.request)
            };
            link.send_to_peer(&message);

            let window_ms = link.config().block_request_window(attempt);
            let request = &mut self.request;
            let accepted = &mut self.accepted;
            let reply = link.wait_for(window_ms, |inbound| match inbound.message {
                Message::BlockRequestAck(ack) => Some(Reply::Ack(ack.wait_ms)),
                Message::BlockPart(part) => {
                    if ingest_part(buffer, request, &part) {
                        *accepted += 1;
                    }
                    Some(Reply::Ack(0))
                }
                Message::CancelTransfer => Some(Reply::Cancel),
                _ => None,
            });

            match reply {
                Some(Reply::Ack(wait_ms)) => return Some(wait_ms),
                Some(Reply::Cancel) => {
                    info!("transfer: cancelled by AP");
                    return None;
                }
                None => {}
            }
        }

        debug!("transfer: no ack after {} requests, listening anyway", attempts);
        Some(0)
    }

    /// Listens for parts of the current block until the window closes or the
    /// block is complete.
    fn receive_parts<T, C>(&mut self, link: &mut Link<T, C>, buffer: &mut BlockBuffer)
    where
        T: Transport,
        C: Clock,
    {
        let config = *link.config();
        let window_ms = config.part_window_ms + config.part_window_guard_ms;
        let required = self.parts_this_block;
        let request = &mut self.request;
        let accepted = &mut self.accepted;

        link.set_reception(true, false);
        let _ = link.wait_for(window_ms, |inbound| {
            if let Message::BlockPart(part) = inbound.message
                && ingest_part(buffer, request, &part)
            {
                *accepted += 1;
                if request.parts.is_complete(required) {
                    return Some(());
                }
            }
            None
        });
        link.set_reception(false, true);
        link.flush_pending();
    }
}

/// Honors the AP's requested delay before parts start flowing. Short waits
/// keep the radio up; longer ones sleep and wake just before the parts.
fn await_parts<T, C>(link: &mut Link<T, C>, wait_ms: u16)
where
    T: Transport,
    C: Clock,
{
    let config = *link.config();
    if wait_ms == 0 {
        return;
    }
    if wait_ms < config.busy_wait_limit_ms {
        link.delay_ms(u32::from(wait_ms));
    } else {
        trace!("transfer: sleeping {} ms for the AP", wait_ms);
        link.sleep_ms(u32::from(wait_ms.saturating_sub(config.sleep_margin_ms)));
        link.enable_reception();
    }
}

/// Copies a part for the in-flight block and marks it received.
fn ingest_part(buffer: &mut BlockBuffer, request: &mut BlockRequest, part: &BlockPart) -> bool {
    if part.block_index != request.block_index {
        trace!(
            "transfer: part for block {} while on {}",
            part.block_index, request.block_index
        );
        return false;
    }
    let index = usize::from(part.part_index);
    if !buffer.store_part(index, &part.data) {
        trace!("transfer: part {} out of range", index);
        return false;
    }
    request.parts.clear(index);
    true
}

fn block_len(remaining: u32) -> usize {
    (remaining as usize).min(BLOCK_DATA_LEN)
}

/// Tells the peer the content is in place, retrying until it acks. Returns
/// whether an ack arrived.
pub fn send_transfer_complete<T, C>(link: &mut Link<T, C>) -> bool
where
    T: Transport,
    C: Clock,
{
    link.enable_reception();
    let attempts = link.config().completion_attempts;
    let window_ms = link.config().completion_window_ms;
    for _ in 0..attempts {
        link.send_to_peer(&Message::TransferComplete);
        let acked = link.wait_for(window_ms, |inbound| {
            matches!(inbound.message, Message::TransferCompleteAck).then_some(())
        });
        if acked.is_some() {
            return true;
        }
    }
    debug!("transfer: completion not acknowledged");
    false
}
