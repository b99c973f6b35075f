//! Wake/sleep control loop tying the handshake, the cache and the transfer
//! engine together.

use embedded_storage::nor_flash::NorFlash;
use log::{info, warn};

use crate::{
    block::BlockBuffer,
    cache::{CacheError, ContentCache, ImageSink, SlotId, UpdateSink},
    checkin,
    config::{DeviceInfo, TagConfig},
    frame::ExtAddr,
    link::Link,
    message::{AvailabilityResponse, ContentType},
    platform::{Clock, FirmwareUpdater, Renderer, Telemetry, Transport},
    scheduler::PowerSaveScheduler,
    transfer::{self, BlockTransfer},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootError<E> {
    /// The device address is missing or blank.
    Identity,
    Storage(CacheError<E>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    NoResponse,
    NoUpdate,
    /// The advertised version is the one on screen.
    AlreadyDisplayed,
    CacheHit(SlotId),
    Downloaded { blocks: u16 },
    TransferFailed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub sleep_ms: u32,
    /// AP hint that set `sleep_ms`, if one was honored.
    pub hint_minutes: Option<u16>,
}

pub struct Tag<T, C, F, R, U> {
    link: Link<T, C>,
    cache: ContentCache<F>,
    renderer: R,
    updater: U,
    scheduler: PowerSaveScheduler,
    device: DeviceInfo,
    block: BlockBuffer,
    displayed: Option<u64>,
    current_slot: Option<SlotId>,
}

impl<T, C, F, R, U> Tag<T, C, F, R, U>
where
    T: Transport,
    C: Clock,
    F: NorFlash,
    R: Renderer,
    U: FirmwareUpdater,
{
    pub fn boot(
        identity: ExtAddr,
        transport: T,
        clock: C,
        flash: F,
        renderer: R,
        updater: U,
        config: TagConfig,
    ) -> Result<Self, BootError<F::Error>> {
        if identity.iter().all(|b| *b == 0) || identity.iter().all(|b| *b == 0xFF) {
            warn!("tag: no usable device address");
            return Err(BootError::Identity);
        }
        info!(
            "tag: address {:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            identity[0],
            identity[1],
            identity[2],
            identity[3],
            identity[4],
            identity[5],
            identity[6],
            identity[7]
        );

        let mut cache = ContentCache::open(flash, config.storage).map_err(BootError::Storage)?;
        let current_slot = cache.scan_highest().map_err(BootError::Storage)?;
        info!("tag: {} image slots", cache.slot_count());

        Ok(Self {
            link: Link::new(transport, clock, identity, config.protocol),
            cache,
            renderer,
            updater,
            scheduler: PowerSaveScheduler::new(config.scheduler),
            device: config.device,
            block: BlockBuffer::new(),
            displayed: None,
            current_slot,
        })
    }

    pub fn link(&self) -> &Link<T, C> {
        &self.link
    }

    pub fn cache(&self) -> &ContentCache<F> {
        &self.cache
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    pub fn scheduler(&self) -> &PowerSaveScheduler {
        &self.scheduler
    }

    pub fn current_slot(&self) -> Option<SlotId> {
        self.current_slot
    }

    /// Version of the last completed transfer.
    pub fn displayed_version(&self) -> Option<u64> {
        self.displayed
    }

    /// Draws the newest cached image, if there is one.
    pub fn show_default(&mut self) -> bool {
        match self.current_slot {
            Some(slot) => self.render(slot),
            None => false,
        }
    }

    /// One wake period: check in, fetch whatever is new, and work out how
    /// long to sleep. The radio is off when this returns.
    pub fn run_cycle<S: Telemetry>(&mut self, telemetry: &mut S) -> CycleReport {
        self.link.enable_reception();
        let response = checkin::query_availability(
            &mut self.link,
            &self.device,
            telemetry,
            &mut self.scheduler,
        );

        let (outcome, hint_minutes) = match response {
            None => (CycleOutcome::NoResponse, None),
            Some(response) => {
                let outcome = self.fetch(&response);
                let hint = match outcome {
                    CycleOutcome::TransferFailed => None,
                    _ => response.check_in_hint(),
                };
                (outcome, hint)
            }
        };
        self.link.power_down();

        let sleep_ms = match hint_minutes {
            Some(minutes) => u32::from(minutes) * 60_000,
            None => self.scheduler.next_interval() * 1_000,
        };
        info!("tag: {:?}, sleeping {} ms", outcome, sleep_ms);
        CycleReport {
            outcome,
            sleep_ms,
            hint_minutes,
        }
    }

    /// Cycles forever, sleeping with the radio off between check-ins.
    pub fn run<S: Telemetry>(&mut self, telemetry: &mut S) -> ! {
        loop {
            let report = self.run_cycle(telemetry);
            self.link.sleep_ms(report.sleep_ms);
        }
    }

    fn fetch(&mut self, response: &AvailabilityResponse) -> CycleOutcome {
        match response.content_type {
            ContentType::NoUpdate => CycleOutcome::NoUpdate,
            ContentType::Image | ContentType::RawImage => self.fetch_image(response),
            ContentType::FirmwareUpdate => self.fetch_update(response),
        }
    }

    fn fetch_image(&mut self, response: &AvailabilityResponse) -> CycleOutcome {
        if self.displayed == Some(response.version) {
            info!("tag: v{:#x} already on screen", response.version);
            transfer::send_transfer_complete(&mut self.link);
            return CycleOutcome::AlreadyDisplayed;
        }

        match self.cache.find_slot(response.version) {
            Ok(Some(slot)) => {
                info!("tag: v{:#x} cached in slot {}", response.version, slot.0);
                transfer::send_transfer_complete(&mut self.link);
                self.link.power_down();
                self.displayed = Some(response.version);
                self.current_slot = Some(slot);
                self.render(slot);
                return CycleOutcome::CacheHit(slot);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("tag: slot lookup failed: {:?}", err);
                return CycleOutcome::TransferFailed;
            }
        }

        if response.size > self.cache.slot_capacity() {
            warn!(
                "tag: {} bytes does not fit a {} byte slot",
                response.size,
                self.cache.slot_capacity()
            );
            return CycleOutcome::TransferFailed;
        }
        let slot = match self.cache.allocate_slot() {
            Ok(slot) => slot,
            Err(err) => {
                warn!("tag: cannot prepare a slot: {:?}", err);
                return CycleOutcome::TransferFailed;
            }
        };
        if self.current_slot == Some(slot) {
            self.current_slot = None;
        }
        self.displayed = None;

        let mut sink = ImageSink::new(&mut self.cache, slot);
        let result =
            BlockTransfer::new(*response).run(&mut self.link, &mut self.block, &mut sink);
        match result {
            Ok(report) => {
                self.link.power_down();
                self.displayed = Some(response.version);
                self.current_slot = Some(slot);
                self.render(slot);
                CycleOutcome::Downloaded {
                    blocks: report.blocks,
                }
            }
            Err(err) => {
                warn!("tag: image transfer failed: {:?}", err);
                CycleOutcome::TransferFailed
            }
        }
    }

    fn fetch_update(&mut self, response: &AvailabilityResponse) -> CycleOutcome {
        if response.size > self.cache.update_capacity() {
            warn!(
                "tag: firmware of {} bytes exceeds the {} byte staging area",
                response.size,
                self.cache.update_capacity()
            );
            return CycleOutcome::TransferFailed;
        }
        if let Err(err) = self.cache.erase_update_area() {
            warn!("tag: cannot erase staging area: {:?}", err);
            return CycleOutcome::TransferFailed;
        }

        let mut sink = UpdateSink::new(&mut self.cache);
        let result =
            BlockTransfer::new(*response).run(&mut self.link, &mut self.block, &mut sink);
        match result {
            Ok(report) => {
                self.link.power_down();
                info!("tag: applying firmware v{:#x}", response.version);
                if let Err(err) = self
                    .updater
                    .apply(self.cache.update_address(), response.size)
                {
                    warn!("tag: firmware update failed: {:?}", err);
                }
                CycleOutcome::Downloaded {
                    blocks: report.blocks,
                }
            }
            Err(err) => {
                warn!("tag: firmware transfer failed: {:?}", err);
                CycleOutcome::TransferFailed
            }
        }
    }

    fn render(&mut self, slot: SlotId) -> bool {
        let address = match self.cache.slot_address(slot) {
            Ok(address) => address,
            Err(err) => {
                warn!("tag: no address for slot {}: {:?}", slot.0, err);
                return false;
            }
        };
        match self.renderer.render(address) {
            Ok(()) => true,
            Err(err) => {
                warn!("tag: render of slot {} failed: {:?}", slot.0, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
