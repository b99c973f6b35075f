use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};
use inkdrop_core::{
    cache::{SLOT_HEADER_LEN, SlotHeader},
    message::ContentType,
    platform::Renderer,
};
use log::{debug, info};

use crate::storage::raw::{RawFlash, RawFlashError};

const CMD_SW_RESET: u8 = 0x12;
const CMD_DATA_ENTRY: u8 = 0x11;
const CMD_RAM_X_COUNTER: u8 = 0x4E;
const CMD_RAM_Y_COUNTER: u8 = 0x4F;
const CMD_WRITE_BW_RAM: u8 = 0x24;
const CMD_UPDATE_CONTROL: u8 = 0x22;
const CMD_MASTER_ACTIVATE: u8 = 0x20;
const CMD_DEEP_SLEEP: u8 = 0x10;

const UPDATE_FULL: u8 = 0xF7;
const STREAM_CHUNK: usize = 256;
const BUSY_POLL_MS: u32 = 5;
const BUSY_TIMEOUT_MS: u32 = 20_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DisplayError<SpiErr, PinErr> {
    Spi(SpiErr),
    Pin(PinErr),
    Flash(RawFlashError),
    /// The slot at the given address holds no committed content.
    EmptySlot,
    /// Content type the panel cannot show directly.
    Unsupported(u8),
    BusyTimeout,
}

/// SPI e-paper controller with the usual command/data and busy lines.
///
/// Pixel data goes out as-is: one bit per pixel, rows packed MSB first.
#[derive(Debug)]
pub struct EpaperPanel<SPI, DC, RST, BUSY> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    frame_bytes: usize,
}

impl<SPI, DC, RST, BUSY, E> EpaperPanel<SPI, DC, RST, BUSY>
where
    SPI: SpiBus<u8>,
    DC: OutputPin<Error = E>,
    RST: OutputPin<Error = E>,
    BUSY: InputPin<Error = E>,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, width: u16, height: u16) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            frame_bytes: usize::from(width).div_ceil(8) * usize::from(height),
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn command(&mut self, command: u8, data: &[u8]) -> Result<(), DisplayError<SPI::Error, E>> {
        self.dc.set_low().map_err(DisplayError::Pin)?;
        self.spi.write(&[command]).map_err(DisplayError::Spi)?;
        self.spi.flush().map_err(DisplayError::Spi)?;
        if !data.is_empty() {
            self.data(data)?;
        }
        Ok(())
    }

    fn data(&mut self, data: &[u8]) -> Result<(), DisplayError<SPI::Error, E>> {
        self.dc.set_high().map_err(DisplayError::Pin)?;
        self.spi.write(data).map_err(DisplayError::Spi)?;
        self.spi.flush().map_err(DisplayError::Spi)
    }

    fn wait_idle<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), DisplayError<SPI::Error, E>> {
        let mut waited = 0;
        while self.busy.is_high().map_err(DisplayError::Pin)? {
            if waited >= BUSY_TIMEOUT_MS {
                return Err(DisplayError::BusyTimeout);
            }
            delay.delay_ms(BUSY_POLL_MS);
            waited += BUSY_POLL_MS;
        }
        Ok(())
    }

    /// Hardware then software reset, leaving RAM addressing at the origin.
    pub fn wake<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), DisplayError<SPI::Error, E>> {
        self.rst.set_low().map_err(DisplayError::Pin)?;
        delay.delay_ms(10);
        self.rst.set_high().map_err(DisplayError::Pin)?;
        delay.delay_ms(10);

        self.command(CMD_SW_RESET, &[])?;
        self.wait_idle(delay)?;
        self.command(CMD_DATA_ENTRY, &[0x03])?;
        self.command(CMD_RAM_X_COUNTER, &[0x00])?;
        self.command(CMD_RAM_Y_COUNTER, &[0x00, 0x00])
    }

    /// Streams `len` bytes from flash into panel RAM, padding with white.
    pub fn load_from_flash(
        &mut self,
        flash: &RawFlash,
        addr: u32,
        len: usize,
    ) -> Result<(), DisplayError<SPI::Error, E>> {
        self.command(CMD_WRITE_BW_RAM, &[])?;

        let mut chunk = [0u8; STREAM_CHUNK];
        let mut sent = 0usize;
        while sent < self.frame_bytes {
            let take = STREAM_CHUNK.min(self.frame_bytes - sent);
            let from_flash = take.min(len.saturating_sub(sent));
            flash
                .read_bytes(addr + sent as u32, &mut chunk[..from_flash])
                .map_err(DisplayError::Flash)?;
            chunk[from_flash..take].fill(0xFF);
            self.data(&chunk[..take])?;
            sent += take;
        }
        Ok(())
    }

    /// Full refresh, then deep sleep until the next [`EpaperPanel::wake`].
    pub fn refresh<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), DisplayError<SPI::Error, E>> {
        self.command(CMD_UPDATE_CONTROL, &[UPDATE_FULL])?;
        self.command(CMD_MASTER_ACTIVATE, &[])?;
        self.wait_idle(delay)?;
        self.command(CMD_DEEP_SLEEP, &[0x01])
    }
}

/// Draws cached slots straight from the content partition.
pub struct SlotRenderer<SPI, DC, RST, BUSY, D> {
    panel: EpaperPanel<SPI, DC, RST, BUSY>,
    delay: D,
    flash: RawFlash,
    base: u32,
}

impl<SPI, DC, RST, BUSY, D> SlotRenderer<SPI, DC, RST, BUSY, D> {
    /// `base` is the absolute address the cache's addresses are relative to.
    pub fn new(panel: EpaperPanel<SPI, DC, RST, BUSY>, delay: D, flash: RawFlash, base: u32) -> Self {
        Self {
            panel,
            delay,
            flash,
            base,
        }
    }
}

impl<SPI, DC, RST, BUSY, D, E> Renderer for SlotRenderer<SPI, DC, RST, BUSY, D>
where
    SPI: SpiBus<u8>,
    DC: OutputPin<Error = E>,
    RST: OutputPin<Error = E>,
    BUSY: InputPin<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    type Error = DisplayError<SPI::Error, E>;

    fn render(&mut self, address: u32) -> Result<(), Self::Error> {
        let slot = self.base + address;
        let mut raw = [0u8; SLOT_HEADER_LEN as usize];
        self.flash
            .read_bytes(slot, &mut raw)
            .map_err(DisplayError::Flash)?;
        let header = SlotHeader::parse(&raw).ok_or(DisplayError::EmptySlot)?;

        match ContentType::from_code(header.content_type) {
            Some(ContentType::Image | ContentType::RawImage) => {}
            _ => return Err(DisplayError::Unsupported(header.content_type)),
        }
        info!(
            "display: slot at {:#x}, v{:#x}, {} bytes",
            address, header.version, header.size
        );
        if header.size as usize > self.panel.frame_bytes() {
            debug!("display: clipping to {} bytes", self.panel.frame_bytes());
        }

        self.panel.wake(&mut self.delay)?;
        self.panel.load_from_flash(
            &self.flash,
            slot + SLOT_HEADER_LEN,
            header.size as usize,
        )?;
        self.panel.refresh(&mut self.delay)
    }
}
