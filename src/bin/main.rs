#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    interrupt::software::SoftwareInterruptControl,
    rtc_cntl::{Rtc, reset_reason, wakeup_cause},
    spi::master::Spi,
    system::Cpu,
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_radio::ieee802154::Ieee802154;
use inkdrop_core::{
    config::{DeviceInfo, PROTOCOL_PAN_ID, StorageLayout, TagConfig},
    tag::Tag,
};
use inkdrop_hal_esp32c6::{
    platform::{
        clock::SleepClock,
        display::{EpaperPanel, SlotRenderer},
        telemetry::BoardTelemetry,
        update::OtaInstaller,
    },
    radio::{RadioConfig, RadioTransport},
    storage::{partition::PartitionFlash, raw::RawFlash},
};
use log::{LevelFilter, info, warn};

#[path = "main/identity.rs"]
mod identity;
#[path = "main/power.rs"]
mod power;

const RADIO_CHANNEL: u8 = 11;
const HARDWARE_TYPE: u8 = 0x21;

const PANEL_WIDTH: u16 = 128;
const PANEL_HEIGHT: u16 = 296;
const PANEL_SPI_HZ: u32 = 4_000_000;

const UPDATE_AREA_LEN: u32 = 0x10_0000;
const IMAGE_SLOT_LEN: u32 = 0x1_0000;
/// Staging area plus at least two image slots.
const CONTENT_PARTITION_MIN: u32 = UPDATE_AREA_LEN + 2 * IMAGE_SLOT_LEN;

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: inkdrop starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    info!(
        "boot reset_reason={:?} wakeup_cause={:?}",
        reset_reason(Cpu::ProCpu),
        wakeup_cause()
    );

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    let own = identity::extended_address();

    let content = match PartitionFlash::locate(CONTENT_PARTITION_MIN) {
        Ok(flash) => flash,
        Err(err) => {
            warn!("storage: {:?}", err);
            power::halt();
        }
    };
    let raw_flash = match RawFlash::new() {
        Ok(flash) => flash,
        Err(err) => {
            warn!("storage: {:?}", err);
            power::halt();
        }
    };
    let content_base = content.base();

    // Panel wiring: SCK=GPIO6 MOSI=GPIO7 CS=GPIO10 DC=GPIO5 RST=GPIO4 BUSY=GPIO3
    let spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(PANEL_SPI_HZ))
        .with_mode(esp_hal::spi::Mode::_0);
    let spi = match Spi::new(peripherals.SPI2, spi_config) {
        Ok(spi) => spi
            .with_sck(peripherals.GPIO6)
            .with_mosi(peripherals.GPIO7)
            .with_cs(peripherals.GPIO10),
        Err(err) => {
            warn!("display: spi config rejected: {:?}", err);
            power::halt();
        }
    };
    let dc = Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let busy = Input::new(peripherals.GPIO3, InputConfig::default());
    let panel = EpaperPanel::new(spi, dc, rst, busy, PANEL_WIDTH, PANEL_HEIGHT);
    let renderer = SlotRenderer::new(panel, Delay::new(), raw_flash, content_base);
    let updater = OtaInstaller::new(raw_flash, content_base);

    // BOOT button doubles as the user button.
    let button = Input::new(
        peripherals.GPIO9,
        InputConfig::default().with_pull(Pull::Up),
    );
    let mut telemetry = BoardTelemetry::new(button);

    let radio = RadioTransport::new(
        Ieee802154::new(peripherals.IEEE802154),
        own,
        RadioConfig::new(RADIO_CHANNEL, PROTOCOL_PAN_ID),
    );
    let clock = SleepClock::new(Rtc::new(peripherals.LPWR));

    let tag_config = TagConfig::default()
        .with_device(DeviceInfo::default().with_hardware_type(HARDWARE_TYPE))
        .with_storage(
            StorageLayout::default()
                .with_update_area(0, UPDATE_AREA_LEN)
                .with_image_start(UPDATE_AREA_LEN)
                .with_slot_len(IMAGE_SLOT_LEN),
        );

    let mut tag = match Tag::boot(own, radio, clock, content, renderer, updater, tag_config) {
        Ok(tag) => tag,
        Err(err) => {
            warn!("boot: {:?}", err);
            power::halt();
        }
    };

    if !tag.show_default() {
        info!("boot: nothing cached yet");
    }
    esp_println::println!("boot: entering check-in loop");
    tag.run(&mut telemetry)
}
