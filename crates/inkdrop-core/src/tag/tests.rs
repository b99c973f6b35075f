use super::*;
use crate::{
    cache::{SLOT_VALID_MARKER, SlotHeader},
    config::StorageLayout,
    message::Message,
    sim::{
        FixedTelemetry, RamFlash, RecordingRenderer, RecordingUpdater, SimAp, SimClock, TAG_ADDR,
        content,
    },
};

type SimTag = Tag<SimAp, SimClock, RamFlash, RecordingRenderer, RecordingUpdater>;

const FLASH_LEN: usize = 0x8000;
const SLOT_LEN: u32 = 0x2000;

fn config() -> TagConfig {
    TagConfig::default().with_storage(
        StorageLayout::default()
            .with_update_area(0, 0x2000)
            .with_image_start(0x2000)
            .with_slot_len(SLOT_LEN),
    )
}

fn boot_with(ap: SimAp, flash: RamFlash) -> SimTag {
    Tag::boot(
        TAG_ADDR,
        ap,
        SimClock::new(),
        flash,
        RecordingRenderer::default(),
        RecordingUpdater::default(),
        config(),
    )
    .unwrap()
}

fn boot(ap: SimAp) -> SimTag {
    boot_with(ap, RamFlash::new(FLASH_LEN))
}

fn offer(content_type: ContentType, size: u32, hint: u16) -> AvailabilityResponse {
    AvailabilityResponse {
        version: 0xC0FF_EE00_0000_0001,
        size,
        content_type,
        next_check_in_minutes: hint,
    }
}

fn serving(content_type: ContentType, size: u32, hint: u16) -> SimAp {
    SimAp::new().with_offer(offer(content_type, size, hint), content(size as usize))
}

/// Flash with `version` already committed to slot 2.
fn flash_with_cached(version: u64) -> RamFlash {
    let mut cache = ContentCache::open(RamFlash::new(FLASH_LEN), config().storage).unwrap();
    let header = SlotHeader {
        version,
        size: 10,
        id: 1,
        content_type: ContentType::Image.code(),
    };
    cache.commit(SlotId(2), &header).unwrap();
    RamFlash::with_contents(cache.flash().bytes().to_vec())
}

fn block_requests(tag: &SimTag) -> usize {
    tag.link().transport().block_requests().len()
}

fn completions(tag: &SimTag) -> usize {
    tag.link()
        .transport()
        .count_sent(|message| matches!(message, Message::TransferComplete))
}

#[test]
fn blank_identity_is_fatal() {
    for identity in [[0u8; 8], [0xFF; 8]] {
        let result = Tag::boot(
            identity,
            SimAp::new(),
            SimClock::new(),
            RamFlash::new(FLASH_LEN),
            RecordingRenderer::default(),
            RecordingUpdater::default(),
            config(),
        );
        assert!(matches!(result, Err(BootError::Identity)));
    }
}

#[test]
fn undersized_storage_is_fatal() {
    let result = Tag::boot(
        TAG_ADDR,
        SimAp::new(),
        SimClock::new(),
        RamFlash::new(0x3000),
        RecordingRenderer::default(),
        RecordingUpdater::default(),
        config(),
    );
    assert!(matches!(
        result,
        Err(BootError::Storage(CacheError::StorageTooSmall))
    ));
}

#[test]
fn no_update_sleeps_for_the_scheduler_interval() {
    let mut tag = boot(serving(ContentType::NoUpdate, 0, 0));
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::NoUpdate);
    assert_eq!(report.hint_minutes, None);
    assert_eq!(report.sleep_ms, 40_000);
    assert_eq!(block_requests(&tag), 0);
}

#[test]
fn silent_ap_backs_off() {
    let mut tag = boot(SimAp::new());
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::NoResponse);
    // one sample at the cap, seven at zero attempts
    assert_eq!(report.sleep_ms, (600 + 7 * 40) / 8 * 1_000);
    assert!(tag.link().transport().power_downs() >= 1);
}

#[test]
fn new_image_is_downloaded_cached_and_drawn() {
    let mut tag = boot(serving(ContentType::Image, 5_000, 15));
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::Downloaded { blocks: 2 });
    assert_eq!(report.hint_minutes, Some(15));
    assert_eq!(report.sleep_ms, 15 * 60_000);
    assert_eq!(completions(&tag), 1);
    assert_eq!(tag.current_slot(), Some(SlotId(0)));
    assert_eq!(tag.renderer().rendered, [0x2000]);

    let bytes = tag.cache().flash().bytes();
    let marker = u32::from_le_bytes([bytes[0x2018], bytes[0x2019], bytes[0x201A], bytes[0x201B]]);
    assert_eq!(marker, SLOT_VALID_MARKER);
    assert_eq!(&bytes[0x2020..0x2020 + 5_000], &content(5_000)[..]);
}

#[test]
fn displayed_version_is_only_acknowledged() {
    let mut tag = boot(serving(ContentType::Image, 5_000, 0));
    tag.run_cycle(&mut FixedTelemetry::default());
    let requests = block_requests(&tag);

    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::AlreadyDisplayed);
    assert_eq!(block_requests(&tag), requests);
    assert_eq!(completions(&tag), 2);
    assert_eq!(tag.renderer().rendered.len(), 1);
}

#[test]
fn cached_version_is_drawn_without_download() {
    let version = offer(ContentType::Image, 10, 0).version;
    let mut tag = boot_with(
        serving(ContentType::Image, 10, 0),
        flash_with_cached(version),
    );

    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::CacheHit(SlotId(2)));
    assert_eq!(block_requests(&tag), 0);
    assert_eq!(completions(&tag), 1);
    assert_eq!(tag.renderer().rendered, [0x6000]);
    assert_eq!(tag.displayed_version(), Some(version));
}

#[test]
fn cold_boot_shows_newest_cached_image() {
    let mut tag = boot_with(SimAp::new(), flash_with_cached(7));
    assert_eq!(tag.current_slot(), Some(SlotId(2)));
    assert!(tag.show_default());
    assert_eq!(tag.renderer().rendered, [0x6000]);

    let mut empty = boot(SimAp::new());
    assert!(!empty.show_default());
    assert!(empty.renderer().rendered.is_empty());
}

#[test]
fn failed_transfer_ignores_the_ap_hint() {
    let mut tag = boot(serving(ContentType::Image, 5_000, 15).with_cancel());
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::TransferFailed);
    assert_eq!(report.hint_minutes, None);
    assert_eq!(report.sleep_ms, 40_000);
    assert_eq!(completions(&tag), 0);
    assert!(tag.renderer().rendered.is_empty());
    assert_eq!(tag.cache().flash().bytes()[0x2018], 0xFF);
}

#[test]
fn firmware_is_staged_then_applied() {
    let mut tag = boot(serving(ContentType::FirmwareUpdate, 5_000, 0));
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::Downloaded { blocks: 2 });
    assert_eq!(tag.updater().applied, [(0, 5_000)]);
    assert!(tag.cache().flash().erases().contains(&(0, 0x2000)));
    assert_eq!(&tag.cache().flash().bytes()[..5_000], &content(5_000)[..]);
    assert!(tag.renderer().rendered.is_empty());
}

#[test]
fn image_larger_than_a_slot_is_refused() {
    let mut tag = boot(serving(ContentType::Image, 9_000, 0));
    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::TransferFailed);
    assert_eq!(block_requests(&tag), 0);
}

#[test]
fn storage_failure_leaves_no_valid_slot() {
    let mut tag = boot(serving(ContentType::Image, 500, 0));
    tag.cache.flash_mut().set_fail_writes(true);

    let report = tag.run_cycle(&mut FixedTelemetry::default());

    assert_eq!(report.outcome, CycleOutcome::TransferFailed);
    assert_eq!(completions(&tag), 0);
    tag.cache.flash_mut().set_fail_writes(false);
    assert_eq!(tag.cache.find_slot(0xC0FF_EE00_0000_0001), Ok(None));
}
