use esp_hal::{peripherals::LPWR, rtc_cntl::Rtc};
use log::warn;

/// Powers down for good after a fatal boot error. Only a reset brings the
/// tag back.
pub(super) fn halt() -> ! {
    warn!("power: halting");
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    rtc.sleep_deep(&[]);
}
