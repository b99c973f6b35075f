use esp_hal::{
    rtc_cntl::{Rtc, sleep::TimerWakeupSource},
    time::Instant,
};
use inkdrop_core::platform::Clock;

/// Microsecond system timer; sleeps go through RTC light sleep so RAM and
/// the protocol state survive.
pub struct SleepClock<'d> {
    rtc: Rtc<'d>,
}

impl<'d> SleepClock<'d> {
    pub fn new(rtc: Rtc<'d>) -> Self {
        Self { rtc }
    }
}

impl Clock for SleepClock<'_> {
    const TICKS_PER_MS: u64 = 1_000;

    fn now(&self) -> u64 {
        Instant::now().duration_since_epoch().as_micros()
    }

    fn sleep_ms(&mut self, ms: u32) {
        if ms == 0 {
            return;
        }
        let timer = TimerWakeupSource::new(core::time::Duration::from_millis(u64::from(ms)));
        self.rtc.sleep_light(&[&timer]);
    }
}
