//! Collaborators the core drives but does not implement.
//!
//! Storage is not listed here: the cache works on any
//! [`embedded_storage::nor_flash::NorFlash`].

/// Half-duplex 802.15.4 radio.
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Queues one frame (without FCS) for transmission.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Copies the next received frame (without FCS) into `buf`. Returns its
    /// length, or 0 when nothing is waiting.
    fn try_receive(&mut self, buf: &mut [u8]) -> usize;

    /// Turns the receiver on or off, optionally discarding queued frames.
    fn set_reception(&mut self, enabled: bool, flush: bool);

    fn flush_pending(&mut self);

    /// Cheap check the core uses before polling `try_receive`.
    fn rx_pending(&self) -> bool {
        true
    }

    /// Link quality of the last received frame; 0 if unknown.
    fn last_lqi(&self) -> u8 {
        0
    }

    /// Signal strength of the last received frame in dBm; 0 if unknown.
    fn last_rssi(&self) -> i8 {
        0
    }

    /// Brings the radio back after [`Transport::power_down`].
    fn reinitialize(&mut self) {}

    fn power_down(&mut self) {
        self.set_reception(false, true);
    }
}

/// Monotonic tick source that can also suspend the whole system.
pub trait Clock {
    const TICKS_PER_MS: u64;

    fn now(&self) -> u64;

    /// Low-power sleep. The radio is expected to be powered down already.
    fn sleep_ms(&mut self, ms: u32);
}

/// Display pipeline. Content is handed over by its storage address.
pub trait Renderer {
    type Error: core::fmt::Debug;

    fn render(&mut self, address: u32) -> Result<(), Self::Error>;
}

/// Applies a staged firmware image.
pub trait FirmwareUpdater {
    type Error: core::fmt::Debug;

    fn apply(&mut self, address: u32, len: u32) -> Result<(), Self::Error>;
}

/// Sensor readings reported at check-in. 0 means "not reported".
pub trait Telemetry {
    fn battery_mv(&mut self) -> u16 {
        0
    }

    fn temperature(&mut self) -> u8 {
        0
    }

    /// Returns and clears the button-pressed latch.
    fn take_button_press(&mut self) -> bool {
        false
    }
}
