//! Tunables for the link protocol, the scheduler and the storage layout.

/// PAN id every tag and AP uses.
pub const PROTOCOL_PAN_ID: u16 = 0x4447;

/// Retry counts and receive windows of the radio protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProtocolConfig {
    pub pan_id: u16,
    pub checkin_attempts: u8,
    pub checkin_window_ms: u32,
    pub block_request_attempts: u8,
    /// Base window after a block request; grows by 1 ms every 10 attempts.
    pub block_request_window_ms: u32,
    pub part_window_ms: u32,
    pub part_window_guard_ms: u32,
    /// Ack waits shorter than this are spent busy-waiting with the radio up.
    pub busy_wait_limit_ms: u16,
    /// Subtracted from a long ack wait so the radio is back before parts arrive.
    pub sleep_margin_ms: u16,
    pub max_empty_windows: u8,
    pub max_validation_failures: u8,
    pub completion_attempts: u8,
    pub completion_window_ms: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            pan_id: PROTOCOL_PAN_ID,
            checkin_attempts: 14,
            checkin_window_ms: 5,
            block_request_attempts: 30,
            block_request_window_ms: 7,
            part_window_ms: 270,
            part_window_guard_ms: 20,
            busy_wait_limit_ms: 35,
            sleep_margin_ms: 10,
            max_empty_windows: 5,
            max_validation_failures: 5,
            completion_attempts: 8,
            completion_window_ms: 6,
        }
    }
}

impl ProtocolConfig {
    pub const fn with_pan_id(mut self, pan_id: u16) -> Self {
        self.pan_id = pan_id;
        self
    }

    pub const fn with_checkin_attempts(mut self, attempts: u8) -> Self {
        self.checkin_attempts = attempts;
        self
    }

    pub const fn with_block_request_attempts(mut self, attempts: u8) -> Self {
        self.block_request_attempts = attempts;
        self
    }

    /// Receive window for request attempt `attempt` (zero-based).
    pub const fn block_request_window(&self, attempt: u8) -> u32 {
        self.block_request_window_ms + attempt as u32 / 10
    }
}

/// Sleep estimator bounds, in seconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    pub base_interval_s: u32,
    pub max_attempts_interval_s: u32,
    pub no_signal_interval_s: u32,
    /// Attempt count that maps to `max_attempts_interval_s`.
    pub attempt_cap: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_s: 40,
            max_attempts_interval_s: 600,
            no_signal_interval_s: 1800,
            attempt_cap: 14,
        }
    }
}

impl SchedulerConfig {
    pub const fn with_attempt_cap(mut self, attempt_cap: u8) -> Self {
        self.attempt_cap = attempt_cap;
        self
    }
}

/// Versions reported at check-in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub firmware_version: u8,
    pub hardware_type: u8,
    pub protocol_version: u8,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            firmware_version: 1,
            hardware_type: 0,
            protocol_version: 0,
        }
    }
}

impl DeviceInfo {
    pub const fn with_hardware_type(mut self, hardware_type: u8) -> Self {
        self.hardware_type = hardware_type;
        self
    }
}

/// Where the update staging area and the image slots live, as byte offsets
/// into the storage device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageLayout {
    pub update_start: u32,
    pub update_len: u32,
    pub image_start: u32,
    pub slot_len: u32,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            update_start: 0,
            update_len: 0x1_0000,
            image_start: 0x1_0000,
            slot_len: 0x1_0000,
        }
    }
}

impl StorageLayout {
    pub const fn with_slot_len(mut self, slot_len: u32) -> Self {
        self.slot_len = slot_len;
        self
    }

    pub const fn with_update_area(mut self, start: u32, len: u32) -> Self {
        self.update_start = start;
        self.update_len = len;
        self
    }

    pub const fn with_image_start(mut self, image_start: u32) -> Self {
        self.image_start = image_start;
        self
    }
}

/// Everything [`crate::tag::Tag::boot`] needs besides its collaborators.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TagConfig {
    pub protocol: ProtocolConfig,
    pub scheduler: SchedulerConfig,
    pub device: DeviceInfo,
    pub storage: StorageLayout,
}

impl TagConfig {
    pub const fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub const fn with_storage(mut self, storage: StorageLayout) -> Self {
        self.storage = storage;
        self
    }

    pub const fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }
}
