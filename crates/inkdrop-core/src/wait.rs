//! Deadline-bounded polling over the monotonic clock.

use crate::platform::Clock;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deadline {
    at: u64,
}

impl Deadline {
    pub fn after_ms<C: Clock>(clock: &C, ms: u32) -> Self {
        Self {
            at: clock
                .now()
                .saturating_add(u64::from(ms).saturating_mul(C::TICKS_PER_MS)),
        }
    }

    pub fn has_passed<C: Clock>(&self, clock: &C) -> bool {
        clock.now() >= self.at
    }
}

/// Calls `poll` until it yields a value or `deadline` passes.
pub fn wait_until<C, R>(
    clock: &C,
    deadline: Deadline,
    mut poll: impl FnMut() -> Option<R>,
) -> Option<R>
where
    C: Clock,
{
    while !deadline.has_passed(clock) {
        if let Some(value) = poll() {
            return Some(value);
        }
    }
    None
}

/// Busy-waits for `ms` with the radio left as it is.
pub fn busy_wait_ms<C: Clock>(clock: &C, ms: u32) {
    let deadline = Deadline::after_ms(clock, ms);
    let _: Option<()> = wait_until(clock, deadline, || None);
}
