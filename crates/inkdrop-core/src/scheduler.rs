//! Sleep-interval estimator driven by recent check-in effort.
//!
//! Each cycle records how many broadcast attempts the check-in needed. The
//! next interval interpolates linearly between the base and the maximum
//! interval for every sample and averages the window. When every sample hit
//! the cap the AP is assumed gone and the long no-signal interval is used.

use log::debug;

use crate::config::SchedulerConfig;

pub const HISTORY_LEN: usize = 8;

/// Ring of the last attempt counts, oldest overwritten first.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AttemptHistory {
    samples: [u8; HISTORY_LEN],
    cursor: usize,
}

impl AttemptHistory {
    pub fn push(&mut self, attempts: u8) {
        self.samples[self.cursor] = attempts;
        self.cursor = (self.cursor + 1) % HISTORY_LEN;
    }

    pub fn samples(&self) -> &[u8; HISTORY_LEN] {
        &self.samples
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PowerSaveScheduler {
    config: SchedulerConfig,
    history: AttemptHistory,
}

impl PowerSaveScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            history: AttemptHistory::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }

    pub fn record_attempts(&mut self, attempts: u8) {
        self.history.push(attempts.min(self.config.attempt_cap));
    }

    /// Interval for a single sample, in seconds.
    pub fn interval_for(&self, attempts: u8) -> u32 {
        let cap = u32::from(self.config.attempt_cap.max(1));
        let attempts = u32::from(attempts).min(cap);
        let base = self.config.base_interval_s;
        let span = self.config.max_attempts_interval_s.saturating_sub(base);
        base + span * attempts / cap
    }

    /// Seconds to sleep before the next check-in.
    pub fn next_interval(&self) -> u32 {
        let samples = self.history.samples();
        if samples.iter().all(|n| *n >= self.config.attempt_cap) {
            debug!("scheduler: no signal in last {} cycles", HISTORY_LEN);
            return self.config.no_signal_interval_s;
        }
        let total: u32 = samples.iter().map(|n| self.interval_for(*n)).sum();
        total / HISTORY_LEN as u32
    }
}
