//! Reader group configuration.

use std::time::Duration;

use cutpoint_core::Limits;

use crate::error::{GroupError, GroupResult};

/// Configuration for a reader group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupConfig {
    /// Deadline for one checkpoint round.
    pub round_timeout: Duration,
    /// Upper bound on the round timeout accepted by `validate`.
    pub max_round_timeout: Duration,
    /// Attempts per named checkpoint before giving up.
    pub max_round_attempts: u32,
    /// How long an idle reader waits before re-polling its segments.
    pub reader_poll_interval: Duration,
    /// Coordinator command channel capacity.
    pub coordinator_channel_capacity: usize,
    /// Maximum readers in the group.
    pub max_readers: u32,
    /// Maximum named cuts retained by the cut store.
    pub max_cuts: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self::from_limits(&Limits::default())
    }
}

impl GroupConfig {
    /// Derives the group configuration from system limits.
    #[must_use]
    pub const fn from_limits(limits: &Limits) -> Self {
        Self {
            round_timeout: Duration::from_micros(limits.default_round_timeout_us),
            max_round_timeout: Duration::from_micros(limits.max_round_timeout_us),
            max_round_attempts: limits.max_round_attempts,
            reader_poll_interval: Duration::from_micros(limits.reader_poll_interval_us),
            coordinator_channel_capacity: limits.coordinator_channel_capacity as usize,
            max_readers: limits.max_readers_per_group,
            max_cuts: limits.max_cuts_per_group,
        }
    }

    /// Short timeouts and small bounds for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            round_timeout: Duration::from_secs(2),
            max_round_timeout: Duration::from_secs(10),
            max_round_attempts: 3,
            reader_poll_interval: Duration::from_millis(1),
            coordinator_channel_capacity: 64,
            max_readers: 16,
            max_cuts: 64,
        }
    }

    /// Sets the round timeout.
    #[must_use]
    pub const fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    /// Sets the number of attempts per named checkpoint.
    #[must_use]
    pub const fn with_max_round_attempts(mut self, attempts: u32) -> Self {
        self.max_round_attempts = attempts;
        self
    }

    /// Sets the reader poll interval.
    #[must_use]
    pub const fn with_reader_poll_interval(mut self, interval: Duration) -> Self {
        self.reader_poll_interval = interval;
        self
    }

    /// Sets the maximum number of readers.
    #[must_use]
    pub const fn with_max_readers(mut self, max: u32) -> Self {
        self.max_readers = max;
        self
    }

    /// Sets the maximum number of named cuts.
    #[must_use]
    pub const fn with_max_cuts(mut self, max: u32) -> Self {
        self.max_cuts = max;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any bound is zero or the timeouts are
    /// inconsistent.
    pub fn validate(&self) -> GroupResult<()> {
        let invalid = |message: &str| {
            Err(GroupError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.round_timeout.is_zero() {
            return invalid("round_timeout must be positive");
        }
        if self.round_timeout > self.max_round_timeout {
            return invalid("round_timeout must be <= max_round_timeout");
        }
        if self.max_round_attempts == 0 {
            return invalid("max_round_attempts must be positive");
        }
        if self.reader_poll_interval.is_zero() || self.reader_poll_interval >= self.round_timeout {
            return invalid("reader_poll_interval must be positive and < round_timeout");
        }
        if self.coordinator_channel_capacity == 0 {
            return invalid("coordinator_channel_capacity must be positive");
        }
        if self.max_readers == 0 {
            return invalid("max_readers must be positive");
        }
        if self.max_cuts == 0 {
            return invalid("max_cuts must be positive");
        }
        Ok(())
    }
}
