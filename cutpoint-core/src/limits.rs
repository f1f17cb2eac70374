//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! Every queue, map and retry loop has an explicit maximum size.

/// System-wide limits for cutpoint.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Log layout limits.
    /// Maximum number of segments in a single log.
    pub max_segments_per_log: u32,
    /// Maximum size of a single record payload in bytes.
    pub max_record_bytes: u32,

    // Reader group limits.
    /// Maximum number of readers in a group.
    pub max_readers_per_group: u32,
    /// Maximum number of named cuts retained per group.
    pub max_cuts_per_group: u32,
    /// Maximum number of attempts for one named checkpoint.
    pub max_round_attempts: u32,
    /// Capacity of the coordinator command channel.
    pub coordinator_channel_capacity: u32,

    // Timeout limits (in microseconds).
    /// Default deadline for a checkpoint round.
    pub default_round_timeout_us: u64,
    /// Maximum allowed deadline for a checkpoint round.
    pub max_round_timeout_us: u64,
    /// Interval at which an idle reader re-polls its segments.
    pub reader_poll_interval_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Layout: 1024 segments, 1MB records.
            max_segments_per_log: 1024,
            max_record_bytes: 1024 * 1024,

            // Groups: 256 readers, 1024 named cuts, 5 attempts.
            max_readers_per_group: 256,
            max_cuts_per_group: 1024,
            max_round_attempts: 5,
            coordinator_channel_capacity: 4096,

            // Timeouts: 30s round, 10min max, 10ms poll.
            default_round_timeout_us: 30 * 1_000_000,
            max_round_timeout_us: 10 * 60 * 1_000_000,
            reader_poll_interval_us: 10 * 1000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_segments_per_log == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_segments_per_log",
                reason: "must be positive",
            });
        }

        if self.max_readers_per_group == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_readers_per_group",
                reason: "must be positive",
            });
        }

        if self.max_round_attempts == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_round_attempts",
                reason: "must be positive",
            });
        }

        if self.coordinator_channel_capacity == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "coordinator_channel_capacity",
                reason: "must be positive",
            });
        }

        if self.default_round_timeout_us > self.max_round_timeout_us {
            return Err(crate::Error::InvalidArgument {
                name: "default_round_timeout_us",
                reason: "must be <= max_round_timeout_us",
            });
        }

        // A reader must poll several times within one round deadline.
        if self.reader_poll_interval_us >= self.default_round_timeout_us {
            return Err(crate::Error::InvalidArgument {
                name: "reader_poll_interval_us",
                reason: "must be < default_round_timeout_us",
            });
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
