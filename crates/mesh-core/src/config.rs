//! Process-wide configuration knobs named throughout spec.md §4 and §6.
//! No CLI surface is in scope for the core (§6); these are plain structs
//! the embedding process constructs and passes down, with `Default` impls
//! carrying the literal defaults called out in the spec.

use std::time::Duration;

/// Scheduler pacing knobs (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub slot_duration: Duration,
    pub min_slot_pace: u64,
    pub work_slot_percentage: f64,
    pub slot_change_rate_per_streak: f64,
    pub stat_cycle: Duration,
}

impl SchedulerConfig {
    /// Defaults tuned for a server role, per spec.md's "100 for servers".
    pub fn server_default() -> Self {
        Self {
            slot_duration: Duration::from_millis(10),
            min_slot_pace: 100,
            work_slot_percentage: 0.7,
            slot_change_rate_per_streak: 0.05,
            stat_cycle: Duration::from_secs(60),
        }
    }

    /// Defaults tuned for a client role, per spec.md's "10 for clients".
    pub fn client_default() -> Self {
        Self {
            min_slot_pace: 10,
            ..Self::server_default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::server_default()
    }
}

/// Abandon/idle knobs that differ between client and public-server roles
/// (spec.md §4.3, §4.9 ("Cooperative shutdown is bounded")).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleTimeouts {
    /// Bound on draining a Terminal's active operations during abandon.
    pub abandon_drain_timeout: Duration,
    /// Bound on flushing the send queue during abandon, step 6 of the
    /// abandon protocol.
    pub flush_timeout: Duration,
    /// Idle timeout that triggers `NoActivity` abandon.
    pub idle_timeout: Duration,
}

impl RoleTimeouts {
    pub const fn client() -> Self {
        Self {
            abandon_drain_timeout: Duration::from_secs(15),
            flush_timeout: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(15 * 60),
        }
    }

    pub const fn public_server() -> Self {
        Self {
            abandon_drain_timeout: Duration::from_secs(5 * 60),
            flush_timeout: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// DFQ queue sizing and the space-report threshold (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowControlConfig {
    pub queue_size: u32,
    /// Fraction of `queue_size` below which `reported_space` forces an
    /// unsolicited credit report (spec.md: "drops below 75% of Q").
    pub report_threshold: f64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            queue_size: 64,
            report_threshold: 0.75,
        }
    }
}

/// Terminal send-loop batching knobs (spec.md §4.3 "Send loop").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchingConfig {
    pub coalesce_threshold_bytes: usize,
    pub coalesce_max_wait: Duration,
    pub coalesce_cap_bytes: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            coalesce_threshold_bytes: 100,
            coalesce_max_wait: Duration::from_millis(20),
            coalesce_cap_bytes: 4000,
        }
    }
}
