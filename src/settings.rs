//! Martinet dispatcher settings
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_RATE_PER_SECOND: u32 = 25;
pub const DEFAULT_RATE_PER_SECOND_STR: &str = "25";

/// Upper bound on the number of tasks allowed to wait in the queue.
///
/// `Unbounded` preserves the classic behavior: a caller that enqueues faster
/// than the drain rate simply grows the queue. `Bounded` sets a watermark;
/// what happens past it is decided by [`OverflowPolicy`]. A zero bound is
/// treated as a bound of one, since a queue nothing can ever enter would
/// make every enqueue unserviceable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum QueueCapacity {
    Unbounded,
    Bounded(usize),
}

impl QueueCapacity {
    /// Effective waiting-slot count, `None` for unbounded.
    pub fn bound(&self) -> Option<usize> {
        match self {
            QueueCapacity::Unbounded => None,
            QueueCapacity::Bounded(limit) => Some((*limit).max(1)),
        }
    }
}

impl Default for QueueCapacity {
    fn default() -> Self {
        QueueCapacity::Unbounded
    }
}

/// What `enqueue` does when a bounded queue is at capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum OverflowPolicy {
    /// Settle the ticket immediately with `DispatchError::QueueFull`.
    #[default]
    Reject,
    /// Suspend the `enqueue` call until the drain loop frees a slot.
    Block,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Reject => write!(f, "reject"),
            OverflowPolicy::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "block" => Ok(OverflowPolicy::Block),
            _ => Err(format!("Invalid overflow policy: {}", s)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DispatcherSettings {
    // Maximum number of operations started per second
    pub rate_per_second: u32,

    // Bound on the number of waiting tasks
    pub queue_capacity: QueueCapacity,

    // Behavior at the capacity watermark (bounded queues only)
    pub overflow_policy: OverflowPolicy,

    // Optional wall-clock limit on a single operation; `None` means a stuck
    // operation stalls the whole queue behind it
    pub operation_timeout: Option<Duration>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            rate_per_second: DEFAULT_RATE_PER_SECOND,
            queue_capacity: QueueCapacity::default(),
            overflow_policy: OverflowPolicy::default(),
            operation_timeout: None,
        }
    }
}

impl DispatcherSettings {
    pub fn with_rate(rate_per_second: u32) -> Self {
        Self {
            rate_per_second,
            ..Self::default()
        }
    }

    /// Minimum wall-clock gap between the start of two consecutive
    /// operations. A zero rate is clamped to one per second rather than
    /// dividing by zero.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_per_second.max(1)
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_classic_behavior() {
        let settings = DispatcherSettings::default();
        assert_eq!(settings.rate_per_second, 25);
        assert_eq!(settings.queue_capacity, QueueCapacity::Unbounded);
        assert_eq!(settings.overflow_policy, OverflowPolicy::Reject);
        assert!(settings.operation_timeout.is_none());
        assert_eq!(settings.min_interval(), Duration::from_millis(40));
    }

    #[test]
    fn min_interval_derivation() {
        assert_eq!(
            DispatcherSettings::with_rate(10).min_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(DispatcherSettings::with_rate(10).min_interval_ms(), 100);
        // zero rate clamps instead of panicking
        assert_eq!(
            DispatcherSettings::with_rate(0).min_interval(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn capacity_bound() {
        assert_eq!(QueueCapacity::Unbounded.bound(), None);
        assert_eq!(QueueCapacity::Bounded(2).bound(), Some(2));
    }

    #[test]
    fn zero_bound_is_clamped_to_one() {
        // a literal zero would leave every enqueue unserviceable
        assert_eq!(QueueCapacity::Bounded(0).bound(), Some(1));
    }

    #[test]
    fn overflow_policy_round_trip() {
        assert_eq!("reject".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Reject));
        assert_eq!("Block".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Block));
        assert!("drop".parse::<OverflowPolicy>().is_err());
        assert_eq!(OverflowPolicy::Block.to_string(), "block");
    }
}
