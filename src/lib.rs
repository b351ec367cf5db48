//! # Martinet
//!
//! A rate-limited FIFO dispatch queue for outbound messaging.
//!
//! Callers that must send many messages against an API with a hard
//! per-second limit (broadcasts to thousands of chat recipients, for
//! example) hand their send-operations to a [`RateLimitedDispatcher`]. The
//! dispatcher serializes them into one queue and starts them at the
//! configured rate, preserving submission order, isolating failures to the
//! task that failed, and never dropping a submitted operation.
//!
//! One dispatcher instance per rate-limited resource; clones share the
//! queue.

pub mod bulk;
pub mod dispatcher;
pub mod error;
pub mod settings;

pub use bulk::{BulkProgress, BulkReport, NoProgress};
pub use dispatcher::{DispatchTicket, DispatcherStatus, RateLimitedDispatcher, TaskId};
pub use error::{DispatchError, Result};
pub use settings::{DispatcherSettings, OverflowPolicy, QueueCapacity};
