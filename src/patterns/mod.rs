//! Messaging patterns layered on the ring protocols
//!
//! Three endpoint pairs cover the common robotics topologies:
//!
//! - [`Publisher`]/[`Subscriber`]: broadcast, latest-data-wins
//! - [`Requester`]/[`Replier`]: synchronous request/reply
//! - [`Pusher`]/[`Puller`]: load-balanced work distribution
//!
//! Producers create their segments and own their lifecycle; consumers
//! attach. Every endpoint closes on drop.

use std::time::{Duration, Instant};

use crate::codec::Codec;
use crate::error::Result;

pub mod pipeline;
pub mod pubsub;
pub mod reqrep;

pub use pipeline::{Puller, Pusher};
pub use pubsub::{Publisher, Subscriber};
pub use reqrep::{Replier, Requester};

/// Interval between receive polls
pub(crate) const RECV_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Ring geometry and codec for a producer-side endpoint
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Ring depth (>= 1)
    pub num_slots: u64,
    /// Bytes per slot including the 4-byte length prefix (>= 8)
    pub slot_size: u64,
    /// Serialization format; must match the consumer side
    pub codec: Codec,
}

impl ChannelConfig {
    /// Defaults for broadcast channels: 64 slots of 4 KiB
    pub fn broadcast() -> Self {
        Self {
            num_slots: crate::defaults::BROADCAST_NUM_SLOTS,
            slot_size: crate::defaults::BROADCAST_SLOT_SIZE,
            codec: Codec::default(),
        }
    }

    /// Defaults for request/reply channels: 16 slots of 8 KiB
    pub fn reqrep() -> Self {
        Self {
            num_slots: crate::defaults::REQREP_NUM_SLOTS,
            slot_size: crate::defaults::REQREP_SLOT_SIZE,
            codec: Codec::default(),
        }
    }

    /// Defaults for work-queue channels: 128 slots of 4 KiB
    pub fn work_queue() -> Self {
        Self {
            num_slots: crate::defaults::WORK_QUEUE_NUM_SLOTS,
            slot_size: crate::defaults::WORK_QUEUE_SLOT_SIZE,
            codec: Codec::default(),
        }
    }

    /// Override the ring geometry
    pub fn with_geometry(mut self, num_slots: u64, slot_size: u64) -> Self {
        self.num_slots = num_slots;
        self.slot_size = slot_size;
        self
    }

    /// Override the codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// Attach options for a consumer-side endpoint
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// How long to wait for the producer's segment to appear
    pub timeout_connect: Duration,
    /// Serialization format; must match the producer side
    pub codec: Codec,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            timeout_connect: crate::defaults::TIMEOUT_CONNECT,
            codec: Codec::default(),
        }
    }
}

impl AttachConfig {
    /// Override the connect timeout
    pub fn with_timeout_connect(mut self, timeout: Duration) -> Self {
        self.timeout_connect = timeout;
        self
    }

    /// Override the codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// Sleep-poll `attempt` until it yields a value or `timeout` elapses.
///
/// `None` blocks indefinitely; `Some(Duration::ZERO)` is a single
/// non-blocking attempt.
pub(crate) fn poll_until<T>(
    timeout: Option<Duration>,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
        std::thread::sleep(RECV_POLL_INTERVAL);
    }
}
