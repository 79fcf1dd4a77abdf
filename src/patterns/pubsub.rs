//! Publish/subscribe pattern
//!
//! One [`Publisher`] writes to a broadcast ring; any number of
//! [`Subscriber`]s read it, each with a private cursor, never
//! coordinating with each other or with the publisher. A slow
//! subscriber is lapped and silently skips to the oldest still-valid
//! message; the skipped count is reported in its stats.

use std::time::Duration;

use log::info;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{Result, ShmError};
use crate::layout::RingStats;
use crate::ring::broadcast::{self, BroadcastCursor};
use crate::segment::{pub_segment_name, validate_channel, Segment};

use super::{poll_until, AttachConfig, ChannelConfig};

/// Writes messages to a named broadcast channel.
///
/// Creating a publisher creates (and takes over) the channel's
/// segment; dropping it unlinks the segment. Sending never blocks:
/// once the ring is full, each message overwrites the oldest one.
#[derive(Debug)]
pub struct Publisher {
    channel: String,
    codec: Codec,
    segment: Option<Segment>,
}

impl Publisher {
    /// Create a publisher with the default broadcast geometry
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, ChannelConfig::broadcast())
    }

    /// Create a publisher with explicit geometry and codec
    pub fn with_config(channel: &str, config: ChannelConfig) -> Result<Self> {
        validate_channel(channel)?;
        let segment =
            Segment::create(&pub_segment_name(channel), config.num_slots, config.slot_size)?;
        info!(
            "Publisher('{}') ready - {} slots x {} bytes",
            channel, config.num_slots, config.slot_size
        );
        Ok(Self {
            channel: channel.to_string(),
            codec: config.codec,
            segment: Some(segment),
        })
    }

    fn segment(&self) -> Result<&Segment> {
        self.segment
            .as_ref()
            .ok_or_else(|| ShmError::state("publisher is closed"))
    }

    /// Serialize and publish a value
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        broadcast::write(self.segment()?, &payload)
    }

    /// Publish raw bytes, bypassing the codec
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        broadcast::write(self.segment()?, payload)
    }

    /// Snapshot of the channel's ring counters
    pub fn stats(&self) -> Result<RingStats> {
        Ok(self.segment()?.header().stats())
    }

    /// Channel name this publisher was created with
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Unlink the segment. Subsequent sends fail; calling twice is a
    /// no-op.
    pub fn close(&mut self) {
        if self.segment.take().is_some() {
            info!("Publisher('{}') closed", self.channel);
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-subscriber view of a broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberStats {
    /// This subscriber's private read index
    pub local_tail: u64,
    /// The channel's next write index
    pub head: u64,
    /// Messages this subscriber lost to lapping
    pub lapped: u64,
}

/// Reads messages from a named broadcast channel.
///
/// The cursor starts at the channel's current head, so a subscriber
/// observes only messages published after it attached.
#[derive(Debug)]
pub struct Subscriber {
    channel: String,
    codec: Codec,
    segment: Option<Segment>,
    cursor: BroadcastCursor,
}

impl Subscriber {
    /// Attach to a broadcast channel with default options
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, AttachConfig::default())
    }

    /// Attach with an explicit connect timeout and codec
    pub fn with_config(channel: &str, config: AttachConfig) -> Result<Self> {
        validate_channel(channel)?;
        let segment = Segment::attach(&pub_segment_name(channel), config.timeout_connect)?;
        let cursor = BroadcastCursor::at_head(&segment);
        info!(
            "Subscriber('{}') attached, starting tail={}",
            channel,
            cursor.tail()
        );
        Ok(Self {
            channel: channel.to_string(),
            codec: config.codec,
            segment: Some(segment),
            cursor,
        })
    }

    /// Wait for the next message and decode it.
    ///
    /// `timeout` of `None` blocks indefinitely; `Some(Duration::ZERO)`
    /// is a pure poll. Returns `Ok(None)` when nothing arrived in time.
    pub fn recv<T: DeserializeOwned>(&mut self, timeout: Option<Duration>) -> Result<Option<T>> {
        match self.recv_bytes(timeout)? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`recv`](Self::recv) but returns the raw payload
    pub fn recv_bytes(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let segment = self
            .segment
            .as_ref()
            .ok_or_else(|| ShmError::state("subscriber is closed"))?;
        let cursor = &mut self.cursor;
        poll_until(timeout, || cursor.try_read(segment))
    }

    /// Snapshot of this subscriber's position in the channel
    pub fn stats(&self) -> Result<SubscriberStats> {
        let segment = self
            .segment
            .as_ref()
            .ok_or_else(|| ShmError::state("subscriber is closed"))?;
        Ok(SubscriberStats {
            local_tail: self.cursor.tail(),
            head: segment.header().head(),
            lapped: self.cursor.lapped(),
        })
    }

    /// Channel name this subscriber attached to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Detach from the segment. Calling twice is a no-op; detaching
    /// never unlinks.
    pub fn close(&mut self) {
        if self.segment.take().is_some() {
            info!("Subscriber('{}') closed", self.channel);
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}
