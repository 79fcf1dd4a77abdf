//! Push/pull (work-queue) pattern
//!
//! One [`Pusher`] writes work items; any number of [`Puller`]s compete
//! for them, each item going to exactly one puller. Pullers serialize
//! their claims through the channel's cross-process lock. Unlike
//! broadcast, the pusher blocks by default when the ring is full:
//! queue items must not be lost.

use std::time::Duration;

use log::info;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{Result, ShmError};
use crate::layout::RingStats;
use crate::lock::FileLock;
use crate::ring::claim;
use crate::segment::{push_segment_name, validate_channel, Segment};

use super::{poll_until, AttachConfig, ChannelConfig};

/// Writes work items into a named push/pull channel.
///
/// A channel has exactly one pusher: creating one takes over the
/// segment, so only the most recently started pusher feeds the queue.
#[derive(Debug)]
pub struct Pusher {
    channel: String,
    codec: Codec,
    segment: Option<Segment>,
}

impl Pusher {
    /// Create a pusher with the default work-queue geometry
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, ChannelConfig::work_queue())
    }

    /// Create a pusher with explicit geometry and codec
    pub fn with_config(channel: &str, config: ChannelConfig) -> Result<Self> {
        validate_channel(channel)?;
        let segment = Segment::create(
            &push_segment_name(channel),
            config.num_slots,
            config.slot_size,
        )?;
        info!(
            "Pusher('{}') ready - {} slots x {} bytes",
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
            .ok_or_else(|| ShmError::state("pusher is closed"))
    }

    /// Serialize and enqueue a value, waiting as long as it takes for
    /// a free slot
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        self.send_bytes(&payload)
    }

    /// Serialize and enqueue a value, waiting at most `timeout` for a
    /// free slot; expiry fails with `BufferFull`
    pub fn send_timeout<T: Serialize>(&mut self, value: &T, timeout: Duration) -> Result<()> {
        let payload = self.codec.encode(value)?;
        self.send_bytes_timeout(&payload, timeout)
    }

    /// Serialize and enqueue a value without blocking; a full ring
    /// fails with `BufferFull`
    pub fn try_send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        self.try_send_bytes(&payload)
    }

    /// Enqueue raw bytes, waiting as long as it takes
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        claim::push(self.segment()?, payload, true, None)
    }

    /// Enqueue raw bytes, waiting at most `timeout`
    pub fn send_bytes_timeout(&mut self, payload: &[u8], timeout: Duration) -> Result<()> {
        claim::push(self.segment()?, payload, true, Some(timeout))
    }

    /// Enqueue raw bytes without blocking
    pub fn try_send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        claim::push(self.segment()?, payload, false, None)
    }

    /// Snapshot of the queue's ring counters
    pub fn stats(&self) -> Result<RingStats> {
        Ok(self.segment()?.header().stats())
    }

    /// Channel name this pusher was created with
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Unlink the segment. Calling twice is a no-op.
    pub fn close(&mut self) {
        if self.segment.take().is_some() {
            info!("Pusher('{}') closed", self.channel);
        }
    }
}

impl Drop for Pusher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pulls work items from a named push/pull channel.
///
/// Multiple pullers on one channel compete fairly; the claim lock
/// guarantees each item is delivered to exactly one of them.
#[derive(Debug)]
pub struct Puller {
    channel: String,
    codec: Codec,
    segment: Option<Segment>,
    lock: FileLock,
}

impl Puller {
    /// Attach to a work queue with default options
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, AttachConfig::default())
    }

    /// Attach with an explicit connect timeout and codec
    pub fn with_config(channel: &str, config: AttachConfig) -> Result<Self> {
        validate_channel(channel)?;
        let segment_name = push_segment_name(channel);
        let segment = Segment::attach(&segment_name, config.timeout_connect)?;
        let lock = FileLock::new(&segment_name)?;
        info!("Puller('{}') connected", channel);
        Ok(Self {
            channel: channel.to_string(),
            codec: config.codec,
            segment: Some(segment),
            lock,
        })
    }

    /// Claim the next work item and decode it.
    ///
    /// `timeout` of `None` blocks indefinitely; `Some(Duration::ZERO)`
    /// is a pure poll. Returns `Ok(None)` when the queue stayed empty.
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
            .ok_or_else(|| ShmError::state("puller is closed"))?;
        let lock = &self.lock;
        poll_until(timeout, || claim::try_claim(segment, lock))
    }

    /// Snapshot of the queue's ring counters
    pub fn stats(&self) -> Result<RingStats> {
        let segment = self
            .segment
            .as_ref()
            .ok_or_else(|| ShmError::state("puller is closed"))?;
        Ok(segment.header().stats())
    }

    /// Channel name this puller attached to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Detach from the segment. Calling twice is a no-op; detaching
    /// never unlinks.
    pub fn close(&mut self) {
        if self.segment.take().is_some() {
            info!("Puller('{}') closed", self.channel);
        }
    }
}

impl Drop for Puller {
    fn drop(&mut self) {
        self.close();
    }
}
