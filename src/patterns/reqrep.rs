//! Request/reply pattern
//!
//! A [`Replier`] creates two segments for a service name (request
//! traffic on `shmcomm_req_<name>`, replies on `shmcomm_rep_<name>`)
//! and a [`Requester`] attaches to both. Each side runs a two-state
//! machine (idle / awaiting reply) and rejects out-of-order calls.
//!
//! The first eight bytes of every slot carry a correlation id: the
//! requester stamps each request with a monotonically increasing id
//! and the replier echoes it in the reply. A requester discards any
//! reply whose id does not match its outstanding request, so a stale
//! reply from an earlier exchange (or one addressed to a different
//! client) is never delivered.

use std::time::Duration;

use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{Result, ShmError};
use crate::ring::broadcast::{self, BroadcastCursor};
use crate::segment::{rep_segment_name, req_segment_name, validate_channel, Segment};

use super::{poll_until, AttachConfig, ChannelConfig};

/// Bytes of correlation id ahead of each request/reply payload
const CORRELATION_SIZE: usize = 8;

fn frame(id: u64, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(CORRELATION_SIZE + payload.len());
    framed.extend_from_slice(&id.to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

fn unframe(bytes: &[u8]) -> Result<(u64, Vec<u8>)> {
    if bytes.len() < CORRELATION_SIZE {
        return Err(ShmError::serialization(
            "request/reply frame shorter than its correlation id",
        ));
    }
    let mut id_bytes = [0u8; CORRELATION_SIZE];
    id_bytes.copy_from_slice(&bytes[..CORRELATION_SIZE]);
    Ok((u64::from_le_bytes(id_bytes), bytes[CORRELATION_SIZE..].to_vec()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Idle,
    AwaitingReply,
}

/// Server side of a request/reply exchange.
///
/// The replier creates both segments, so it must start before the
/// requester. `recv` and `send` must strictly alternate.
#[derive(Debug)]
pub struct Replier {
    channel: String,
    codec: Codec,
    req_segment: Option<Segment>,
    rep_segment: Option<Segment>,
    req_cursor: BroadcastCursor,
    state: LinkState,
    pending_id: u64,
}

impl Replier {
    /// Create a replier with the default request/reply geometry
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, ChannelConfig::reqrep())
    }

    /// Create a replier with explicit geometry and codec
    pub fn with_config(channel: &str, config: ChannelConfig) -> Result<Self> {
        validate_channel(channel)?;
        let req_segment = Segment::create(
            &req_segment_name(channel),
            config.num_slots,
            config.slot_size,
        )?;
        let rep_segment = Segment::create(
            &rep_segment_name(channel),
            config.num_slots,
            config.slot_size,
        )?;
        let req_cursor = BroadcastCursor::at_head(&req_segment);
        info!("Replier('{}') ready", channel);
        Ok(Self {
            channel: channel.to_string(),
            codec: config.codec,
            req_segment: Some(req_segment),
            rep_segment: Some(rep_segment),
            req_cursor,
            state: LinkState::Idle,
            pending_id: 0,
        })
    }

    /// Wait for the next request and decode it.
    ///
    /// Returns `Ok(None)` on timeout. A successful receive moves the
    /// replier to the awaiting-reply state; receiving again before
    /// replying is a state error.
    pub fn recv<T: DeserializeOwned>(&mut self, timeout: Option<Duration>) -> Result<Option<T>> {
        match self.recv_bytes(timeout)? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`recv`](Self::recv) but returns the raw request payload
    pub fn recv_bytes(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        if self.state != LinkState::Idle {
            return Err(ShmError::state(
                "recv called while a reply is pending; send the reply first",
            ));
        }
        let segment = self
            .req_segment
            .as_ref()
            .ok_or_else(|| ShmError::state("replier is closed"))?;
        let cursor = &mut self.req_cursor;
        match poll_until(timeout, || cursor.try_read(segment))? {
            Some(framed) => {
                let (id, payload) = unframe(&framed)?;
                self.pending_id = id;
                self.state = LinkState::AwaitingReply;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Serialize and send the reply to the last received request
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        self.send_bytes(&payload)
    }

    /// Send a raw reply payload, bypassing the codec
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != LinkState::AwaitingReply {
            return Err(ShmError::state(
                "send called with no request pending; recv a request first",
            ));
        }
        let segment = self
            .rep_segment
            .as_ref()
            .ok_or_else(|| ShmError::state("replier is closed"))?;
        broadcast::write(segment, &frame(self.pending_id, payload))?;
        self.state = LinkState::Idle;
        Ok(())
    }

    /// Service name this replier was created with
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Unlink both segments. Calling twice is a no-op.
    pub fn close(&mut self) {
        let had_any = self.req_segment.take().is_some() | self.rep_segment.take().is_some();
        if had_any {
            info!("Replier('{}') closed", self.channel);
        }
    }
}

impl Drop for Replier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client side of a request/reply exchange.
///
/// Attaches to the segments created by the [`Replier`]. `send` and
/// `recv` must strictly alternate; [`request`](Self::request) does
/// both in one call.
#[derive(Debug)]
pub struct Requester {
    channel: String,
    codec: Codec,
    req_segment: Option<Segment>,
    rep_segment: Option<Segment>,
    rep_cursor: BroadcastCursor,
    state: LinkState,
    next_id: u64,
    outstanding: u64,
}

impl Requester {
    /// Attach to a service with default options
    pub fn new(channel: &str) -> Result<Self> {
        Self::with_config(channel, AttachConfig::default())
    }

    /// Attach with an explicit connect timeout and codec
    pub fn with_config(channel: &str, config: AttachConfig) -> Result<Self> {
        validate_channel(channel)?;
        let req_segment = Segment::attach(&req_segment_name(channel), config.timeout_connect)?;
        let rep_segment = Segment::attach(&rep_segment_name(channel), config.timeout_connect)?;
        let rep_cursor = BroadcastCursor::at_head(&rep_segment);
        info!("Requester('{}') connected", channel);
        Ok(Self {
            channel: channel.to_string(),
            codec: config.codec,
            req_segment: Some(req_segment),
            rep_segment: Some(rep_segment),
            rep_cursor,
            state: LinkState::Idle,
            next_id: 1,
            outstanding: 0,
        })
    }

    /// Serialize and send a request
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        self.send_bytes(&payload)
    }

    /// Send a raw request payload, bypassing the codec
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != LinkState::Idle {
            return Err(ShmError::state(
                "send called while awaiting a reply; recv the reply first",
            ));
        }
        let segment = self
            .req_segment
            .as_ref()
            .ok_or_else(|| ShmError::state("requester is closed"))?;
        let id = self.next_id;
        broadcast::write(segment, &frame(id, payload))?;
        self.next_id += 1;
        self.outstanding = id;
        self.state = LinkState::AwaitingReply;
        Ok(())
    }

    /// Wait for the reply to the outstanding request and decode it.
    ///
    /// Replies carrying a stale correlation id are discarded. Fails
    /// with a timeout error when no matching reply arrives in time;
    /// either way the requester returns to idle.
    pub fn recv<T: DeserializeOwned>(&mut self, timeout: Option<Duration>) -> Result<T> {
        let bytes = self.recv_bytes(timeout)?;
        self.codec.decode(&bytes)
    }

    /// Like [`recv`](Self::recv) but returns the raw reply payload
    pub fn recv_bytes(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        if self.state != LinkState::AwaitingReply {
            return Err(ShmError::state(
                "recv called with no request outstanding; send a request first",
            ));
        }
        let segment = self
            .rep_segment
            .as_ref()
            .ok_or_else(|| ShmError::state("requester is closed"))?;
        let cursor = &mut self.rep_cursor;
        let outstanding = self.outstanding;
        let channel = self.channel.as_str();

        let reply = poll_until(timeout, || {
            match cursor.try_read(segment)? {
                Some(framed) => {
                    let (id, payload) = unframe(&framed)?;
                    if id == outstanding {
                        Ok(Some(payload))
                    } else {
                        debug!(
                            "Requester('{}') discarding reply with stale id {} (expecting {})",
                            channel, id, outstanding
                        );
                        Ok(None)
                    }
                }
                None => Ok(None),
            }
        })?;

        self.state = LinkState::Idle;
        match reply {
            Some(payload) => Ok(payload),
            None => Err(ShmError::timeout(
                format!("no reply from service '{}'", self.channel),
                timeout.unwrap_or(Duration::ZERO),
            )),
        }
    }

    /// Send a request and wait for its reply in one call
    pub fn request<T: Serialize, R: DeserializeOwned>(
        &mut self,
        value: &T,
        timeout: Option<Duration>,
    ) -> Result<R> {
        self.send(value)?;
        self.recv(timeout)
    }

    /// Service name this requester attached to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Detach from both segments. Calling twice is a no-op.
    pub fn close(&mut self) {
        let had_any = self.req_segment.take().is_some() | self.rep_segment.take().is_some();
        if had_any {
            info!("Requester('{}') closed", self.channel);
        }
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.close();
    }
}
