//! Lock-free single-writer broadcast ring
//!
//! The writer publishes each slot by storing a new monotonic HEAD with
//! release ordering after the slot bytes are complete; readers load
//! HEAD with acquire ordering before touching the slot and re-check it
//! afterwards. That post-read check is what makes the protocol safe
//! without per-slot sequence numbers: a reader that was lapped during
//! its copy observes `HEAD - tail >= num_slots` and discards the
//! possibly torn payload.

use crate::error::{Result, ShmError};
use crate::layout::max_payload;
use crate::segment::Segment;

/// Write one message into the broadcast ring.
///
/// Never blocks: once the ring is full each write overwrites the
/// oldest slot, and slow readers skip ahead on their own. Exactly one
/// process may write to a given segment; the role-prefixed segment
/// name is the enforcement.
pub fn write(segment: &Segment, payload: &[u8]) -> Result<()> {
    let hdr = segment.header();
    let max = max_payload(hdr.slot_size());
    if payload.len() > max {
        return Err(ShmError::payload_too_large(payload.len(), max));
    }

    let head = hdr.head_relaxed();
    segment.write_slot(head, payload);
    hdr.publish_head(head + 1);
    hdr.bump_msg_count();

    // Past the first lap every write overwrites an earlier message.
    // The writer cannot see subscriber cursors, so this counter is
    // optimistic; per-reader losses live in each reader's cursor.
    if head >= hdr.num_slots() {
        hdr.bump_drop_count();
    }
    Ok(())
}

/// A reader's private position in a broadcast ring
///
/// The cursor lives entirely in the reader's address space; readers
/// coordinate with nobody. A fresh cursor starts at the current HEAD
/// and therefore observes only messages published after attach.
#[derive(Debug)]
pub struct BroadcastCursor {
    tail: u64,
    lapped: u64,
}

impl BroadcastCursor {
    /// Cursor positioned at the current head of `segment`
    pub fn at_head(segment: &Segment) -> Self {
        Self {
            tail: segment.header().head(),
            lapped: 0,
        }
    }

    /// Non-blocking read of the next message.
    ///
    /// Returns `Ok(None)` when no new message has been published. When
    /// the writer has lapped this reader the cursor skips to the
    /// oldest still-valid slot (`head - num_slots + 1`) and the skipped
    /// messages are added to [`lapped`](Self::lapped).
    pub fn try_read(&mut self, segment: &Segment) -> Result<Option<Vec<u8>>> {
        let hdr = segment.header();
        let num_slots = hdr.num_slots();

        loop {
            let head = hdr.head();
            if head == self.tail {
                return Ok(None);
            }
            if head - self.tail > num_slots {
                self.skip_to(head - num_slots + 1);
            }

            let payload = segment.read_slot(self.tail);

            // The slot may have been overwritten while we copied it;
            // only the distance to HEAD tells us.
            let head_after = hdr.head();
            if head_after - self.tail >= num_slots {
                self.skip_to(head_after - num_slots + 1);
                continue;
            }

            return match payload {
                Some(bytes) => {
                    self.tail += 1;
                    Ok(Some(bytes))
                }
                // Not lapped yet the prefix was out of range: the
                // segment contents cannot be trusted.
                None => Err(ShmError::connection(format!(
                    "segment '{}' slot {} is corrupt",
                    segment.name(),
                    self.tail
                ))),
            };
        }
    }

    fn skip_to(&mut self, tail: u64) {
        self.lapped += tail - self.tail;
        self.tail = tail;
    }

    /// Current private read index
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Messages lost to lapping since this cursor was created
    pub fn lapped(&self) -> u64 {
        self.lapped
    }
}
