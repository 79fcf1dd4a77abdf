//! Work-queue ring with a shared, lock-guarded tail
//!
//! The producer side never overwrites: when `head - tail` reaches the
//! ring depth it either sleep-polls for space or fails. Consumers
//! compete for messages by advancing the shared TAIL under the
//! segment's claim lock, so each message is delivered to exactly one
//! of them.

use std::time::{Duration, Instant};

use crate::error::{Result, ShmError};
use crate::layout::max_payload;
use crate::lock::FileLock;
use crate::segment::Segment;

/// Interval between space checks when a blocking push finds the ring full
const PUSH_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Push one message into the work queue.
///
/// With `block` set, waits for space until `timeout` (or forever when
/// `timeout` is `None`); expiry fails with `BufferFull`. Without
/// `block`, a full ring bumps DROP_COUNT and fails immediately.
pub fn push(
    segment: &Segment,
    payload: &[u8],
    block: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let hdr = segment.header();
    let max = max_payload(hdr.slot_size());
    if payload.len() > max {
        return Err(ShmError::payload_too_large(payload.len(), max));
    }

    let num_slots = hdr.num_slots();
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let head = hdr.head_relaxed();
        let tail = hdr.tail();
        if head - tail < num_slots {
            break;
        }

        if !block {
            hdr.bump_drop_count();
            return Err(ShmError::buffer_full(segment.name()));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                hdr.bump_drop_count();
                return Err(ShmError::buffer_full(segment.name()));
            }
        }
        std::thread::sleep(PUSH_POLL_INTERVAL);
    }

    let head = hdr.head_relaxed();
    segment.write_slot(head, payload);
    hdr.publish_head(head + 1);
    hdr.bump_msg_count();
    Ok(())
}

/// Claim the next message, if any, under the segment's claim lock.
///
/// The lock is held only for the tail advance, never across a sleep.
/// Contending claimants are served in no particular order.
pub fn try_claim(segment: &Segment, lock: &FileLock) -> Result<Option<Vec<u8>>> {
    let _guard = lock.acquire()?;

    let hdr = segment.header();
    let head = hdr.head();
    let tail = hdr.tail();
    if head == tail {
        return Ok(None);
    }

    let payload = segment.read_slot(tail).ok_or_else(|| {
        ShmError::connection(format!(
            "segment '{}' slot {} is corrupt",
            segment.name(),
            tail
        ))
    })?;
    hdr.store_tail(tail + 1);
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str, num_slots: u64, slot_size: u64) -> (Segment, FileLock) {
        let seg = Segment::create(name, num_slots, slot_size).unwrap();
        let lock = FileLock::new(name).unwrap();
        (seg, lock)
    }

    #[test]
    fn test_push_claim_fifo() {
        let (seg, lock) = scratch("shmcomm_test_cl_fifo", 8, 64);
        for i in 0..5u8 {
            push(&seg, &[i], false, None).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(try_claim(&seg, &lock).unwrap().unwrap(), [i]);
        }
        assert!(try_claim(&seg, &lock).unwrap().is_none());
    }

    #[test]
    fn test_full_ring_uses_all_slots() {
        let (seg, lock) = scratch("shmcomm_test_cl_full", 4, 64);
        for i in 0..4u8 {
            push(&seg, &[i], false, None).unwrap();
        }
        // All four slots hold unclaimed messages now.
        let err = push(&seg, b"x", false, None).unwrap_err();
        assert!(matches!(err, ShmError::BufferFull { .. }));
        assert_eq!(seg.header().drop_count(), 1);

        // Claiming one frees one slot.
        assert_eq!(try_claim(&seg, &lock).unwrap().unwrap(), [0]);
        push(&seg, b"x", false, None).unwrap();
    }

    #[test]
    fn test_blocking_push_times_out() {
        let (seg, _lock) = scratch("shmcomm_test_cl_timeout", 2, 64);
        push(&seg, b"a", false, None).unwrap();
        push(&seg, b"b", false, None).unwrap();

        let start = Instant::now();
        let err = push(&seg, b"c", true, Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, ShmError::BufferFull { .. }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_head_tail_invariant_holds() {
        let (seg, lock) = scratch("shmcomm_test_cl_invariant", 4, 64);
        for round in 0..3u8 {
            for i in 0..4u8 {
                push(&seg, &[round * 4 + i], false, None).unwrap();
            }
            let hdr = seg.header();
            assert!(hdr.head() >= hdr.tail());
            assert!(hdr.head() - hdr.tail() <= hdr.num_slots());
            for _ in 0..4 {
                try_claim(&seg, &lock).unwrap().unwrap();
            }
        }
        assert_eq!(seg.header().msg_count(), 12);
    }
}
