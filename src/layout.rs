//! Binary layout of a shmcomm segment
//!
//! Every segment starts with a fixed 128-byte header followed by
//! `num_slots` slots of `slot_size` bytes each. All multi-byte fields
//! are little-endian; the header is read and written through aligned
//! 64-bit atomics so that cross-process loads and stores of HEAD and
//! TAIL are single instructions on 64-bit hosts.
//!
//! Header layout (offsets in bytes):
//!
//! | Offset | Field      | Semantics                                   |
//! |--------|------------|---------------------------------------------|
//! | 0      | MAGIC      | `0x53484D434F4D4D31` ("SHMCOMM1")           |
//! | 8      | VERSION    | format version, attach fails on mismatch    |
//! | 16     | HEAD       | next write index, monotonic (not modulo)    |
//! | 24     | TAIL       | shared read index (work-queue only)         |
//! | 32     | MSG_COUNT  | total successful writes                     |
//! | 40     | DROP_COUNT | overwrites / rejected writes                |
//! | 48     | NUM_SLOTS  | ring depth, immutable after creation        |
//! | 56     | SLOT_SIZE  | bytes per slot, immutable after creation    |
//! | 64-127 | reserved   | zero                                        |
//!
//! Each slot begins with a little-endian u32 payload length, followed
//! by the payload; the remaining bytes are undefined.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, ShmError};

/// Magic number identifying a shmcomm segment ("SHMCOMM1")
pub const MAGIC: u64 = 0x53484D434F4D4D31;

/// Current segment format version
pub const VERSION: u64 = 1;

/// Size of the segment header in bytes
pub const HEADER_SIZE: usize = 128;

/// Bytes of length prefix at the start of every slot
pub const SLOT_PREFIX_SIZE: usize = 4;

/// Total segment size in bytes for the given ring geometry
pub const fn segment_size(num_slots: u64, slot_size: u64) -> usize {
    HEADER_SIZE + (num_slots as usize) * (slot_size as usize)
}

/// Largest payload a single slot can carry
pub const fn max_payload(slot_size: u64) -> usize {
    slot_size as usize - SLOT_PREFIX_SIZE
}

/// Segment header, placed at offset 0 of the mapping.
///
/// HEAD and TAIL carry acquire/release ordering; the counters are
/// best-effort and use relaxed ordering. MAGIC, VERSION, NUM_SLOTS and
/// SLOT_SIZE are written once at creation and never mutated.
#[repr(C)]
pub struct RingHeader {
    magic: AtomicU64,
    version: AtomicU64,
    head: AtomicU64,
    tail: AtomicU64,
    msg_count: AtomicU64,
    drop_count: AtomicU64,
    num_slots: AtomicU64,
    slot_size: AtomicU64,
    _reserved: [u64; 8],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == HEADER_SIZE);

impl RingHeader {
    /// Initialize the header of a freshly created (zeroed) segment
    pub fn init(&self, num_slots: u64, slot_size: u64) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.msg_count.store(0, Ordering::Relaxed);
        self.drop_count.store(0, Ordering::Relaxed);
        self.num_slots.store(num_slots, Ordering::Relaxed);
        self.slot_size.store(slot_size, Ordering::Relaxed);
        self.version.store(VERSION, Ordering::Relaxed);
        // Magic last: a concurrent attacher that sees it also sees the
        // geometry fields above.
        self.magic.store(MAGIC, Ordering::Release);
    }

    /// Validate magic and version, as done on every attach
    pub fn validate(&self, name: &str) -> Result<()> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(ShmError::connection(format!(
                "segment '{}' has invalid magic {:#018X} (expected {:#018X}); \
                 are you connecting to the right segment?",
                name, magic, MAGIC
            )));
        }
        let version = self.version.load(Ordering::Relaxed);
        if version != VERSION {
            return Err(ShmError::connection(format!(
                "segment '{}' has format version {} but this library expects {}",
                name, version, VERSION
            )));
        }
        Ok(())
    }

    /// Next write index (writer-side relaxed load; the writer is the
    /// only process that stores it)
    pub fn head_relaxed(&self) -> u64 {
        self.head.load(Ordering::Relaxed)
    }

    /// Next write index with acquire ordering (reader side: everything
    /// written before the matching publish is visible)
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Publish a new head after the slot bytes are fully written
    pub fn publish_head(&self, head: u64) {
        self.head.store(head, Ordering::Release);
    }

    /// Shared read index (work-queue only)
    pub fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Advance the shared read index; caller holds the claim lock
    pub fn store_tail(&self, tail: u64) {
        self.tail.store(tail, Ordering::Release);
    }

    /// Ring depth (immutable after creation)
    pub fn num_slots(&self) -> u64 {
        self.num_slots.load(Ordering::Relaxed)
    }

    /// Bytes per slot (immutable after creation)
    pub fn slot_size(&self) -> u64 {
        self.slot_size.load(Ordering::Relaxed)
    }

    /// Total successful writes since creation
    pub fn msg_count(&self) -> u64 {
        self.msg_count.load(Ordering::Relaxed)
    }

    /// Record one successful write
    pub fn bump_msg_count(&self) {
        self.msg_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrites (broadcast) or rejected writes (work-queue)
    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Record one overwrite or rejected write
    pub fn bump_drop_count(&self) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot of the ring counters
    pub fn stats(&self) -> RingStats {
        let head = self.head();
        let tail = self.tail();
        let num_slots = self.num_slots();
        let used_slots = (head - tail).min(num_slots);
        RingStats {
            head,
            tail,
            num_slots,
            slot_size: self.slot_size(),
            msg_count: self.msg_count(),
            drop_count: self.drop_count(),
            used_slots,
            free_slots: num_slots - used_slots,
        }
    }
}

/// Snapshot of a segment's ring counters
///
/// `used_slots`/`free_slots` are exact for work-queue segments; for
/// broadcast segments (where TAIL stays 0) they saturate once the ring
/// has wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub head: u64,
    pub tail: u64,
    pub num_slots: u64,
    pub slot_size: u64,
    pub msg_count: u64,
    pub drop_count: u64,
    pub used_slots: u64,
    pub free_slots: u64,
}

/// Byte offset of the slot holding message index `index`
pub fn slot_offset(index: u64, num_slots: u64, slot_size: u64) -> usize {
    HEADER_SIZE + ((index % num_slots) as usize) * (slot_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_header() -> Box<RingHeader> {
        // A zeroed header, as Segment::create provides
        unsafe { Box::new(std::mem::zeroed()) }
    }

    #[test]
    fn test_header_size_is_fixed() {
        assert_eq!(std::mem::size_of::<RingHeader>(), 128);
    }

    #[test]
    fn test_init_and_validate() {
        let hdr = fresh_header();
        assert!(hdr.validate("x").is_err());

        hdr.init(64, 4096);
        hdr.validate("x").unwrap();
        assert_eq!(hdr.num_slots(), 64);
        assert_eq!(hdr.slot_size(), 4096);
        assert_eq!(hdr.head(), 0);
        assert_eq!(hdr.tail(), 0);
    }

    #[test]
    fn test_segment_size() {
        assert_eq!(segment_size(64, 4096), 128 + 64 * 4096);
        assert_eq!(max_payload(4096), 4092);
        assert_eq!(max_payload(16), 12);
    }

    #[test]
    fn test_slot_offset_wraps() {
        assert_eq!(slot_offset(0, 4, 64), 128);
        assert_eq!(slot_offset(3, 4, 64), 128 + 3 * 64);
        assert_eq!(slot_offset(4, 4, 64), 128);
        assert_eq!(slot_offset(7, 4, 64), 128 + 3 * 64);
    }

    #[test]
    fn test_stats_snapshot() {
        let hdr = fresh_header();
        hdr.init(8, 256);
        hdr.publish_head(3);
        hdr.bump_msg_count();
        hdr.bump_msg_count();
        hdr.bump_msg_count();

        let stats = hdr.stats();
        assert_eq!(stats.head, 3);
        assert_eq!(stats.msg_count, 3);
        assert_eq!(stats.used_slots, 3);
        assert_eq!(stats.free_slots, 5);
    }
}
