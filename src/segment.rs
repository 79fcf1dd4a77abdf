//! Shared memory segment lifecycle management
//!
//! A segment is a named, file-backed, memory-mapped byte region laid
//! out as described in [`crate::layout`]. Producers create segments
//! (removing any stale leftover with the same name first); consumers
//! attach to them by polling until the producer side has finished
//! initialization. Only the creating side unlinks the backing file.
//!
//! Segment names follow the convention `shmcomm_<role>_<channel>`
//! where the role is one of `pub`, `req`, `rep`, `push`.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use memmap2::MmapMut;

use crate::error::{Result, ShmError};
use crate::layout::{
    max_payload, segment_size, slot_offset, RingHeader, HEADER_SIZE, SLOT_PREFIX_SIZE,
};

/// Prefix carried by every segment this library creates
pub const SEGMENT_PREFIX: &str = "shmcomm_";

/// Maximum OS-level segment name length accepted
pub const MAX_NAME_LEN: usize = 255;

/// Interval between attach retries
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Directory holding segment backing files.
///
/// `/dev/shm` keeps Linux segments in memory and enumerable; other
/// platforms fall back to the system temp directory.
pub fn segment_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir()
    }
}

/// OS-level segment name for a broadcast channel
pub fn pub_segment_name(channel: &str) -> String {
    format!("{}pub_{}", SEGMENT_PREFIX, channel)
}

/// OS-level segment name for request (client to server) traffic
pub fn req_segment_name(channel: &str) -> String {
    format!("{}req_{}", SEGMENT_PREFIX, channel)
}

/// OS-level segment name for reply (server to client) traffic
pub fn rep_segment_name(channel: &str) -> String {
    format!("{}rep_{}", SEGMENT_PREFIX, channel)
}

/// OS-level segment name for a work-queue channel
pub fn push_segment_name(channel: &str) -> String {
    format!("{}push_{}", SEGMENT_PREFIX, channel)
}

/// Validate a user-supplied channel name
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(ShmError::invalid_parameter(
            "channel",
            "channel name cannot be empty",
        ));
    }
    if channel.contains('/') || channel.contains('\\') || channel.contains('\0') {
        return Err(ShmError::invalid_parameter(
            "channel",
            "channel name cannot contain path separators or NUL",
        ));
    }
    // Longest role prefix is "shmcomm_push_"
    if SEGMENT_PREFIX.len() + 5 + channel.len() > MAX_NAME_LEN {
        return Err(ShmError::invalid_parameter(
            "channel",
            format!("resulting segment name exceeds {} bytes", MAX_NAME_LEN),
        ));
    }
    Ok(())
}

fn validate_geometry(num_slots: u64, slot_size: u64) -> Result<()> {
    if num_slots < 1 {
        return Err(ShmError::invalid_parameter(
            "num_slots",
            "ring depth must be at least 1",
        ));
    }
    if (slot_size as usize) < SLOT_PREFIX_SIZE + 4 {
        return Err(ShmError::invalid_parameter(
            "slot_size",
            "slots must hold the 4-byte length prefix plus a minimum payload",
        ));
    }
    Ok(())
}

/// A mapped shmcomm segment
///
/// The creating side owns the segment lifecycle: dropping (or closing)
/// an owner unlinks the backing file, while attached consumers only
/// unmap. All slot access goes through [`write_slot`](Self::write_slot)
/// and [`read_slot`](Self::read_slot); header access through
/// [`header`](Self::header).
#[derive(Debug)]
pub struct Segment {
    name: String,
    path: PathBuf,
    mmap: MmapMut,
    owner: bool,
}

impl Segment {
    /// Create a new segment, unlinking any stale one with this name
    pub fn create(name: &str, num_slots: u64, slot_size: u64) -> Result<Self> {
        validate_geometry(num_slots, slot_size)?;
        let path = segment_dir().join(name);
        let size = segment_size(num_slots, slot_size);

        // Always start clean: a previous owner may have crashed
        // without unlinking.
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed stale segment '{}'", name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not clean stale segment '{}': {}", name, e),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)
            .map_err(|e| {
                ShmError::connection_io(e, &format!("failed to create segment '{}'", name))
            })?;
        file.set_len(size as u64).map_err(|e| {
            ShmError::connection_io(
                e,
                &format!("failed to size segment '{}' to {} bytes", name, size),
            )
        })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            ShmError::connection_io(e, &format!("failed to map segment '{}'", name))
        })?;

        let segment = Self {
            name: name.to_string(),
            path,
            mmap,
            owner: true,
        };
        segment.header().init(num_slots, slot_size);
        info!("created segment '{}' ({} bytes)", name, size);
        Ok(segment)
    }

    /// Attach to an existing segment, polling until it appears and its
    /// header is valid or `timeout` elapses.
    ///
    /// A present-but-wrong magic or version fails immediately; an
    /// absent file (or a zero magic, meaning the creator has not
    /// finished initializing) keeps polling.
    pub fn attach(name: &str, timeout: Duration) -> Result<Self> {
        let path = segment_dir().join(name);
        let deadline = Instant::now() + timeout;
        let mut last_err: Option<std::io::Error> = None;

        loop {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => {
                    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                    if len >= HEADER_SIZE as u64 {
                        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
                            ShmError::connection_io(
                                e,
                                &format!("failed to map segment '{}'", name),
                            )
                        })?;
                        let segment = Self {
                            name: name.to_string(),
                            path: path.clone(),
                            mmap,
                            owner: false,
                        };
                        if !segment.header_zeroed() {
                            segment.header().validate(name)?;
                            info!("attached to segment '{}'", name);
                            return Ok(segment);
                        }
                        // Zero magic: creator mid-initialization, retry.
                    }
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }

            if Instant::now() >= deadline {
                let detail = last_err
                    .map(|e| format!(" (last error: {})", e))
                    .unwrap_or_default();
                return Err(ShmError::connection(format!(
                    "segment '{}' did not appear within {:?}; \
                     is the producer running?{}",
                    name, timeout, detail
                )));
            }
            std::thread::sleep(ATTACH_POLL_INTERVAL);
        }
    }

    /// Unlink a segment by OS-level name; returns whether one existed
    pub fn unlink(name: &str) -> bool {
        let path = segment_dir().join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("unlinked segment '{}'", name);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("could not unlink '{}': {}", name, e);
                false
            }
        }
    }

    /// Names of all shmcomm segments visible on this host.
    ///
    /// Enumeration reads the segment directory on Linux; other
    /// platforms return an empty list.
    pub fn list() -> Vec<String> {
        #[cfg(target_os = "linux")]
        {
            match fs::read_dir(segment_dir()) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter(|n| n.starts_with(SEGMENT_PREFIX))
                    .collect(),
                Err(e) => {
                    warn!("could not list {}: {}", segment_dir().display(), e);
                    Vec::new()
                }
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            Vec::new()
        }
    }

    /// The segment header at offset 0 of the mapping
    pub fn header(&self) -> &RingHeader {
        // The mapping is at least HEADER_SIZE bytes (checked at attach,
        // guaranteed at create) and page-aligned.
        unsafe { &*(self.mmap.as_ptr() as *const RingHeader) }
    }

    fn header_zeroed(&self) -> bool {
        self.mmap[..8] == [0u8; 8]
    }

    /// Write `[len][payload]` into the slot for message index `index`.
    ///
    /// Does not advance any pointer; the ring protocol publishes the
    /// write by storing a new HEAD afterwards.
    pub fn write_slot(&self, index: u64, payload: &[u8]) {
        let hdr = self.header();
        let slot_size = hdr.slot_size();
        debug_assert!(payload.len() <= max_payload(slot_size));
        let offset = slot_offset(index, hdr.num_slots(), slot_size);

        // Safety: slot regions never overlap the header, the offset is
        // in bounds for the mapping, and the single-writer protocol
        // gives this process exclusive write access to the slot.
        unsafe {
            let base = self.mmap.as_ptr() as *mut u8;
            let len = (payload.len() as u32).to_le_bytes();
            std::ptr::copy_nonoverlapping(len.as_ptr(), base.add(offset), SLOT_PREFIX_SIZE);
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                base.add(offset + SLOT_PREFIX_SIZE),
                payload.len(),
            );
        }
    }

    /// Read the payload stored in the slot for message index `index`.
    ///
    /// Returns `None` when the length prefix is out of range, which a
    /// concurrent overwrite can produce; callers re-check HEAD and
    /// either retry or report corruption.
    pub fn read_slot(&self, index: u64) -> Option<Vec<u8>> {
        let hdr = self.header();
        let slot_size = hdr.slot_size();
        let offset = slot_offset(index, hdr.num_slots(), slot_size);

        let mut len_bytes = [0u8; SLOT_PREFIX_SIZE];
        len_bytes.copy_from_slice(&self.mmap[offset..offset + SLOT_PREFIX_SIZE]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > max_payload(slot_size) {
            return None;
        }

        let start = offset + SLOT_PREFIX_SIZE;
        Some(self.mmap[start..start + len].to_vec())
    }

    /// OS-level segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle owns the segment lifecycle
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Total mapped size in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// True when the mapping is empty (never the case for a valid segment)
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.owner {
            match fs::remove_file(&self.path) {
                Ok(()) => info!("destroyed segment '{}'", self.name),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("error unlinking segment '{}': {}", self.name, e),
            }
        } else {
            debug!("detached from segment '{}'", self.name);
        }
    }
}

// Within a process a Segment is owned by exactly one endpoint; the
// cross-process sharing happens through the mapping itself.
unsafe impl Send for Segment {}
