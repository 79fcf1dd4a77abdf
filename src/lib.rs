//! # shmcomm - Shared Memory Communication
//!
//! shmcomm is a same-machine IPC library for robotics-style workloads:
//! multiple cooperating processes on one host exchanging small to
//! medium structured messages at kilohertz rates, without the overhead
//! of loopback TCP or Unix sockets.
//!
//! Three messaging patterns are built on named shared-memory ring
//! buffers:
//!
//! - **Publish/Subscribe**: one writer broadcasts, any number of
//!   readers follow at their own pace; slow readers lose old data.
//! - **Request/Reply**: synchronous exchanges over a pair of rings,
//!   with correlation ids guarding against stale replies.
//! - **Push/Pull**: a work queue where competing pullers each claim
//!   items exactly once.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                 Pattern endpoints                  │
//! │  Publisher/Subscriber  Requester/Replier           │
//! │  Pusher/Puller                                     │
//! ├────────────────────────────────────────────────────┤
//! │  Ring protocols     │  Codecs      │  Claim lock   │
//! │  broadcast / claim  │  bincode/json│  flock-based  │
//! ├────────────────────────────────────────────────────┤
//! │  Segment layer: named mmap regions, 128-byte       │
//! │  header (magic, version, head, tail, counters)     │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use shmcomm::{Publisher, Subscriber};
//! use std::time::Duration;
//!
//! # fn main() -> shmcomm::Result<()> {
//! // Process A
//! let mut publisher = Publisher::new("robot.pose")?;
//! publisher.send(&(1.0f64, 2.0f64, 0.5f64))?;
//!
//! // Process B
//! let mut subscriber = Subscriber::new("robot.pose")?;
//! let pose: Option<(f64, f64, f64)> =
//!     subscriber.recv(Some(Duration::from_secs(1)))?;
//! # Ok(())
//! # }
//! ```

// Header fields are stored through native 64-bit atomics; the on-wire
// contract is little-endian.
#[cfg(target_endian = "big")]
compile_error!("shmcomm segments are little-endian; big-endian targets are not supported");

pub mod codec;
pub mod error;
pub mod layout;
pub mod lock;
pub mod patterns;
pub mod ring;
pub mod segment;

// Main API re-exports
pub use codec::Codec;
pub use error::{Result, ShmError};
pub use layout::RingStats;
pub use lock::{FileLock, FileLockGuard};
pub use patterns::pubsub::SubscriberStats;
pub use patterns::{
    AttachConfig, ChannelConfig, Publisher, Puller, Pusher, Replier, Requester, Subscriber,
};
pub use ring::BroadcastCursor;
pub use segment::Segment;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod defaults {
    use std::time::Duration;

    /// Broadcast ring depth
    pub const BROADCAST_NUM_SLOTS: u64 = 64;
    /// Broadcast slot size in bytes
    pub const BROADCAST_SLOT_SIZE: u64 = 4096;

    /// Request/reply ring depth
    pub const REQREP_NUM_SLOTS: u64 = 16;
    /// Request/reply slot size in bytes (service responses run larger)
    pub const REQREP_SLOT_SIZE: u64 = 8192;

    /// Work-queue ring depth
    pub const WORK_QUEUE_NUM_SLOTS: u64 = 128;
    /// Work-queue slot size in bytes
    pub const WORK_QUEUE_SLOT_SIZE: u64 = 4096;

    /// How long consumers wait for a producer's segment to appear
    pub const TIMEOUT_CONNECT: Duration = Duration::from_secs(5);
}

/// Forcibly unlink a segment by its full OS-level name.
///
/// Useful for cleaning up after crashes during development. Returns
/// whether a segment existed.
pub fn force_unlink(name: &str) -> bool {
    Segment::unlink(name)
}

/// List all shmcomm segments visible on this host.
///
/// Returns an empty list on platforms without segment enumeration.
pub fn list_segments() -> Vec<String> {
    Segment::list()
}
