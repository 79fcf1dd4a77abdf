//! Ring-buffer protocols over a mapped segment
//!
//! Two protocols share the slot layout of [`crate::layout`]:
//!
//! - [`broadcast`]: one writer, any number of independent readers,
//!   overwrite-on-full. Readers carry private cursors and detect being
//!   lapped themselves; nothing is ever blocked.
//! - [`claim`]: one writer, competing readers advancing a shared tail
//!   under a cross-process lock. Each message is claimed by exactly
//!   one reader and the producer blocks (or fails) when full.

pub mod broadcast;
pub mod claim;

pub use broadcast::BroadcastCursor;
