//! Integration tests for segment lifecycle: create, attach, unlink,
//! stale-segment recovery and header validation

use std::time::Duration;

use shmcomm::segment::{segment_dir, Segment};
use shmcomm::{force_unlink, list_segments, ShmError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_attach() {
        let name = "shmcomm_pub_it_seg_roundtrip";
        let owner = Segment::create(name, 8, 256).unwrap();
        assert!(owner.is_owner());
        assert_eq!(owner.len(), 128 + 8 * 256);

        let attached = Segment::attach(name, Duration::from_millis(500)).unwrap();
        assert!(!attached.is_owner());
        assert_eq!(attached.header().num_slots(), 8);
        assert_eq!(attached.header().slot_size(), 256);
    }

    #[test]
    fn test_attach_missing_segment_times_out() {
        let err = Segment::attach(
            "shmcomm_pub_it_seg_never_created",
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(matches!(err, ShmError::Connection { .. }));
    }

    #[test]
    fn test_attach_rejects_foreign_file() {
        // A file with the right name but garbage contents must be
        // rejected immediately on magic mismatch, not after the
        // timeout.
        let name = "shmcomm_pub_it_seg_garbage";
        let path = segment_dir().join(name);
        std::fs::write(&path, vec![0xABu8; 256]).unwrap();

        let start = std::time::Instant::now();
        let err = Segment::attach(name, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ShmError::Connection { .. }));
        assert!(format!("{}", err).contains("magic"));
        assert!(start.elapsed() < Duration::from_secs(1));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_stale_segment_is_replaced() {
        // Simulate a crashed owner: the segment file stays behind.
        let name = "shmcomm_pub_it_seg_stale";
        let crashed = Segment::create(name, 4, 64).unwrap();
        crashed.write_slot(0, b"old");
        crashed.header().publish_head(1);
        std::mem::forget(crashed);

        // Re-creating must succeed and start from a fresh header.
        let fresh = Segment::create(name, 4, 64).unwrap();
        assert_eq!(fresh.header().head(), 0);
        assert_eq!(fresh.header().msg_count(), 0);
    }

    #[test]
    fn test_owner_drop_unlinks() {
        let name = "shmcomm_pub_it_seg_drop";
        {
            let _owner = Segment::create(name, 4, 64).unwrap();
        }
        assert!(!segment_dir().join(name).exists());
    }

    #[test]
    fn test_consumer_drop_does_not_unlink() {
        let name = "shmcomm_pub_it_seg_consumer_drop";
        let _owner = Segment::create(name, 4, 64).unwrap();
        {
            let _attached = Segment::attach(name, Duration::from_millis(500)).unwrap();
        }
        assert!(segment_dir().join(name).exists());
    }

    #[test]
    fn test_force_unlink_absent_returns_false() {
        assert!(!force_unlink("shmcomm_pub_it_seg_absent"));
    }

    #[test]
    fn test_force_unlink_present_returns_true() {
        let name = "shmcomm_pub_it_seg_force";
        let owner = Segment::create(name, 4, 64).unwrap();
        std::mem::forget(owner);
        assert!(force_unlink(name));
        assert!(!force_unlink(name));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_list_segments_sees_created() {
        let name = "shmcomm_pub_it_seg_listed";
        let _owner = Segment::create(name, 4, 64).unwrap();
        let listed = list_segments();
        assert!(listed.iter().any(|n| n == name));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(matches!(
            Segment::create("shmcomm_pub_it_seg_bad_slots", 0, 64).unwrap_err(),
            ShmError::InvalidParameter { .. }
        ));
        assert!(matches!(
            Segment::create("shmcomm_pub_it_seg_bad_size", 4, 7).unwrap_err(),
            ShmError::InvalidParameter { .. }
        ));
    }
}
