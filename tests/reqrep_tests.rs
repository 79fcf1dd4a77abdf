//! Integration tests for the request/reply pattern

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use shmcomm::{Replier, Requester, ShmError};

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Option<Duration> = Some(Duration::from_secs(1));

    #[test]
    fn test_request_reply_happy_path() {
        let mut replier = Replier::new("it_reqrep_happy").unwrap();
        let mut requester = Requester::new("it_reqrep_happy").unwrap();

        let mut question = BTreeMap::new();
        question.insert("q".to_string(), 1i64);
        requester.send(&question).unwrap();

        let received: BTreeMap<String, i64> = replier.recv(POLL).unwrap().unwrap();
        assert_eq!(received, question);

        let mut answer = BTreeMap::new();
        answer.insert("a".to_string(), 2i64);
        replier.send(&answer).unwrap();

        let reply: BTreeMap<String, i64> = requester.recv(POLL).unwrap();
        assert_eq!(reply, answer);
    }

    #[test]
    fn test_recv_without_reply_times_out() {
        let mut replier = Replier::new("it_reqrep_timeout").unwrap();
        let mut requester = Requester::new("it_reqrep_timeout").unwrap();

        requester.send(&"ping").unwrap();
        // The replier consumes the request but never answers.
        let _request: String = replier.recv(POLL).unwrap().unwrap();

        let start = std::time::Instant::now();
        let err = requester
            .recv::<String>(Some(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, ShmError::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));

        // Timeout returns the requester to idle: a new send works.
        requester.send(&"ping again").unwrap();
    }

    #[test]
    fn test_replier_send_before_recv_is_state_error() {
        let mut replier = Replier::new("it_reqrep_state_rep").unwrap();
        let err = replier.send(&"unsolicited").unwrap_err();
        assert!(matches!(err, ShmError::State { .. }));
    }

    #[test]
    fn test_requester_recv_before_send_is_state_error() {
        let _replier = Replier::new("it_reqrep_state_req").unwrap();
        let mut requester = Requester::new("it_reqrep_state_req").unwrap();
        let err = requester.recv::<String>(POLL).unwrap_err();
        assert!(matches!(err, ShmError::State { .. }));
    }

    #[test]
    fn test_requester_double_send_is_state_error() {
        let _replier = Replier::new("it_reqrep_double_send").unwrap();
        let mut requester = Requester::new("it_reqrep_double_send").unwrap();
        requester.send(&1u64).unwrap();
        let err = requester.send(&2u64).unwrap_err();
        assert!(matches!(err, ShmError::State { .. }));
    }

    #[test]
    fn test_replier_double_recv_is_state_error() {
        let mut replier = Replier::new("it_reqrep_double_recv").unwrap();
        let mut requester = Requester::new("it_reqrep_double_recv").unwrap();
        requester.send(&1u64).unwrap();
        let _request: u64 = replier.recv(POLL).unwrap().unwrap();
        let err = replier.recv::<u64>(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, ShmError::State { .. }));
    }

    #[test]
    fn test_request_convenience_with_echo_server() {
        let mut replier = Replier::new("it_reqrep_echo").unwrap();
        let server = thread::spawn(move || {
            for _ in 0..3 {
                let request: u64 = loop {
                    if let Some(r) = replier.recv(POLL).unwrap() {
                        break r;
                    }
                };
                replier.send(&(request * 10)).unwrap();
            }
        });

        let mut requester = Requester::new("it_reqrep_echo").unwrap();
        for i in 1..=3u64 {
            let reply: u64 = requester.request(&i, POLL).unwrap();
            assert_eq!(reply, i * 10);
        }
        server.join().unwrap();
    }

    #[test]
    fn test_raw_bytes_exchange() {
        let mut replier = Replier::new("it_reqrep_bytes").unwrap();
        let mut requester = Requester::new("it_reqrep_bytes").unwrap();

        requester.send_bytes(&[0x01, 0x02, 0x03]).unwrap();
        let request = replier.recv_bytes(POLL).unwrap().unwrap();
        assert_eq!(request, [0x01, 0x02, 0x03]);

        replier.send_bytes(&[0xFF]).unwrap();
        assert_eq!(requester.recv_bytes(POLL).unwrap(), [0xFF]);
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut replier = Replier::new("it_reqrep_stale").unwrap();
        let mut requester = Requester::new("it_reqrep_stale").unwrap();

        // First exchange times out before the reply lands.
        requester.send_bytes(b"first").unwrap();
        let _request = replier.recv_bytes(POLL).unwrap().unwrap();
        let err = requester.recv_bytes(Some(Duration::from_millis(50)));
        assert!(matches!(err.unwrap_err(), ShmError::Timeout { .. }));

        // The late reply to the first request arrives now.
        replier.send_bytes(b"late reply to first").unwrap();

        // The second exchange must not receive the stale reply.
        requester.send_bytes(b"second").unwrap();
        let _request = replier.recv_bytes(POLL).unwrap().unwrap();
        replier.send_bytes(b"reply to second").unwrap();
        assert_eq!(
            requester.recv_bytes(POLL).unwrap(),
            b"reply to second"
        );
    }

    #[test]
    fn test_replier_owns_both_segments() {
        let replier = Replier::new("it_reqrep_lifecycle").unwrap();
        drop(replier);
        // Both segments are gone, so a requester cannot connect.
        let err = Requester::with_config(
            "it_reqrep_lifecycle",
            shmcomm::AttachConfig::default().with_timeout_connect(Duration::from_millis(100)),
        )
        .unwrap_err();
        assert!(matches!(err, ShmError::Connection { .. }));
    }
}
