use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netprobe::cancel::Cancellation;
use netprobe::config::PingConfig;
use netprobe::error::Error;
use netprobe::ping::Pinger;

mod common;
use common::{Buffer, FakeConn};

const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));

fn config(count: Option<u64>) -> PingConfig {
    PingConfig {
        target: TARGET.to_string(),
        count,
        interval: Duration::from_millis(100),
        deadline: Some(Duration::from_millis(100)),
        ..Default::default()
    }
}

/// Answer each echo request with an echo reply carrying the same id, sequence and payload.
fn echo_conn() -> FakeConn {
    FakeConn::new(true, |request, dst_addr, _| {
        let mut reply = request.to_vec();
        reply[0] = 0;
        Some((dst_addr, reply))
    })
}

#[test]
fn test_count_limits_requests() {
    let buffer = Buffer::default();
    let conn = Arc::new(echo_conn());
    let pinger = Pinger::with_output(config(Some(4)), Box::new(buffer.clone()));
    let start = Instant::now();
    let summary = pinger
        .run_on(conn.clone(), TARGET, &Cancellation::new())
        .unwrap();
    // Requests are one interval apart.
    assert!(start.elapsed() >= Duration::from_millis(300));

    assert_eq!(summary.send.sent, 4);
    assert_eq!(summary.receive.received, 4);
    assert_eq!(summary.loss_percent(), 0);

    let written = conn.written.lock().unwrap();
    assert_eq!(written.len(), 4);
    let sequences: Vec<u16> = written
        .iter()
        .map(|(_, packet)| u16::from_be_bytes([packet[6], packet[7]]))
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    let output = buffer.contents();
    for sequence in 1..=4 {
        assert!(output.contains(&format!(
            "64 bytes from 93.184.216.34: icmp_seq={sequence} ttl=60 time="
        )));
    }
    assert!(output.contains("\n--- 93.184.216.34 ping statistics ---\n"));
    assert!(output.contains("4 packets transmitted, 4 packets received, 0% packet loss"));
}

#[test]
fn test_silent_target() {
    let buffer = Buffer::default();
    let conn = Arc::new(FakeConn::new(true, |_, _, _| None));
    let pinger = Pinger::with_output(config(Some(2)), Box::new(buffer.clone()));
    let summary = pinger.run_on(conn, TARGET, &Cancellation::new()).unwrap();

    assert_eq!(summary.loss_percent(), 100);
    assert!(buffer
        .contents()
        .contains("2 packets transmitted, 0 packets received, 100% packet loss"));
    assert!(buffer
        .contents()
        .contains("round-trip min/avg/max/mdev = 0.000/0.000/0.000/0.000 ms"));
}

#[test]
fn test_truncated_errors_are_dropped() {
    // Destination Unreachable quoting an IPv4 header and only 4 datagram bytes.
    let mut truncated = vec![3, 3, 0, 0, 0, 0, 0, 0, 0x45];
    truncated.resize(8 + 24, 0);
    let buffer = Buffer::default();
    let conn = Arc::new(echo_conn().with_preamble(truncated));
    let pinger = Pinger::with_output(config(Some(3)), Box::new(buffer.clone()));
    let summary = pinger.run_on(conn, TARGET, &Cancellation::new()).unwrap();

    assert_eq!(summary.send.sent, 3);
    assert_eq!(summary.receive.received, 3);
    assert!(buffer
        .contents()
        .contains("3 packets transmitted, 3 packets received, 0% packet loss"));
}

#[test]
fn test_other_process_replies_are_ignored() {
    let buffer = Buffer::default();
    let conn = Arc::new(FakeConn::new(true, |request, dst_addr, _| {
        let mut reply = request.to_vec();
        reply[0] = 0;
        // Another identifier.
        reply[4] ^= 0xff;
        Some((dst_addr, reply))
    }));
    let pinger = Pinger::with_output(config(Some(2)), Box::new(buffer.clone()));
    let summary = pinger.run_on(conn, TARGET, &Cancellation::new()).unwrap();
    assert_eq!(summary.receive.received, 0);
}

#[test]
fn test_cancellation_prints_summary() {
    let buffer = Buffer::default();
    let conn = Arc::new(echo_conn());
    let pinger = Pinger::with_output(config(None), Box::new(buffer.clone()));
    let cancel = Cancellation::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(350));
            cancel.cancel();
        })
    };
    let summary = pinger.run_on(conn, TARGET, &cancel).unwrap();
    canceller.join().unwrap();

    assert!(summary.send.sent >= 1);
    assert!(buffer.contents().contains("ping statistics"));
}

#[test]
fn test_invalid_config() {
    let config = PingConfig {
        target: String::new(),
        ..Default::default()
    };
    assert!(Pinger::new(config).run(&Cancellation::new()).is_err());
}

#[test]
fn test_invalid_config_on_connection() {
    let conn = Arc::new(echo_conn());
    let config = PingConfig {
        ttl: 0,
        ..config(Some(1))
    };
    let error = Pinger::new(config)
        .run_on(conn.clone(), TARGET, &Cancellation::new())
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::BadConfig(_))
    ));
    assert!(conn.written.lock().unwrap().is_empty());
}
