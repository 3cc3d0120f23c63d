use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use relaydrop_core::digest::Digest;
use relaydrop_core::error::RelayError;
use relaydrop_core::protocol::{
    MAX_FILENAME_LEN, RELAY_IDENTITY, SENDER_TOKEN, encode_receiver_hello, encode_sender_hello,
};
use relaydrop_engine::client::{receive_file, send_file};
use relaydrop_engine::tcp::{TcpConnector, TcpListenerFactory};
use relaydrop_engine::worker::WorkerOutcome;
use relaydrop_engine::{Relay, RelayConfig, RelayEvent, RelayHandle, ShutdownPolicy, ShutdownReport};

const WAIT: Duration = Duration::from_secs(5);

struct RunningRelay {
    addr: String,
    handle: RelayHandle,
    events: broadcast::Receiver<RelayEvent>,
    task: JoinHandle<ShutdownReport>,
}

impl RunningRelay {
    async fn stop(self) -> ShutdownReport {
        self.handle.shutdown();
        timeout(WAIT, self.task)
            .await
            .expect("relay did not stop in time")
            .unwrap()
    }

    async fn wait_for_pending(&self, n: usize) {
        timeout(WAIT, self.handle.wait_for_pending(n))
            .await
            .expect("timed out waiting for pending count");
    }
}

fn test_config() -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".into(),
        handshake_timeout: Duration::from_secs(2),
        ..RelayConfig::default()
    }
}

async fn start_relay(config: RelayConfig) -> RunningRelay {
    let server = Relay::bind(&TcpListenerFactory, config).await.unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let events = handle.subscribe();
    let task = tokio::spawn(server.run());
    RunningRelay {
        addr,
        handle,
        events,
        task,
    }
}

/// Helper: wait for a specific event, with a timeout.
async fn wait_for_event(
    rx: &mut broadcast::Receiver<RelayEvent>,
    matches_fn: impl Fn(&RelayEvent) -> bool,
) -> RelayEvent {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(ev) if matches_fn(&ev) => return ev,
                Ok(_) => {}
                Err(e) => panic!("event channel error: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ── Raw protocol peers ──────────────────────────────────────────────

async fn raw_connect(addr: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut identity = [0u8; 4];
    stream.read_exact(&mut identity).await.unwrap();
    assert_eq!(identity, RELAY_IDENTITY);
    stream
}

async fn raw_sender(addr: &str, digest: &Digest, filename: &[u8]) -> TcpStream {
    let mut stream = raw_connect(addr).await;
    let mut hello = BytesMut::new();
    encode_sender_hello(digest, filename, &mut hello).unwrap();
    stream.write_all(&hello).await.unwrap();
    stream
}

async fn raw_receiver(addr: &str, digest: &Digest) -> TcpStream {
    let mut stream = raw_connect(addr).await;
    let mut hello = BytesMut::new();
    encode_receiver_hello(digest, &mut hello);
    stream.write_all(&hello).await.unwrap();
    stream
}

/// Reads until the relay closes the connection.
async fn read_until_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut out))
        .await
        .expect("relay did not close the connection")
        .unwrap();
    out
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 253).unwrap()).collect()
}

// ── Transfers ───────────────────────────────────────────────────────

#[tokio::test]
async fn when_files_of_various_sizes_relayed_expect_identical_bytes() {
    let relay = start_relay(test_config()).await;
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();

    for (i, len) in [0usize, 1, 8192, 3 * 8192 + 517].into_iter().enumerate() {
        let name = format!("payload-{len}.bin");
        let src = src_dir.path().join(&name);
        let payload = pattern(len);
        std::fs::write(&src, &payload).unwrap();
        let digest = Digest::from_secret(&format!("size-test-{i}"));

        let addr = relay.addr.clone();
        let sender = tokio::spawn(async move {
            send_file(&TcpConnector, &addr, &digest, &src).await
        });
        relay.wait_for_pending(1).await;

        let received = timeout(
            WAIT,
            receive_file(&TcpConnector, &relay.addr, &digest, dst_dir.path()),
        )
        .await
        .unwrap()
        .unwrap();
        let sent = timeout(WAIT, sender).await.unwrap().unwrap().unwrap();

        assert_eq!(received.path, dst_dir.path().join(&name));
        assert_eq!(received.bytes, len as u64);
        assert_eq!(sent.bytes, len as u64);
        assert_eq!(std::fs::read(&received.path).unwrap(), payload);
        relay.wait_for_pending(0).await;
    }

    relay.stop().await;
}

#[tokio::test]
async fn when_filename_announced_expect_exact_header_on_receiver() {
    let relay = start_relay(test_config()).await;
    let digest = Digest::from_secret("report-secret");

    let mut sender = raw_sender(&relay.addr, &digest, b"report.pdf").await;
    relay.wait_for_pending(1).await;
    let mut receiver = raw_receiver(&relay.addr, &digest).await;

    sender.write_all(b"%PDF-1.7").await.unwrap();
    sender.shutdown().await.unwrap();

    let received = read_until_eof(&mut receiver).await;
    assert_eq!(&received[..2], &10u16.to_be_bytes());
    assert_eq!(&received[2..12], b"report.pdf");
    assert_eq!(&received[12..], b"%PDF-1.7");

    // The relay closes the sender once the receiver has everything.
    assert!(read_until_eof(&mut sender).await.is_empty());
    relay.stop().await;
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn when_digest_consumed_expect_third_connection_to_wait_as_new_sender() {
    let mut relay = start_relay(test_config()).await;
    let digest = Digest::from_secret("only-once");

    let mut first = raw_sender(&relay.addr, &digest, b"a.txt").await;
    relay.wait_for_pending(1).await;
    let mut second = raw_receiver(&relay.addr, &digest).await;
    wait_for_event(&mut relay.events, |e| matches!(e, RelayEvent::Paired { .. })).await;
    relay.wait_for_pending(0).await;

    let _third = raw_sender(&relay.addr, &digest, b"b.txt").await;
    wait_for_event(&mut relay.events, |e| {
        matches!(e, RelayEvent::SenderRegistered { filename, .. } if filename == "b.txt")
    })
    .await;
    assert_eq!(relay.handle.pending_count(), 1);

    first.shutdown().await.unwrap();
    let received = read_until_eof(&mut second).await;
    assert_eq!(&received[2..], b"a.txt");

    let report = relay.stop().await;
    assert_eq!(report.unmatched_closed, 1);
}

#[tokio::test]
async fn when_two_senders_share_a_digest_expect_second_acts_as_receiver() {
    let relay = start_relay(test_config()).await;
    let digest = Digest::from_secret("twin");

    let mut first = raw_sender(&relay.addr, &digest, b"one.txt").await;
    relay.wait_for_pending(1).await;
    let mut second = raw_sender(&relay.addr, &digest, b"two.txt").await;
    relay.wait_for_pending(0).await;

    first.write_all(b"hello").await.unwrap();
    first.shutdown().await.unwrap();
    let received = read_until_eof(&mut second).await;
    assert_eq!(&received[2..9], b"one.txt");
    assert_eq!(&received[9..], b"hello");

    relay.stop().await;
}

#[tokio::test]
async fn when_receiver_has_no_sender_expect_no_peer_without_hanging() {
    let relay = start_relay(test_config()).await;
    let dst_dir = tempfile::tempdir().unwrap();

    let err = timeout(
        WAIT,
        receive_file(
            &TcpConnector,
            &relay.addr,
            &Digest::from_secret("nobody"),
            dst_dir.path(),
        ),
    )
    .await
    .expect("receiver must not hang")
    .unwrap_err();

    assert!(matches!(err, RelayError::NoPeer), "{err}");
    assert_eq!(std::fs::read_dir(dst_dir.path()).unwrap().count(), 0);
    relay.stop().await;
}

// ── Handshake robustness ────────────────────────────────────────────

#[tokio::test]
async fn when_role_token_invalid_expect_closed_and_table_unchanged() {
    let mut relay = start_relay(test_config()).await;
    let digest = Digest::from_secret("keep-me");
    let _waiting = raw_sender(&relay.addr, &digest, b"keep.txt").await;
    relay.wait_for_pending(1).await;

    let mut bogus = raw_connect(&relay.addr).await;
    bogus.write_all(&[0x00, 0x11, 0x22, 0x33]).await.unwrap();
    assert!(read_until_eof(&mut bogus).await.is_empty());

    wait_for_event(&mut relay.events, |e| {
        matches!(e, RelayEvent::HandshakeRejected { .. })
    })
    .await;
    assert_eq!(relay.handle.pending_count(), 1);
    relay.stop().await;
}

#[tokio::test]
async fn when_digest_truncated_expect_closed_and_table_unchanged() {
    let relay = start_relay(test_config()).await;

    let mut short = raw_connect(&relay.addr).await;
    let mut hello = BytesMut::new();
    encode_receiver_hello(&Digest::from_secret("cut"), &mut hello);
    short.write_all(&hello[..12]).await.unwrap();
    short.shutdown().await.unwrap();

    assert!(read_until_eof(&mut short).await.is_empty());
    assert_eq!(relay.handle.pending_count(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn when_filename_length_oversized_expect_closed_and_table_unchanged() {
    let mut relay = start_relay(test_config()).await;

    // The prefix alone is enough for the relay to refuse; no body follows.
    let mut sender = raw_connect(&relay.addr).await;
    let mut hello = SENDER_TOKEN.to_vec();
    hello.extend_from_slice(Digest::from_secret("huge-name").as_bytes());
    hello.extend_from_slice(&u16::try_from(MAX_FILENAME_LEN + 1).unwrap().to_be_bytes());
    sender.write_all(&hello).await.unwrap();

    assert!(read_until_eof(&mut sender).await.is_empty());
    match wait_for_event(&mut relay.events, |ev| {
        matches!(ev, RelayEvent::HandshakeRejected { .. })
    })
    .await
    {
        RelayEvent::HandshakeRejected { reason, .. } => {
            assert!(reason.contains("too long"), "{reason}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(relay.handle.pending_count(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn when_peer_silent_expect_timeout_without_blocking_others() {
    let config = RelayConfig {
        handshake_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let mut relay = start_relay(config).await;

    let mut silent = raw_connect(&relay.addr).await;

    let digest = Digest::from_secret("meanwhile");
    let mut sender = raw_sender(&relay.addr, &digest, b"m.txt").await;
    relay.wait_for_pending(1).await;
    let mut receiver = raw_receiver(&relay.addr, &digest).await;
    sender.write_all(b"ok").await.unwrap();
    sender.shutdown().await.unwrap();
    let received = read_until_eof(&mut receiver).await;
    assert_eq!(&received[7..], b"ok");

    assert!(read_until_eof(&mut silent).await.is_empty());
    let ev = wait_for_event(&mut relay.events, |e| {
        matches!(e, RelayEvent::HandshakeRejected { .. })
    })
    .await;
    if let RelayEvent::HandshakeRejected { reason, .. } = ev {
        assert!(reason.contains("timed out"), "{reason}");
    }
    relay.stop().await;
}

// ── Expiry and shutdown ─────────────────────────────────────────────

#[tokio::test]
async fn when_pending_sender_outlives_ttl_expect_evicted_and_closed() {
    let config = RelayConfig {
        pending_ttl: Some(Duration::from_millis(100)),
        sweep_interval: Duration::from_millis(50),
        ..test_config()
    };
    let mut relay = start_relay(config).await;
    let digest = Digest::from_secret("too-slow");

    let mut sender = raw_sender(&relay.addr, &digest, b"late.txt").await;
    wait_for_event(&mut relay.events, |e| {
        matches!(e, RelayEvent::PendingExpired { .. })
    })
    .await;
    assert!(read_until_eof(&mut sender).await.is_empty());
    relay.wait_for_pending(0).await;
    relay.stop().await;
}

#[tokio::test]
async fn when_shutdown_with_unmatched_sender_expect_sender_sees_eof() {
    let relay = start_relay(test_config()).await;
    let mut sender = raw_sender(&relay.addr, &Digest::from_secret("alone"), b"x").await;
    relay.wait_for_pending(1).await;

    let mut events = relay.handle.subscribe();
    let report = relay.stop().await;

    assert_eq!(report.unmatched_closed, 1);
    assert_eq!(report.workers_cancelled, 0);
    assert!(read_until_eof(&mut sender).await.is_empty());
    wait_for_event(&mut events, |e| {
        matches!(e, RelayEvent::ShutdownComplete { .. })
    })
    .await;
}

#[tokio::test]
async fn when_shutdown_policy_cancel_expect_stuck_worker_cancelled() {
    let config = RelayConfig {
        shutdown_policy: ShutdownPolicy::Cancel,
        ..test_config()
    };
    let mut relay = start_relay(config).await;
    let digest = Digest::from_secret("stuck");

    // The sender never finishes, so the worker would wait forever.
    let _sender = raw_sender(&relay.addr, &digest, b"s.bin").await;
    relay.wait_for_pending(1).await;
    let mut receiver = raw_receiver(&relay.addr, &digest).await;
    wait_for_event(&mut relay.events, |e| matches!(e, RelayEvent::Paired { .. })).await;

    let mut events = relay.handle.subscribe();
    let report = relay.stop().await;
    assert_eq!(report.workers_cancelled, 1);
    assert_eq!(report.workers_reaped, 1);

    let ev = wait_for_event(&mut events, |e| {
        matches!(e, RelayEvent::TransferFinished { .. })
    })
    .await;
    assert!(matches!(
        ev,
        RelayEvent::TransferFinished {
            outcome: WorkerOutcome::Cancelled { .. },
            ..
        }
    ));
    let received = read_until_eof(&mut receiver).await;
    assert_eq!(&received[2..], b"s.bin");
}

#[tokio::test]
async fn when_drain_times_out_expect_remaining_workers_cancelled() {
    let config = RelayConfig {
        shutdown_policy: ShutdownPolicy::Drain {
            timeout: Duration::from_millis(200),
        },
        ..test_config()
    };
    let mut relay = start_relay(config).await;
    let digest = Digest::from_secret("slow-drain");

    let _sender = raw_sender(&relay.addr, &digest, b"d.bin").await;
    relay.wait_for_pending(1).await;
    let _receiver = raw_receiver(&relay.addr, &digest).await;
    wait_for_event(&mut relay.events, |e| matches!(e, RelayEvent::Paired { .. })).await;

    let report = relay.stop().await;
    assert_eq!(report.workers_cancelled, 1);
    assert_eq!(report.workers_reaped, 1);
}

#[tokio::test]
async fn when_drain_finishes_in_time_expect_transfer_completed() {
    let mut relay = start_relay(test_config()).await;
    let digest = Digest::from_secret("finish-me");

    let mut sender = raw_sender(&relay.addr, &digest, b"f.bin").await;
    relay.wait_for_pending(1).await;
    let mut receiver = raw_receiver(&relay.addr, &digest).await;
    wait_for_event(&mut relay.events, |e| matches!(e, RelayEvent::Paired { .. })).await;

    let handle = relay.handle.clone();
    let stopping = tokio::spawn(relay.stop());
    timeout(WAIT, async {
        while !handle.is_shutting_down() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    sender.write_all(b"last words").await.unwrap();
    sender.shutdown().await.unwrap();
    let received = read_until_eof(&mut receiver).await;
    assert_eq!(&received[7..], b"last words");

    let report = stopping.await.unwrap();
    assert_eq!(report.workers_cancelled, 0);
    assert_eq!(report.workers_reaped, 1);
}
