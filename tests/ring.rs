// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end ring scenarios (§8) exercised over real loopback sockets.
//!
//! Each test uses a disjoint block of peer identifiers so the fixed
//! `50000 + id` port assignment never collides between tests running
//! concurrently in the same process.

use cdht_peer::config::PeerConfig;
use cdht_peer::events::{EventKind, PeerEvent};
use cdht_peer::peer::Peer;
use cdht_peer::wire::DatagramMessage;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::yield_now;
use tokio::time::{timeout, Duration};

struct RunningPeer {
    events: mpsc::UnboundedReceiver<PeerEvent>,
    commands: mpsc::UnboundedSender<String>,
}

async fn spawn_peer(id: u32, s1: u32, s2: u32, show_pings: bool) -> RunningPeer {
    let config = PeerConfig::new(id, s1, s2, show_pings).expect("valid test config");
    let (peer, events) = Peer::new(config);
    let commands = peer.command_sender();
    tokio::spawn(peer.run());
    wait_until_listening(id as u8).await;
    RunningPeer { events, commands }
}

async fn wait_until_listening(id: u8) {
    let port = 50000u16 + u16::from(id);
    for _ in 0..1000 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        // A plain cooperative yield rather than a timed sleep: this helper
        // also runs under `#[tokio::test(start_paused = true)]`, where a
        // real sleep would never wake on its own.
        yield_now().await;
    }
    panic!("peer {id} never started listening on port {port}");
}

async fn expect_event(
    events: &mut mpsc::UnboundedReceiver<PeerEvent>,
    what: &str,
    pred: impl Fn(&PeerEvent) -> bool,
) -> PeerEvent {
    let fut = async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => break event,
                Some(_) => {}
                None => panic!("event channel closed while waiting for: {what}"),
            }
        }
    };
    timeout(Duration::from_secs(3), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}

async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<PeerEvent>, what: &str) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(300), events.recv()).await {
        panic!("expected no further events ({what}), got {event:?}");
    }
}

/// S1: direct owner, one hop away via the NEXTAVAILABLE commit.
#[tokio::test]
async fn test_s1_lookup_direct_owner() {
    let mut p1 = spawn_peer(1, 3, 5, false).await;
    let mut p3 = spawn_peer(3, 5, 1, false).await;
    let _p5 = spawn_peer(5, 1, 3, false).await;

    p1.commands.send("request 0003".to_string()).unwrap();

    expect_event(&mut p1.events, "request forwarded to s1", |e| {
        e.kind == EventKind::Status && e.message.contains("sent to s1")
    })
    .await;

    // peer 3 answers directly without consulting its own ownership check.
    let res = expect_event(&mut p1.events, "FT_RES from peer 3", |e| {
        e.kind == EventKind::FtRes
    })
    .await;
    assert!(res.message.contains("peer 3"));
    assert!(res.message.contains("0003"));

    let _ = p3; // keep peer 3 alive for the duration of the test
}

/// S2: two-hop lookup, NOTAVAILABLE then NEXTAVAILABLE.
#[tokio::test]
async fn test_s2_lookup_two_hop() {
    let mut p11 = spawn_peer(11, 13, 15, false).await;
    let mut p13 = spawn_peer(13, 15, 11, false).await;
    let mut p15 = spawn_peer(15, 11, 13, false).await;

    p11.commands.send("request 0014".to_string()).unwrap();

    expect_event(&mut p11.events, "first hop sent to s1", |e| {
        e.kind == EventKind::Status && e.message.contains("sent to s1")
    })
    .await;

    let res = expect_event(&mut p11.events, "FT_RES from peer 15", |e| {
        e.kind == EventKind::FtRes
    })
    .await;
    assert!(res.message.contains("peer 15"));
    assert!(res.message.contains("0014"));

    assert_quiet(&mut p13.events, "peer 13 should not emit anything else").await;
    assert_quiet(&mut p15.events, "peer 15 should not emit anything else").await;
}

/// S3: local hit, no network traffic at all.
#[tokio::test]
async fn test_s3_local_hit_no_network() {
    let mut p35 = spawn_peer(35, 31, 33, false).await;

    p35.commands.send("request 0035".to_string()).unwrap();

    let event = expect_event(&mut p35.events, "stored locally", |e| {
        e.kind == EventKind::Status
    })
    .await;
    assert!(event.message.contains("stored locally"));

    assert_quiet(&mut p35.events, "no further traffic after a local hit").await;
}

/// S6: malformed request yields a validation warning, no traffic.
#[tokio::test]
async fn test_s6_malformed_request_no_traffic() {
    let mut p45 = spawn_peer(45, 41, 43, false).await;

    p45.commands.send("request 42".to_string()).unwrap();

    let event = expect_event(&mut p45.events, "invalid command warning", |e| {
        e.kind == EventKind::Warning
    })
    .await;
    assert!(event.message.contains("invalid command"));

    assert_quiet(&mut p45.events, "no traffic after a malformed request").await;
}

/// S4: graceful quit stitches the predecessor's successor pair.
///
/// Predecessor learning is simulated with a hand-crafted PING_REQ datagram
/// instead of waiting out a real 5s ping period, keeping the test fast
/// while still exercising the real wire codec and the real actor.
#[tokio::test]
async fn test_s4_graceful_quit_stitching() {
    let mut p61 = spawn_peer(61, 63, 65, false).await;
    let mut p63 = spawn_peer(63, 65, 61, true).await;
    let _p65 = spawn_peer(65, 61, 63, false).await;

    let probe = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    let ping = DatagramMessage::PingReq { sender: 61, seq: 0 };
    probe
        .send_to(&ping.encode(), ("127.0.0.1", 50063))
        .await
        .unwrap();

    // Confirms peer 63 has processed the PING_REQ (and thus learned peer 61
    // as a predecessor) before we ask it to quit.
    expect_event(&mut p63.events, "peer 63 observed the simulated ping", |e| {
        e.kind == EventKind::PingReq
    })
    .await;

    p63.commands.send("quit".to_string()).unwrap();

    let churn = expect_event(&mut p61.events, "peer 61 applies the quit", |e| {
        e.kind == EventKind::PeerChurn
    })
    .await;
    assert!(churn.message.contains("peer 63 departed"));
    assert!(churn.message.contains("65"));
    assert!(churn.message.contains("61"));
}

/// S5: ungraceful failure. The departing peer never sends PC_QUIT at all —
/// repair must come entirely from missed-ping death detection plus the
/// PC_QUERYREQ/PC_QUERYRES exchange. Virtual time is advanced by hand so the
/// test doesn't have to wait out four real 5s ping periods.
#[tokio::test(start_paused = true)]
async fn test_s5_ungraceful_failure_churn_repair() {
    let mut p121 = spawn_peer(121, 123, 125, false).await;
    let _p125 = spawn_peer(125, 121, 123, false).await;
    // peer 123 never starts: nothing ever answers its pings, and nothing
    // ever sends a PC_QUIT on its behalf.

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(5)).await;
        yield_now().await;
    }

    let dead = expect_event(&mut p121.events, "peer 121 declares 123 dead", |e| {
        e.kind == EventKind::PeerChurn && e.message.contains("no longer alive")
    })
    .await;
    assert!(dead.message.contains("123"));

    let repaired = expect_event(
        &mut p121.events,
        "peer 121 repairs its successor pair around the dead peer",
        |e| e.kind == EventKind::PeerChurn && e.message.contains("ring repaired"),
    )
    .await;
    assert!(repaired.message.contains("125"));
}
