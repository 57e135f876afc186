//! End-to-end sync tests over real Unix sockets

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tasksync::protocol::{FrameReader, NotificationCodec, FRAME_DELIMITER};
use tasksync::{
    Coordinator, Error, Notification, NotificationKind, SyncClient, SyncOptions, SyncRole,
    SyncServer,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use common::{eventually, fast_options, Recorder};

async fn started(path: &Path, recorder: &Recorder) -> Coordinator {
    let coordinator = Coordinator::new(fast_options(), path);
    coordinator.set_listener(recorder.listener());
    coordinator.start().await.unwrap();
    coordinator
}

// ─────────────────────────────────────────────────────────────────
// Election
// ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_elects_one_primary() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("race.sock");

    let coordinators: Vec<Arc<Coordinator>> = (0..4)
        .map(|_| Arc::new(Coordinator::new(fast_options(), &path)))
        .collect();

    let results = join_all(coordinators.iter().map(|c| {
        let c = Arc::clone(c);
        tokio::spawn(async move { c.start().await })
    }))
    .await;
    for result in results {
        result.unwrap().unwrap();
    }

    let roles: Vec<SyncRole> = coordinators.iter().map(|c| c.role()).collect();
    assert_eq!(roles.iter().filter(|r| **r == SyncRole::Server).count(), 1);
    assert_eq!(roles.iter().filter(|r| **r == SyncRole::Client).count(), 3);

    let primary = coordinators.iter().find(|c| c.is_primary()).unwrap();
    assert!(eventually(|| primary.peer_count() == 3).await);

    for c in &coordinators {
        c.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_stale_socket_file_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stale.sock");
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

    let recorder = Recorder::default();
    let coordinator = started(&path, &recorder).await;
    assert!(coordinator.is_primary());

    coordinator.stop().await.unwrap();
    assert!(!path.exists());
}

// ─────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fan_out_without_echo() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fan.sock");
    let (ra, rb, rc) = (Recorder::default(), Recorder::default(), Recorder::default());

    let a = started(&path, &ra).await;
    let b = started(&path, &rb).await;
    let c = started(&path, &rc).await;
    assert!(a.is_primary());
    assert!(eventually(|| a.peer_count() == 2).await);

    b.announce(NotificationKind::StatusChanged, 42).await.unwrap();

    assert!(eventually(|| ra.len() == 1 && rc.len() == 1).await);
    for seen in [ra.snapshot(), rc.snapshot()] {
        assert_eq!(seen[0].kind(), NotificationKind::StatusChanged);
        assert_eq!(seen[0].subject_id(), 42);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rb.len(), 0);

    a.announce(NotificationKind::Archived, 7).await.unwrap();
    assert!(eventually(|| rb.len() == 1 && rc.len() == 2).await);
    assert_eq!(ra.len(), 1);

    for co in [&c, &b, &a] {
        co.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_announcements_before_start_keep_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("order.sock");
    let primary_seen = Recorder::default();
    let primary = started(&path, &primary_seen).await;

    let late = Coordinator::new(fast_options(), &path);
    let sequence = [
        (NotificationKind::Created, 1),
        (NotificationKind::TagAdded, 1),
        (NotificationKind::DueDateSet, 1),
        (NotificationKind::Deleted, 1),
    ];
    for (kind, id) in sequence {
        late.announce(kind, id).await.unwrap();
    }
    assert_eq!(late.pending_count(), 4);

    late.start().await.unwrap();
    assert_eq!(late.role(), SyncRole::Client);
    assert_eq!(late.pending_count(), 0);

    assert!(eventually(|| primary_seen.len() == 4).await);
    let kinds: Vec<_> = primary_seen.snapshot().iter().map(|n| n.kind()).collect();
    assert_eq!(kinds, sequence.map(|(kind, _)| kind).to_vec());

    late.stop().await.unwrap();
    primary.stop().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_never_reach_listeners() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pulse.sock");
    let (rp, rs) = (Recorder::default(), Recorder::default());

    let primary = started(&path, &rp).await;
    let secondary = started(&path, &rs).await;
    assert!(eventually(|| primary.peer_count() == 1).await);

    // Several heartbeat intervals
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(rs.len(), 0);
    assert_eq!(rp.len(), 0);
    assert!(secondary.last_external_activity().is_none());

    primary.announce(NotificationKind::Updated, 3).await.unwrap();
    assert!(eventually(|| rs.len() == 1).await);
    assert!(secondary.should_skip_poll(Duration::from_secs(5)));

    secondary.stop().await.unwrap();
    primary.stop().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────
// Failure and recovery
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_secondary_reconnects_after_primary_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("restart.sock");
    let (r1, rs, r2) = (Recorder::default(), Recorder::default(), Recorder::default());

    let first = started(&path, &r1).await;
    let secondary = started(&path, &rs).await;
    assert!(eventually(|| secondary.peer_count() == 1).await);

    first.stop().await.unwrap();
    assert!(eventually(|| secondary.peer_count() == 0).await);
    assert_eq!(secondary.role(), SyncRole::Client);

    let second = started(&path, &r2).await;
    assert!(second.is_primary());
    assert!(eventually(|| second.peer_count() == 1).await);

    second.announce(NotificationKind::Updated, 11).await.unwrap();
    assert!(eventually(|| rs.len() == 1).await);
    assert_eq!(rs.snapshot()[0].subject_id(), 11);

    secondary.announce(NotificationKind::Deleted, 12).await.unwrap();
    assert!(eventually(|| r2.len() == 1).await);

    secondary.stop().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_is_dropped_and_connection_survives() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.sock");
    let recorder = Recorder::default();
    let primary = started(&path, &recorder).await;

    let stream = UnixStream::connect(&path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    assert!(eventually(|| primary.peer_count() == 1).await);

    let mut wire = vec![b'x'; 10 * 1024];
    wire.push(FRAME_DELIMITER);
    wire.extend(
        NotificationCodec::default()
            .encode(&Notification::new(NotificationKind::PriorityChanged, 5))
            .unwrap(),
    );
    write_half.write_all(&wire).await.unwrap();

    assert!(eventually(|| recorder.len() == 1).await);
    assert_eq!(recorder.snapshot()[0].subject_id(), 5);
    assert_eq!(primary.peer_count(), 1);

    // Still registered, so broadcasts keep arriving
    primary.announce(NotificationKind::Created, 6).await.unwrap();
    let mut reader = FrameReader::new(read_half, NotificationCodec::default());
    let got = loop {
        let n = reader.read_notification(Duration::from_secs(2)).await.unwrap();
        if !n.is_heartbeat() {
            break n;
        }
    };
    assert_eq!(got.subject_id(), 6);

    primary.stop().await.unwrap();
}

#[tokio::test]
async fn test_announce_rejects_frame_over_limit() {
    let dir = TempDir::new().unwrap();
    let options = SyncOptions {
        max_frame_size: 32,
        ..fast_options()
    };
    let coordinator = Coordinator::new(options, dir.path().join("limit.sock"));
    coordinator.start().await.unwrap();

    let err = coordinator
        .announce(NotificationKind::Created, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FrameTooLarge { max: 32, .. }));

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_for_both_roles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stop.sock");
    let recorder = Recorder::default();

    let primary = started(&path, &recorder).await;
    let secondary = started(&path, &recorder).await;

    secondary.stop().await.unwrap();
    secondary.stop().await.unwrap();
    primary.stop().await.unwrap();
    primary.stop().await.unwrap();

    primary.announce(NotificationKind::Created, 1).await.unwrap();
    secondary.announce(NotificationKind::Created, 2).await.unwrap();
    assert!(!path.exists());
}

// ─────────────────────────────────────────────────────────────────
// Server and client directly
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_reaches_single_client() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.sock");
    let server = SyncServer::bind(&path, SyncOptions::default(), Recorder::default().listener())
        .await
        .unwrap();

    let reached = server
        .broadcast(Notification::new(NotificationKind::Created, 42))
        .await
        .unwrap();
    assert_eq!(reached, 0);

    let recorder = Recorder::default();
    let client = SyncClient::start(&path, SyncOptions::default(), recorder.listener())
        .await
        .unwrap();
    assert!(eventually(|| server.peer_count() == 1).await);

    let reached = server
        .broadcast(Notification::new(NotificationKind::Created, 42))
        .await
        .unwrap();
    assert_eq!(reached, 1);

    assert!(eventually(|| recorder.len() == 1).await);
    let seen = recorder.snapshot();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind(), NotificationKind::Created);
    assert_eq!(seen[0].subject_id(), 42);

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}
