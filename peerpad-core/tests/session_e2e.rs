//! End-to-end scenarios: two sessions paired over an in-process network.

use chrono::{Duration, TimeZone, Utc};
use peerpad_core::store::{ManualClock, MemoryStore};
use peerpad_core::transport::{MemoryNetwork, MemoryTransport};
use peerpad_core::{
    decode_frame, derive_host_address, Message, OutgoingFile, RemoteStore, SessionCode,
    SessionEvent, SessionManager, SessionState, StoreError, StoredPayload, Transport,
    TransportEvent, CHUNK_SIZE,
};

type Session = SessionManager<MemoryTransport>;

/// Deliver queued transport events until every queue is empty.
fn pump(host: &mut Session, guest: &mut Session) -> (Vec<SessionEvent>, Vec<SessionEvent>) {
    let (mut h, mut g) = (Vec::new(), Vec::new());
    loop {
        let mut progressed = false;
        while let Some(ev) = host.transport_mut().poll_event() {
            progressed = true;
            h.extend(host.handle_event(ev));
        }
        while let Some(ev) = guest.transport_mut().poll_event() {
            progressed = true;
            g.extend(guest.handle_event(ev));
        }
        if !progressed {
            return (h, g);
        }
    }
}

fn paired(net: &MemoryNetwork) -> (Session, Session) {
    let mut host = SessionManager::new(net.transport());
    let mut guest = SessionManager::new(net.transport());
    host.host_with_code(SessionCode::parse("482913").unwrap())
        .unwrap();
    guest.join_session("482913").unwrap();
    pump(&mut host, &mut guest);
    (host, guest)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[test]
fn host_edit_reaches_guest() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    assert_eq!(host.state(), SessionState::Connected);
    assert_eq!(guest.state(), SessionState::Connected);

    host.apply_local_edit("hello").unwrap();
    let (_, guest_events) = pump(&mut host, &mut guest);
    assert_eq!(guest.document(), "hello");
    assert!(matches!(
        guest_events.as_slice(),
        [SessionEvent::DocumentUpdated]
    ));
}

#[test]
fn remote_update_wins_over_local_edit() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    guest.apply_local_edit("A").unwrap();
    host.apply_local_edit("B").unwrap();
    pump(&mut host, &mut guest);
    // Each side ends with whatever arrived last from the other.
    assert_eq!(guest.document(), "B");
    assert_eq!(host.document(), "A");

    guest.apply_local_edit("A2").unwrap();
    pump(&mut host, &mut guest);
    assert_eq!(host.document(), "A2");
    assert_eq!(guest.document(), "A2");
}

#[test]
fn file_of_40000_bytes_reports_progress_and_completes() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    let file = OutgoingFile::new("data.bin", "application/octet-stream", pattern(40_000));

    let report = host.send_file(&file).unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.bytes, 40_000);

    let (_, events) = pump(&mut host, &mut guest);
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::TransferProgress { percent } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![40.96, 81.92, 100.0]);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::TransferStarted { size: 40_000, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::FileReceived { index: 0 })
    ));

    let received = guest.received_files();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].name, "data.bin");
    assert_eq!(received[0].size, 40_000);
    assert_eq!(received[0].data, file.data);
    assert_eq!(guest.progress(), None);
}

#[test]
fn wire_carries_meta_then_ordered_chunks() {
    let net = MemoryNetwork::new();
    let mut host = SessionManager::new(net.transport());
    let code = SessionCode::parse("135790").unwrap();
    host.host_with_code(code.clone()).unwrap();

    // Raw peer so the frames themselves can be inspected.
    let mut raw = net.transport();
    raw.open(None).unwrap();
    let conn = raw.connect(&derive_host_address(&code)).unwrap();
    while let Some(ev) = host.transport_mut().poll_event() {
        host.handle_event(ev);
    }
    assert!(host.is_connected());

    for size in [0usize, 1, CHUNK_SIZE, CHUNK_SIZE + 1, 40_000, 5 * CHUNK_SIZE - 3] {
        host.send_file(&OutgoingFile::untyped("f", pattern(size)))
            .unwrap();
        let mut frames = Vec::new();
        while let Some(ev) = raw.poll_event() {
            if let TransportEvent::Data { conn: c, bytes } = ev {
                assert_eq!(c, conn);
                frames.push(decode_frame(&bytes).unwrap().0);
            }
        }
        let expected = size.div_ceil(CHUNK_SIZE);
        assert_eq!(frames.len(), expected + 1);
        assert_eq!(
            frames[0],
            Message::FileMeta {
                name: "f".into(),
                size: size as u64,
                mime: "application/octet-stream".into()
            }
        );
        let mut rebuilt = Vec::new();
        for (i, m) in frames[1..].iter().enumerate() {
            match m {
                Message::FileChunk { chunk } => {
                    if i + 1 < expected {
                        assert_eq!(chunk.len(), CHUNK_SIZE);
                    } else {
                        assert_eq!(chunk.len(), size - CHUNK_SIZE * (expected - 1));
                    }
                    rebuilt.extend_from_slice(chunk);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        assert_eq!(rebuilt, pattern(size));
    }
}

#[test]
fn stray_chunks_after_completion_change_nothing() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    host.send_file(&OutgoingFile::untyped("one.txt", b"abc".to_vec()))
        .unwrap();
    pump(&mut host, &mut guest);
    assert_eq!(guest.received_files().len(), 1);

    host.send(&Message::FileChunk {
        chunk: b"zzz".to_vec(),
    })
    .unwrap();
    let (_, events) = pump(&mut host, &mut guest);
    assert!(events.is_empty());
    assert_eq!(guest.received_files().len(), 1);
    assert_eq!(guest.received_files()[0].data, b"abc".to_vec());
    assert_eq!(guest.progress(), None);
}

#[test]
fn files_flow_both_ways_and_accumulate() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    guest
        .send_file(&OutgoingFile::new("a.txt", "text/plain", b"from guest".to_vec()))
        .unwrap();
    host.send_file(&OutgoingFile::untyped("b.bin", pattern(20_000)))
        .unwrap();
    host.send_file(&OutgoingFile::untyped("c.bin", pattern(10)))
        .unwrap();
    pump(&mut host, &mut guest);

    assert_eq!(host.received_files().len(), 1);
    assert_eq!(host.received_files()[0].mime, "text/plain");
    let names: Vec<&str> = guest
        .received_files()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["b.bin", "c.bin"]);
}

#[test]
fn guest_leaving_closes_host() {
    let net = MemoryNetwork::new();
    let (mut host, mut guest) = paired(&net);
    guest.leave();
    let (host_events, _) = pump(&mut host, &mut guest);
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerDisconnected)));
    assert_eq!(host.state(), SessionState::Closed);
    assert!(!net.is_registered(&derive_host_address(
        &SessionCode::parse("482913").unwrap()
    )));
}

#[test]
fn store_load_seeds_a_new_session() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    let mut store = RemoteStore::with_clock(MemoryStore::new(), clock.clone());
    let code = store.save_snippet("print(1)", "python").unwrap();
    assert_eq!(code.as_str().len(), 6);

    let item = store.load(code.as_str()).unwrap();
    let StoredPayload::Snippet { content, .. } = item.payload else {
        panic!("expected snippet");
    };
    assert_eq!(content, "print(1)");

    let net = MemoryNetwork::new();
    let mut host = SessionManager::new(net.transport());
    let mut guest = SessionManager::new(net.transport());
    guest.seed_document(content);
    let pin = host.create_session().unwrap();
    guest.join_session(pin.as_str()).unwrap();
    pump(&mut host, &mut guest);
    assert_eq!(host.document(), "print(1)");

    clock.advance(Duration::hours(72) + Duration::seconds(1));
    assert!(matches!(store.load(code.as_str()), Err(StoreError::Expired)));
    assert!(matches!(store.load("ZZZZZZ"), Err(StoreError::NotFound)));
}
