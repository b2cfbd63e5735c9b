//! Session lifecycle: host a PIN or join one, bind exactly one peer connection, and route
//! inbound messages to the document and file-transfer layers.
//!
//! Host-driven: the owner passes [`TransportEvent`]s in and presents the returned
//! [`SessionEvent`]s. Nothing here blocks or spawns.

use std::io::Read;

use tracing::{debug, info, warn};

use crate::address::{derive_host_address, Address, SessionCode};
use crate::document::DocumentSync;
use crate::link::{ConnectionState, Link};
use crate::protocol::Message;
use crate::transfer::{
    ChunkReceiveResult, CompletedFile, FileTransferEngine, OutboundTransfer, OutgoingFile, SendReport,
};
use crate::transport::{ConnectionId, Transport, TransportError, TransportEvent};
use crate::wire::{self, FrameEncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Hosting,
    Joining,
    Connected,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid PIN: expected 6 digits")]
    InvalidCode,
    #[error("could not connect: {0}")]
    ConnectFailed(String),
    #[error("no peer connected")]
    NoPeer,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("encode: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("reading file: {0}")]
    Read(#[from] std::io::Error),
}

/// What the owner should present after feeding an event in.
#[derive(Debug)]
pub enum SessionEvent {
    /// The peer link is open.
    Connected,
    /// The peer replaced the document.
    DocumentUpdated,
    /// An inbound file was announced.
    TransferStarted { name: String, size: u64 },
    /// Inbound progress in percent; 100 only on completion.
    TransferProgress { percent: f64 },
    /// An inbound file finished; index into [`SessionManager::received_files`].
    FileReceived { index: usize },
    /// An inbound file was dropped because the connection went away.
    TransferAbandoned {
        name: String,
        received: u64,
        size: u64,
    },
    /// A second peer tried to connect and was turned away.
    PeerRejected { from: Address },
    /// The peer went away.
    PeerDisconnected,
    /// Something failed; the session may now be closed.
    Failed(SessionError),
}

/// One session: its state, its single connection, the document and the files.
pub struct SessionManager<T: Transport> {
    state: SessionState,
    role: Option<SessionRole>,
    code: Option<SessionCode>,
    local_address: Option<Address>,
    target: Option<Address>,
    link: Link<T>,
    document: DocumentSync,
    transfers: FileTransferEngine,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            state: SessionState::Idle,
            role: None,
            code: None,
            local_address: None,
            target: None,
            link: Link::new(transport),
            document: DocumentSync::new(),
            transfers: FileTransferEngine::new(),
        }
    }

    /// Host a new session under a fresh PIN. Returns the PIN to show the user.
    pub fn create_session(&mut self) -> Result<SessionCode, SessionError> {
        let code = SessionCode::generate(&mut rand::thread_rng());
        self.host_with_code(code.clone())?;
        Ok(code)
    }

    /// Host under a caller-chosen PIN.
    pub fn host_with_code(&mut self, code: SessionCode) -> Result<(), SessionError> {
        self.reset_for_new_session();
        let address = derive_host_address(&code);
        info!(%address, "hosting session");
        self.link.transport_mut().open(Some(&address))?;
        self.role = Some(SessionRole::Host);
        self.code = Some(code);
        self.local_address = Some(address);
        self.state = SessionState::Hosting;
        Ok(())
    }

    /// Join the host behind `code`. Malformed input fails before the transport is touched.
    pub fn join_session(&mut self, code: &str) -> Result<(), SessionError> {
        let code = SessionCode::parse(code).map_err(|_| SessionError::InvalidCode)?;
        self.reset_for_new_session();
        let target = derive_host_address(&code);
        info!(%target, "joining session");
        self.link.transport_mut().open(None)?;
        self.role = Some(SessionRole::Guest);
        self.code = Some(code);
        self.target = Some(target);
        self.state = SessionState::Joining;
        Ok(())
    }

    /// Close the connection, release the transport and stop.
    pub fn leave(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        info!("leaving session");
        self.transfers.abandon();
        self.link.teardown();
        self.state = SessionState::Closed;
    }

    /// Feed one transport event in; returns what to present.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        match event {
            TransportEvent::Ready { address } => self.on_ready(address, &mut out),
            TransportEvent::Incoming { conn, from } => self.on_incoming(conn, from, &mut out),
            TransportEvent::Opened { conn } => self.on_opened(conn, &mut out),
            TransportEvent::Data { conn, bytes } => {
                if self.link.is_bound(conn) && self.link.is_open() {
                    self.on_data(&bytes, &mut out);
                } else {
                    debug!(?conn, "data on unbound connection ignored");
                }
            }
            TransportEvent::Closed { conn } => self.on_closed(conn, &mut out),
            TransportEvent::Error { conn, reason } => self.on_error(conn, reason, &mut out),
        }
        out
    }

    /// Replace the document and push it to the peer when connected.
    pub fn apply_local_edit(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        self.document.apply_local_edit(text, &mut self.link)?;
        Ok(())
    }

    /// Set the document without sending it; it is handed over when the connection opens.
    pub fn seed_document(&mut self, text: impl Into<String>) {
        self.document.seed(text);
    }

    /// Stream a file to the peer.
    pub fn send_file(&mut self, file: &OutgoingFile) -> Result<SendReport, SessionError> {
        self.transfers.send_file(file, &mut self.link)
    }

    /// Stream `size` bytes read from `source` to the peer.
    pub fn send_from<R: Read>(
        &mut self,
        name: &str,
        mime: &str,
        size: u64,
        source: R,
    ) -> Result<SendReport, SessionError> {
        self.transfers.send_from(name, mime, size, source, &mut self.link)
    }

    /// Announce a file; follow with [`send_next_chunk`](Self::send_next_chunk) until done.
    pub fn start_file(&mut self, name: &str, mime: &str, size: u64) -> Result<OutboundTransfer, SessionError> {
        self.transfers.start_file(name, mime, size, &mut self.link)
    }

    /// Send one more chunk of `transfer`. Returns whether the file is done.
    pub fn send_next_chunk<R: Read>(
        &mut self,
        transfer: &mut OutboundTransfer,
        source: &mut R,
    ) -> Result<bool, SessionError> {
        self.transfers.send_next_chunk(transfer, source, &mut self.link)
    }

    /// Send a raw protocol message on the open connection.
    pub fn send(&mut self, msg: &Message) -> Result<(), SessionError> {
        self.link.send(msg)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<SessionRole> {
        self.role
    }

    pub fn code(&self) -> Option<&SessionCode> {
        self.code.as_ref()
    }

    pub fn local_address(&self) -> Option<&Address> {
        self.local_address.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn document(&self) -> &str {
        self.document.text()
    }

    pub fn progress(&self) -> Option<f64> {
        self.transfers.progress()
    }

    pub fn transfers(&self) -> &FileTransferEngine {
        &self.transfers
    }

    pub fn received_files(&self) -> &[CompletedFile] {
        self.transfers.received_files()
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    fn reset_for_new_session(&mut self) {
        if !matches!(self.state, SessionState::Idle | SessionState::Closed) {
            self.leave();
        }
        self.transfers.abandon();
        self.link.reset();
        self.role = None;
        self.code = None;
        self.local_address = None;
        self.target = None;
    }

    fn on_ready(&mut self, address: Address, out: &mut Vec<SessionEvent>) {
        debug!(%address, "transport ready");
        self.local_address = Some(address);
        if self.state != SessionState::Joining || self.link.connection().is_some() {
            return;
        }
        let Some(target) = self.target.clone() else {
            return;
        };
        match self.link.transport_mut().connect(&target) {
            Ok(conn) => self.link.bind(conn),
            Err(e) => self.fail_connect(e.to_string(), out),
        }
    }

    fn on_incoming(&mut self, conn: ConnectionId, from: Address, out: &mut Vec<SessionEvent>) {
        let accepting = self.role == Some(SessionRole::Host)
            && self.state == SessionState::Hosting
            && self.link.connection().is_none();
        if !accepting {
            warn!(%from, ?conn, "rejecting extra peer");
            self.link.transport_mut().close(conn);
            out.push(SessionEvent::PeerRejected { from });
            return;
        }
        info!(%from, ?conn, "peer connecting");
        self.link.bind(conn);
        self.link.transport_mut().accept(conn);
    }

    fn on_opened(&mut self, conn: ConnectionId, out: &mut Vec<SessionEvent>) {
        if !self.link.is_bound(conn) || self.link.is_open() {
            return;
        }
        self.link.mark_open();
        self.state = SessionState::Connected;
        info!(?conn, "connected");
        out.push(SessionEvent::Connected);
        if let Err(e) = self.document.sync_on_connect(&mut self.link) {
            out.push(SessionEvent::Failed(e));
        }
    }

    fn on_data(&mut self, bytes: &[u8], out: &mut Vec<SessionEvent>) {
        let msg = match wire::decode_frame(bytes) {
            Ok((msg, _)) => msg,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "dropping undecodable frame");
                return;
            }
        };
        debug!(kind = msg.kind(), "received");
        match msg {
            Message::CodeUpdate { code } => {
                self.document.apply_remote_update(code);
                out.push(SessionEvent::DocumentUpdated);
            }
            Message::FileMeta { name, size, mime } => {
                out.push(SessionEvent::TransferStarted {
                    name: name.clone(),
                    size,
                });
                if let Some(index) = self.transfers.on_file_meta(name, size, mime) {
                    out.push(SessionEvent::TransferProgress { percent: 100.0 });
                    out.push(SessionEvent::FileReceived { index });
                }
            }
            Message::FileChunk { chunk } => match self.transfers.on_file_chunk(chunk) {
                ChunkReceiveResult::Discarded => {}
                ChunkReceiveResult::InProgress { percent } => {
                    out.push(SessionEvent::TransferProgress { percent });
                }
                ChunkReceiveResult::Complete { index } => {
                    out.push(SessionEvent::TransferProgress { percent: 100.0 });
                    out.push(SessionEvent::FileReceived { index });
                }
            },
        }
    }

    fn on_closed(&mut self, conn: ConnectionId, out: &mut Vec<SessionEvent>) {
        if !self.link.is_bound(conn) {
            return;
        }
        let was_open = self.link.is_open();
        self.link.mark_closed();
        if let Some(t) = self.transfers.abandon() {
            out.push(SessionEvent::TransferAbandoned {
                name: t.name.clone(),
                received: t.received_size(),
                size: t.declared_size,
            });
        }
        if was_open {
            info!(?conn, "peer disconnected");
            self.link.teardown();
            self.state = SessionState::Closed;
            out.push(SessionEvent::PeerDisconnected);
        } else if self.role == Some(SessionRole::Guest) {
            self.fail_connect("connection closed before opening".into(), out);
        } else {
            // Host keeps waiting for another guest.
            debug!(?conn, "pending peer went away");
            self.link.reset();
        }
    }

    fn on_error(&mut self, conn: Option<ConnectionId>, reason: String, out: &mut Vec<SessionEvent>) {
        warn!(?conn, %reason, "transport error");
        match (self.state, conn) {
            (SessionState::Joining, _) => self.fail_connect(reason, out),
            (SessionState::Hosting, None) => {
                self.link.teardown();
                self.state = SessionState::Closed;
                out.push(SessionEvent::Failed(SessionError::Transport(
                    TransportError::Unavailable(reason),
                )));
            }
            (SessionState::Connected, Some(c)) if self.link.is_bound(c) => {
                self.on_closed(c, out);
            }
            _ => {}
        }
    }

    fn fail_connect(&mut self, reason: String, out: &mut Vec<SessionEvent>) {
        self.link.teardown();
        self.state = SessionState::Closed;
        out.push(SessionEvent::Failed(SessionError::ConnectFailed(reason)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, MemoryTransport};

    /// Transport that records calls; used to prove input validation happens first.
    #[derive(Default)]
    struct CountingTransport {
        calls: usize,
    }

    impl Transport for CountingTransport {
        fn open(&mut self, _: Option<&Address>) -> Result<(), TransportError> {
            self.calls += 1;
            Ok(())
        }
        fn connect(&mut self, _: &Address) -> Result<ConnectionId, TransportError> {
            self.calls += 1;
            Ok(ConnectionId(1))
        }
        fn send(&mut self, _: ConnectionId, _: Vec<u8>) -> Result<(), TransportError> {
            self.calls += 1;
            Ok(())
        }
        fn accept(&mut self, _: ConnectionId) {
            self.calls += 1;
        }
        fn close(&mut self, _: ConnectionId) {
            self.calls += 1;
        }
        fn shutdown(&mut self) {
            self.calls += 1;
        }
    }

    fn pump(sessions: &mut [&mut SessionManager<MemoryTransport>]) -> Vec<Vec<SessionEvent>> {
        let mut all: Vec<Vec<SessionEvent>> = sessions.iter().map(|_| Vec::new()).collect();
        loop {
            let mut progressed = false;
            for (i, s) in sessions.iter_mut().enumerate() {
                while let Some(ev) = s.transport_mut().poll_event() {
                    progressed = true;
                    all[i].extend(s.handle_event(ev));
                }
            }
            if !progressed {
                return all;
            }
        }
    }

    #[test]
    fn join_rejects_malformed_code_without_transport() {
        let mut session = SessionManager::new(CountingTransport::default());
        for bad in ["", "12345", "1234567", "abcdef", "12 456"] {
            assert!(matches!(
                session.join_session(bad),
                Err(SessionError::InvalidCode)
            ));
        }
        assert_eq!(session.transport().calls, 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn host_and_guest_connect() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        assert_eq!(host.state(), SessionState::Hosting);
        guest.join_session(code.as_str()).unwrap();
        assert_eq!(guest.state(), SessionState::Joining);

        let events = pump(&mut [&mut host, &mut guest]);
        assert!(events[0].iter().any(|e| matches!(e, SessionEvent::Connected)));
        assert!(events[1].iter().any(|e| matches!(e, SessionEvent::Connected)));
        assert!(host.is_connected());
        assert!(guest.is_connected());
        assert_eq!(host.role(), Some(SessionRole::Host));
        assert_eq!(guest.role(), Some(SessionRole::Guest));
        assert_eq!(host.connection_state(), ConnectionState::Open);
    }

    #[test]
    fn second_guest_is_rejected() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let mut intruder = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        pump(&mut [&mut host, &mut guest]);

        intruder.join_session(code.as_str()).unwrap();
        let events = pump(&mut [&mut host, &mut guest, &mut intruder]);
        assert!(events[0]
            .iter()
            .any(|e| matches!(e, SessionEvent::PeerRejected { .. })));
        assert!(matches!(
            events[2].as_slice(),
            [SessionEvent::Failed(SessionError::ConnectFailed(_))]
        ));
        assert!(host.is_connected());
        assert!(guest.is_connected());
        assert_eq!(intruder.state(), SessionState::Closed);
    }

    #[test]
    fn join_unknown_pin_fails_to_connect() {
        let net = MemoryNetwork::new();
        let mut guest = SessionManager::new(net.transport());
        guest.join_session("123456").unwrap();
        let events = pump(&mut [&mut guest]);
        assert!(matches!(
            events[0].as_slice(),
            [SessionEvent::Failed(SessionError::ConnectFailed(_))]
        ));
        assert_eq!(guest.state(), SessionState::Closed);
    }

    #[test]
    fn taken_pin_fails_hosting() {
        let net = MemoryNetwork::new();
        let mut first = SessionManager::new(net.transport());
        let mut second = SessionManager::new(net.transport());
        let code = SessionCode::parse("424242").unwrap();
        first.host_with_code(code.clone()).unwrap();
        second.host_with_code(code).unwrap();
        let events = pump(&mut [&mut first, &mut second]);
        assert!(events[0].is_empty());
        assert!(matches!(
            events[1].as_slice(),
            [SessionEvent::Failed(SessionError::Transport(
                TransportError::Unavailable(_)
            ))]
        ));
        assert_eq!(first.state(), SessionState::Hosting);
        assert_eq!(second.state(), SessionState::Closed);
    }

    #[test]
    fn seeded_guest_hands_document_to_empty_host() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.seed_document("print(1)");
        guest.join_session(code.as_str()).unwrap();
        let events = pump(&mut [&mut host, &mut guest]);
        assert_eq!(host.document(), "print(1)");
        assert!(events[0]
            .iter()
            .any(|e| matches!(e, SessionEvent::DocumentUpdated)));
        assert!(!events[1]
            .iter()
            .any(|e| matches!(e, SessionEvent::DocumentUpdated)));
    }

    #[test]
    fn seeded_host_hands_document_to_fresh_guest() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        host.seed_document("fn main() {}");
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        let events = pump(&mut [&mut host, &mut guest]);
        assert_eq!(guest.document(), "fn main() {}");
        assert_eq!(host.document(), "fn main() {}");
        assert!(events[1]
            .iter()
            .any(|e| matches!(e, SessionEvent::DocumentUpdated)));
        assert!(!events[0]
            .iter()
            .any(|e| matches!(e, SessionEvent::DocumentUpdated)));
    }

    #[test]
    fn guest_closed_before_opening_fails_to_connect() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        // The guest dials; the host goes away before it ever looks at the connection.
        pump(&mut [&mut guest]);
        assert_eq!(guest.state(), SessionState::Joining);
        host.leave();

        let events = pump(&mut [&mut guest]);
        assert!(matches!(
            events[0].as_slice(),
            [SessionEvent::Failed(SessionError::ConnectFailed(_))]
        ));
        assert_eq!(guest.state(), SessionState::Closed);
        assert!(!guest.is_connected());
    }

    #[test]
    fn guest_closed_while_connecting_fails() {
        let mut guest = SessionManager::new(CountingTransport::default());
        guest.join_session("314159").unwrap();
        let events = guest.handle_event(TransportEvent::Ready {
            address: Address::new("anon-1"),
        });
        assert!(events.is_empty());
        assert_eq!(guest.connection_state(), ConnectionState::Connecting);

        let events = guest.handle_event(TransportEvent::Closed { conn: ConnectionId(1) });
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Failed(SessionError::ConnectFailed(_))]
        ));
        assert_eq!(guest.state(), SessionState::Closed);
    }

    #[test]
    fn disconnect_abandons_transfer_and_closes() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        pump(&mut [&mut host, &mut guest]);

        host.send(&Message::FileMeta {
            name: "half.bin".into(),
            size: 100,
            mime: "application/octet-stream".into(),
        })
        .unwrap();
        host.send(&Message::FileChunk { chunk: vec![0; 40] }).unwrap();
        pump(&mut [&mut host, &mut guest]);
        assert_eq!(guest.progress(), Some(40.0));

        guest.apply_local_edit("kept").unwrap();
        host.leave();
        assert_eq!(host.state(), SessionState::Closed);
        let events = pump(&mut [&mut host, &mut guest]);
        assert!(events[1].iter().any(|e| matches!(
            e,
            SessionEvent::TransferAbandoned { received: 40, size: 100, .. }
        )));
        assert!(events[1]
            .iter()
            .any(|e| matches!(e, SessionEvent::PeerDisconnected)));
        assert_eq!(guest.state(), SessionState::Closed);
        assert_eq!(guest.progress(), None);
        assert!(guest.received_files().is_empty());
        assert_eq!(guest.document(), "kept");
    }

    fn connected_pair(net: &MemoryNetwork) -> (SessionManager<MemoryTransport>, SessionManager<MemoryTransport>) {
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        pump(&mut [&mut host, &mut guest]);
        assert!(host.is_connected() && guest.is_connected());
        (host, guest)
    }

    #[test]
    fn streamed_file_is_read_one_chunk_at_a_time() {
        let net = MemoryNetwork::new();
        let (mut host, mut guest) = connected_pair(&net);
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 253) as u8).collect();
        let mut source = std::io::Cursor::new(data.clone());

        let mut transfer = host.start_file("big.bin", "application/octet-stream", 40_000).unwrap();
        assert_eq!(source.position(), 0);
        let mut positions = Vec::new();
        while !host.send_next_chunk(&mut transfer, &mut source).unwrap() {
            positions.push(source.position());
        }
        positions.push(source.position());
        assert_eq!(positions, vec![16_384, 32_768, 40_000]);
        assert_eq!(transfer.report(), SendReport { chunks: 3, bytes: 40_000 });

        pump(&mut [&mut host, &mut guest]);
        assert_eq!(guest.received_files()[0].data, data);
    }

    #[test]
    fn source_shorter_than_announced_size_fails() {
        let net = MemoryNetwork::new();
        let (mut host, mut guest) = connected_pair(&net);
        let shrunk = vec![1u8; 20_000];
        assert!(matches!(
            host.send_from("shrunk.bin", "application/octet-stream", 40_000, shrunk.as_slice()),
            Err(SessionError::Read(_))
        ));
        pump(&mut [&mut host, &mut guest]);
        assert_eq!(guest.progress(), Some(40.96));
        assert!(guest.received_files().is_empty());
        assert!(host.is_connected());
    }

    #[test]
    fn send_without_peer_is_no_peer() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        host.create_session().unwrap();
        pump(&mut [&mut host]);
        assert!(matches!(
            host.send_file(&OutgoingFile::untyped("a", vec![1])),
            Err(SessionError::NoPeer)
        ));
        assert!(matches!(
            host.send(&Message::CodeUpdate { code: "x".into() }),
            Err(SessionError::NoPeer)
        ));
        host.apply_local_edit("offline edit").unwrap();
        assert_eq!(host.document(), "offline edit");
    }

    #[test]
    fn undecodable_frame_is_dropped() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let mut guest = SessionManager::new(net.transport());
        let code = host.create_session().unwrap();
        guest.join_session(code.as_str()).unwrap();
        pump(&mut [&mut host, &mut guest]);

        let conn = guest.link.connection().unwrap();
        guest.transport_mut().send(conn, vec![1, 2, 3]).unwrap();
        let events = pump(&mut [&mut host, &mut guest]);
        assert!(events[0].is_empty());
        assert!(host.is_connected());
    }

    #[test]
    fn new_session_replaces_old_one() {
        let net = MemoryNetwork::new();
        let mut host = SessionManager::new(net.transport());
        let first = SessionCode::parse("111111").unwrap();
        let second = SessionCode::parse("222222").unwrap();
        host.host_with_code(first.clone()).unwrap();
        pump(&mut [&mut host]);
        host.host_with_code(second.clone()).unwrap();
        pump(&mut [&mut host]);
        assert!(!net.is_registered(&derive_host_address(&first)));
        assert!(net.is_registered(&derive_host_address(&second)));
        assert_eq!(host.state(), SessionState::Hosting);
        assert_eq!(host.code(), Some(&second));
    }
}
