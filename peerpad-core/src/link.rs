//! The session's single logical connection, and the only path for outbound messages.

use tracing::debug;

use crate::protocol::Message;
use crate::session::SessionError;
use crate::transport::{ConnectionId, Transport};
use crate::wire;

/// Lifecycle of the one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Connecting,
    Open,
    Closed,
}

/// Owns the transport and at most one bound connection.
pub struct Link<T: Transport> {
    transport: T,
    conn: Option<ConnectionId>,
    state: ConnectionState,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            conn: None,
            state: ConnectionState::Absent,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The bound connection, if any (connecting or open).
    pub fn connection(&self) -> Option<ConnectionId> {
        self.conn
    }

    /// Whether `conn` is the bound connection.
    pub fn is_bound(&self, conn: ConnectionId) -> bool {
        self.conn == Some(conn)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bind `conn` as the session's connection, not yet open.
    pub(crate) fn bind(&mut self, conn: ConnectionId) {
        self.conn = Some(conn);
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
    }

    /// Forget the bound connection without touching the transport (it is already gone).
    pub(crate) fn mark_closed(&mut self) {
        self.conn = None;
        self.state = ConnectionState::Closed;
    }

    /// Close the bound connection and shut the transport down.
    pub(crate) fn teardown(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.close(conn);
        }
        self.transport.shutdown();
        if self.state != ConnectionState::Absent {
            self.state = ConnectionState::Closed;
        }
    }

    /// Reset for a fresh session on the same transport.
    pub(crate) fn reset(&mut self) {
        self.conn = None;
        self.state = ConnectionState::Absent;
    }

    /// Frame and send one message on the open connection.
    pub fn send(&mut self, msg: &Message) -> Result<(), SessionError> {
        let conn = match (self.state, self.conn) {
            (ConnectionState::Open, Some(conn)) => conn,
            _ => return Err(SessionError::NoPeer),
        };
        let frame = wire::encode_frame(msg)?;
        debug!(kind = msg.kind(), bytes = frame.len(), "send");
        self.transport.send(conn, frame)?;
        Ok(())
    }
}
