//! Transport seam: the point-to-point substrate the session runs on.
//!
//! The session issues calls (`open`, `connect`, `accept`, `send`, `close`, `shutdown`) and the host
//! feeds back whatever the transport reports as [`TransportEvent`]s. Delivery must be
//! ordered and reliable; the protocol adds no sequencing of its own.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::debug;

use crate::address::Address;

/// Transport-scoped identifier of one connection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Something the transport reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Registered under `address` and reachable.
    Ready { address: Address },
    /// A remote endpoint is connecting to us. It stays unopened until accepted or closed.
    Incoming { conn: ConnectionId, from: Address },
    /// The connection can carry data.
    Opened { conn: ConnectionId },
    /// One whole message as sent by the remote side.
    Data { conn: ConnectionId, bytes: Vec<u8> },
    /// The connection is gone.
    Closed { conn: ConnectionId },
    /// Registration or connection failure. `conn` is `None` for registration failures.
    Error {
        conn: Option<ConnectionId>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection is not open")]
    NotOpen,
    #[error("transport is shut down")]
    Closed,
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("outbound queue is full")]
    Busy,
}

/// Capability set the session needs from a point-to-point transport.
pub trait Transport {
    /// Register under `address`, or under a transport-assigned ephemeral address when `None`.
    /// Completion is reported as `Ready` or `Error`.
    fn open(&mut self, address: Option<&Address>) -> Result<(), TransportError>;
    /// Start connecting to `target`. Completion is reported as `Opened` once the remote side
    /// accepts, `Closed` if it refuses, or `Error`.
    fn connect(&mut self, target: &Address) -> Result<ConnectionId, TransportError>;
    /// Let an `Incoming` connection open. Both sides then see `Opened`.
    fn accept(&mut self, conn: ConnectionId);
    /// Hand one whole message to the transport.
    fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>) -> Result<(), TransportError>;
    /// Drop one connection. The remote side sees `Closed`.
    fn close(&mut self, conn: ConnectionId);
    /// Unregister and drop every connection.
    fn shutdown(&mut self);
}

struct Link {
    a: (Address, ConnectionId),
    b: (Address, ConnectionId),
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<Address, Rc<RefCell<VecDeque<TransportEvent>>>>,
    links: Vec<Link>,
    next_conn: u64,
    next_anon: u64,
}

impl Hub {
    fn alloc(&mut self) -> ConnectionId {
        self.next_conn += 1;
        ConnectionId(self.next_conn)
    }

    fn push(&self, address: &Address, event: TransportEvent) {
        if let Some(queue) = self.endpoints.get(address) {
            queue.borrow_mut().push_back(event);
        }
    }

    /// Remote end of `conn` as seen from `local`.
    fn peer_of(&self, local: &Address, conn: ConnectionId) -> Option<(Address, ConnectionId)> {
        self.links.iter().find_map(|l| {
            if l.a.0 == *local && l.a.1 == conn {
                Some(l.b.clone())
            } else if l.b.0 == *local && l.b.1 == conn {
                Some(l.a.clone())
            } else {
                None
            }
        })
    }

    fn unlink(&mut self, local: &Address, conn: ConnectionId) -> Option<(Address, ConnectionId)> {
        let peer = self.peer_of(local, conn)?;
        self.links.retain(|l| {
            !((l.a.0 == *local && l.a.1 == conn) || (l.b.0 == *local && l.b.1 == conn))
        });
        Some(peer)
    }
}

/// In-process address space. Cloning shares the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// New unregistered endpoint on this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.hub.clone(),
            address: None,
            events: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Whether `address` is currently registered.
    pub fn is_registered(&self, address: &Address) -> bool {
        self.hub.borrow().endpoints.contains_key(address)
    }
}

/// Single-threaded loopback transport. Events queue up until the owner polls them.
pub struct MemoryTransport {
    hub: Rc<RefCell<Hub>>,
    address: Option<Address>,
    events: Rc<RefCell<VecDeque<TransportEvent>>>,
}

impl MemoryTransport {
    /// Next pending event, if any.
    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.borrow_mut().pop_front()
    }

    pub fn local_address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    fn local_event(&self, event: TransportEvent) {
        self.events.borrow_mut().push_back(event);
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, address: Option<&Address>) -> Result<(), TransportError> {
        if self.address.is_some() {
            self.shutdown();
        }
        let mut hub = self.hub.borrow_mut();
        let address = match address {
            Some(a) => a.clone(),
            None => {
                hub.next_anon += 1;
                Address::new(format!("anon-{}", hub.next_anon))
            }
        };
        if hub.endpoints.contains_key(&address) {
            drop(hub);
            self.local_event(TransportEvent::Error {
                conn: None,
                reason: format!("address {} is taken", address),
            });
            return Ok(());
        }
        hub.endpoints.insert(address.clone(), self.events.clone());
        drop(hub);
        debug!(%address, "memory transport registered");
        self.address = Some(address.clone());
        self.local_event(TransportEvent::Ready { address });
        Ok(())
    }

    fn connect(&mut self, target: &Address) -> Result<ConnectionId, TransportError> {
        let local = self.address.clone().ok_or(TransportError::Closed)?;
        let mut hub = self.hub.borrow_mut();
        let conn = hub.alloc();
        if !hub.endpoints.contains_key(target) {
            drop(hub);
            self.local_event(TransportEvent::Error {
                conn: Some(conn),
                reason: format!("could not connect to peer {}", target),
            });
            return Ok(conn);
        }
        let remote = hub.alloc();
        hub.links.push(Link {
            a: (local.clone(), conn),
            b: (target.clone(), remote),
        });
        hub.push(
            target,
            TransportEvent::Incoming {
                conn: remote,
                from: local,
            },
        );
        Ok(conn)
    }

    fn accept(&mut self, conn: ConnectionId) {
        let Some(local) = self.address.as_ref() else {
            return;
        };
        let hub = self.hub.borrow();
        let Some((peer, peer_conn)) = hub.peer_of(local, conn) else {
            return;
        };
        hub.push(&peer, TransportEvent::Opened { conn: peer_conn });
        drop(hub);
        self.local_event(TransportEvent::Opened { conn });
    }

    fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let local = self.address.as_ref().ok_or(TransportError::Closed)?;
        let hub = self.hub.borrow();
        let (peer, peer_conn) = hub.peer_of(local, conn).ok_or(TransportError::NotOpen)?;
        hub.push(
            &peer,
            TransportEvent::Data {
                conn: peer_conn,
                bytes,
            },
        );
        Ok(())
    }

    fn close(&mut self, conn: ConnectionId) {
        let Some(local) = self.address.as_ref() else {
            return;
        };
        let mut hub = self.hub.borrow_mut();
        if let Some((peer, peer_conn)) = hub.unlink(local, conn) {
            hub.push(&peer, TransportEvent::Closed { conn: peer_conn });
        }
    }

    fn shutdown(&mut self) {
        let Some(local) = self.address.take() else {
            return;
        };
        let mut hub = self.hub.borrow_mut();
        let mine: Vec<ConnectionId> = hub
            .links
            .iter()
            .filter_map(|l| {
                if l.a.0 == local {
                    Some(l.a.1)
                } else if l.b.0 == local {
                    Some(l.b.1)
                } else {
                    None
                }
            })
            .collect();
        for conn in mine {
            if let Some((peer, peer_conn)) = hub.unlink(&local, conn) {
                hub.push(&peer, TransportEvent::Closed { conn: peer_conn });
            }
        }
        hub.endpoints.remove(&local);
        debug!(address = %local, "memory transport unregistered");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
