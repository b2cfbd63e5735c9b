//! PeerPad protocol reference implementation.
//! Host-driven: no I/O; host passes transport events in and presents session events.

pub mod address;
pub mod document;
pub mod link;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use address::{derive_host_address, Address, SessionCode};
pub use protocol::{Message, CHUNK_SIZE};
pub use session::{SessionError, SessionEvent, SessionManager, SessionRole, SessionState};
pub use store::{RemoteStore, StoreCode, StoreError, StoredItem, StoredKind, StoredPayload};
pub use transfer::{CompletedFile, OutboundTransfer, OutgoingFile, SendReport};
pub use transport::{ConnectionId, Transport, TransportError, TransportEvent};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
