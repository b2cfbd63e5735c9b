//! PeerPad wire protocol: message types multiplexed over the single session connection.

use serde::{Deserialize, Serialize};

/// Fixed outbound chunk size in bytes.
pub const CHUNK_SIZE: usize = 16 * 1024; // 16 KiB

/// MIME type used when the sender does not know one.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Full document text. Replaces the receiver's document.
    CodeUpdate { code: String },
    /// Announces an outbound file. Always precedes its chunks.
    FileMeta { name: String, size: u64, mime: String },
    /// One slice of the file announced by the last `FileMeta`, in offset order.
    FileChunk { chunk: Vec<u8> },
}

impl Message {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CodeUpdate { .. } => "CODE_UPDATE",
            Message::FileMeta { .. } => "FILE_META",
            Message::FileChunk { .. } => "FILE_CHUNK",
        }
    }
}
