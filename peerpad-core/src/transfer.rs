//! File transfer: split outbound files into ordered chunks, reassemble the inbound one.

use std::io::Read;
use std::ops::Range;

use tracing::{debug, info, warn};

use crate::link::Link;
use crate::protocol::{Message, CHUNK_SIZE, DEFAULT_MIME};
use crate::session::SessionError;
use crate::transport::Transport;

/// Highest progress reported while bytes are still missing. 100 is reserved for completion.
const MAX_PARTIAL_PROGRESS: f64 = 99.99;

/// Split `total_len` bytes into consecutive ranges of `chunk_size` (last one shorter).
/// A zero `chunk_size` falls back to [`CHUNK_SIZE`].
pub fn chunk_ranges(total_len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = if chunk_size == 0 { CHUNK_SIZE } else { chunk_size };
    let mut out = Vec::with_capacity(total_len.div_ceil(size));
    let mut start = 0;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push(start..end);
        start = end;
    }
    out
}

/// A file ready to send. Its size is the length of `data`, sampled once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data,
        }
    }

    /// File with unknown content type.
    pub fn untyped(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(name, DEFAULT_MIME, data)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// What `send_file` handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub chunks: usize,
    pub bytes: u64,
}

/// An announced outbound file whose chunks are still being read and sent.
///
/// The size is fixed when FILE_META goes out; each chunk is read from the source just
/// before it is handed to the transport, so only one chunk is held at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTransfer {
    name: String,
    size: u64,
    sent: u64,
    chunks: usize,
}

impl OutboundTransfer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.size
    }

    pub fn report(&self) -> SendReport {
        SendReport {
            chunks: self.chunks,
            bytes: self.sent,
        }
    }
}

/// The one inbound file being received.
#[derive(Debug, Clone)]
pub struct IncomingTransfer {
    pub name: String,
    pub declared_size: u64,
    pub mime: String,
    chunks: Vec<Vec<u8>>,
    received_size: u64,
}

impl IncomingTransfer {
    fn new(name: String, declared_size: u64, mime: String) -> Self {
        Self {
            name,
            declared_size,
            mime,
            chunks: Vec::new(),
            received_size: 0,
        }
    }

    pub fn received_size(&self) -> u64 {
        self.received_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn is_complete(&self) -> bool {
        self.received_size >= self.declared_size
    }

    fn progress(&self) -> f64 {
        if self.is_complete() {
            return 100.0;
        }
        let pct = self.received_size as f64 * 100.0 / self.declared_size as f64;
        pct.min(MAX_PARTIAL_PROGRESS)
    }

    /// Concatenate chunks in arrival order. Bytes past the declared size are dropped.
    fn into_completed(self) -> CompletedFile {
        let mut data = Vec::with_capacity(self.received_size as usize);
        for chunk in self.chunks {
            data.extend_from_slice(&chunk);
        }
        if data.len() as u64 > self.declared_size {
            warn!(
                name = %self.name,
                declared = self.declared_size,
                received = data.len(),
                "peer sent more bytes than announced; truncating"
            );
            data.truncate(self.declared_size as usize);
        }
        CompletedFile {
            name: self.name,
            size: self.declared_size,
            mime: self.mime,
            data,
        }
    }
}

/// A fully received file. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub data: Vec<u8>,
}

/// Result of feeding one FILE_CHUNK to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkReceiveResult {
    /// No transfer pending; chunk dropped.
    Discarded,
    /// Chunk stored; transfer not yet complete.
    InProgress { percent: f64 },
    /// Transfer complete; file appended at this index of the received list.
    Complete { index: usize },
}

/// Outbound chunking and inbound reassembly for one session.
#[derive(Debug, Default)]
pub struct FileTransferEngine {
    incoming: Option<IncomingTransfer>,
    received: Vec<CompletedFile>,
}

impl FileTransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send FILE_META then every chunk in offset order. Fails with `NoPeer` before
    /// sending anything when the link is not open.
    pub fn send_file<T: Transport>(
        &self,
        file: &OutgoingFile,
        link: &mut Link<T>,
    ) -> Result<SendReport, SessionError> {
        self.send_from(&file.name, &file.mime, file.size(), file.data.as_slice(), link)
    }

    /// Like [`send_file`](Self::send_file), reading `size` bytes from `source` one chunk
    /// at a time.
    pub fn send_from<T: Transport, R: Read>(
        &self,
        name: &str,
        mime: &str,
        size: u64,
        mut source: R,
        link: &mut Link<T>,
    ) -> Result<SendReport, SessionError> {
        let mut transfer = self.start_file(name, mime, size, link)?;
        while !self.send_next_chunk(&mut transfer, &mut source, link)? {}
        Ok(transfer.report())
    }

    /// Announce a file of `size` bytes with FILE_META. `NoPeer` when the link is not open.
    pub fn start_file<T: Transport>(
        &self,
        name: &str,
        mime: &str,
        size: u64,
        link: &mut Link<T>,
    ) -> Result<OutboundTransfer, SessionError> {
        if !link.is_open() {
            return Err(SessionError::NoPeer);
        }
        info!(%name, size, "sending file");
        link.send(&Message::FileMeta {
            name: name.to_string(),
            size,
            mime: mime.to_string(),
        })?;
        Ok(OutboundTransfer {
            name: name.to_string(),
            size,
            sent: 0,
            chunks: 0,
        })
    }

    /// Read the next chunk from `source` and send it. Returns whether the file is done.
    /// A source that ends before the announced size is an error.
    pub fn send_next_chunk<T: Transport, R: Read>(
        &self,
        transfer: &mut OutboundTransfer,
        source: &mut R,
        link: &mut Link<T>,
    ) -> Result<bool, SessionError> {
        let want = (transfer.size - transfer.sent).min(CHUNK_SIZE as u64) as usize;
        if want == 0 {
            return Ok(true);
        }
        let mut chunk = vec![0u8; want];
        source.read_exact(&mut chunk)?;
        link.send(&Message::FileChunk { chunk })?;
        transfer.sent += want as u64;
        transfer.chunks += 1;
        if transfer.is_done() {
            debug!(name = %transfer.name, chunks = transfer.chunks, "file handed to transport");
        }
        Ok(transfer.is_done())
    }

    /// Start a new inbound transfer, replacing any pending one.
    /// A zero-length file completes at once; its index is returned.
    pub fn on_file_meta(&mut self, name: String, size: u64, mime: String) -> Option<usize> {
        if let Some(old) = self.incoming.take() {
            warn!(
                name = %old.name,
                received = old.received_size,
                declared = old.declared_size,
                "incoming transfer superseded by new FILE_META"
            );
        }
        info!(%name, size, %mime, "incoming file");
        let transfer = IncomingTransfer::new(name, size, mime);
        if transfer.is_complete() {
            return Some(self.complete(transfer));
        }
        self.incoming = Some(transfer);
        None
    }

    /// Append a chunk to the pending transfer.
    pub fn on_file_chunk(&mut self, chunk: Vec<u8>) -> ChunkReceiveResult {
        let Some(transfer) = self.incoming.as_mut() else {
            debug!(len = chunk.len(), "chunk without pending transfer discarded");
            return ChunkReceiveResult::Discarded;
        };
        if chunk.len() > CHUNK_SIZE {
            warn!(len = chunk.len(), "oversized chunk accepted");
        }
        transfer.received_size += chunk.len() as u64;
        transfer.chunks.push(chunk);
        if !transfer.is_complete() {
            let percent = transfer.progress();
            debug!(
                received = transfer.received_size,
                declared = transfer.declared_size,
                percent,
                "chunk received"
            );
            return ChunkReceiveResult::InProgress { percent };
        }
        match self.incoming.take() {
            Some(transfer) => ChunkReceiveResult::Complete {
                index: self.complete(transfer),
            },
            None => ChunkReceiveResult::Discarded,
        }
    }

    /// Drop the pending transfer (connection lost). Returns what was dropped.
    pub fn abandon(&mut self) -> Option<IncomingTransfer> {
        let dropped = self.incoming.take();
        if let Some(t) = &dropped {
            warn!(
                name = %t.name,
                received = t.received_size,
                declared = t.declared_size,
                "incoming transfer abandoned"
            );
        }
        dropped
    }

    /// Progress of the pending transfer in percent; `None` when nothing is pending.
    pub fn progress(&self) -> Option<f64> {
        self.incoming.as_ref().map(IncomingTransfer::progress)
    }

    pub fn incoming(&self) -> Option<&IncomingTransfer> {
        self.incoming.as_ref()
    }

    pub fn received_files(&self) -> &[CompletedFile] {
        &self.received
    }

    fn complete(&mut self, transfer: IncomingTransfer) -> usize {
        let file = transfer.into_completed();
        info!(name = %file.name, size = file.size, "file received");
        self.received.push(file);
        self.received.len() - 1
    }
}
