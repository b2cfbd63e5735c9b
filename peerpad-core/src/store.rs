//! Expiring store client: save a snippet or a file under a short code, load it back until
//! it expires. Persistence itself sits behind [`StoreBackend`].

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::transfer::OutgoingFile;

/// Store code characters: no `0`, `O`, `1` or `I`.
pub const STORE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Characters in a store code.
pub const STORE_CODE_LEN: usize = 6;

/// Lifetime of a text snippet.
pub const SNIPPET_TTL_HOURS: i64 = 72;

/// Lifetime of a stored file.
pub const FILE_TTL_HOURS: i64 = 24;

/// Fresh codes tried before giving up on a crowded store.
const MAX_CODE_ATTEMPTS: usize = 8;

/// Six-character store code, always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreCode(String);

impl StoreCode {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..STORE_CODE_LEN)
            .map(|_| STORE_CODE_ALPHABET[rng.gen_range(0..STORE_CODE_ALPHABET.len())] as char)
            .collect();
        StoreCode(code)
    }

    /// Trim and uppercase user input. `None` if it cannot be a store code.
    pub fn normalize(input: &str) -> Option<Self> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == STORE_CODE_LEN
            && code.bytes().all(|b| STORE_CODE_ALPHABET.contains(&b));
        valid.then_some(StoreCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredKind {
    Snippet,
    File,
}

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredPayload {
    Snippet {
        content: String,
        language: String,
    },
    File {
        name: String,
        size: u64,
        mime: String,
        url: String,
    },
}

/// One record as persisted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub code: StoreCode,
    #[serde(flatten)]
    pub payload: StoredPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredItem {
    pub fn kind(&self) -> StoredKind {
        match self.payload {
            StoredPayload::Snippet { .. } => StoredKind::Snippet,
            StoredPayload::File { .. } => StoredKind::File,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("code already in use")]
    Conflict,
    #[error("blob not found: {0}")]
    MissingBlob(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("code not found")]
    NotFound,
    #[error("this code has expired")]
    Expired,
    #[error("store unavailable: {0}")]
    Unavailable(#[from] BackendError),
}

/// Durable key → record persistence plus blob storage for file payloads.
pub trait StoreBackend {
    /// Persist `item` under its code. `Conflict` if the code is taken.
    fn insert(&mut self, item: &StoredItem) -> Result<(), BackendError>;
    /// Record for `code`, expired or not.
    fn get(&self, code: &StoreCode) -> Result<Option<StoredItem>, BackendError>;
    /// Store file bytes; returns a URL that `get_blob` understands.
    fn put_blob(&mut self, bytes: &[u8]) -> Result<String, BackendError>;
    fn get_blob(&self, url: &str) -> Result<Vec<u8>, BackendError>;
    /// Drop a blob no record refers to. Unknown URLs are not an error.
    fn delete_blob(&mut self, url: &str) -> Result<(), BackendError>;
}

/// Source of "now" for expiry decisions.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock(Rc<Cell<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock(Rc::new(Cell::new(start)))
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.get()
    }
}

/// Backend kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<StoreCode, StoredItem>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StoreBackend for MemoryStore {
    fn insert(&mut self, item: &StoredItem) -> Result<(), BackendError> {
        if self.records.contains_key(&item.code) {
            return Err(BackendError::Conflict);
        }
        self.records.insert(item.code.clone(), item.clone());
        Ok(())
    }

    fn get(&self, code: &StoreCode) -> Result<Option<StoredItem>, BackendError> {
        Ok(self.records.get(code).cloned())
    }

    fn put_blob(&mut self, bytes: &[u8]) -> Result<String, BackendError> {
        let url = format!("memory://blobs/{}", uuid::Uuid::new_v4());
        self.blobs.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    fn get_blob(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        self.blobs
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::MissingBlob(url.to_string()))
    }

    fn delete_blob(&mut self, url: &str) -> Result<(), BackendError> {
        self.blobs.remove(url);
        Ok(())
    }
}

/// Save/load front end: code generation, expiry and collision handling.
pub struct RemoteStore<B: StoreBackend, C: Clock = SystemClock> {
    backend: B,
    clock: C,
    rng: StdRng,
}

impl<B: StoreBackend> RemoteStore<B, SystemClock> {
    pub fn new(backend: B) -> Self {
        Self::with_clock(backend, SystemClock)
    }
}

impl<B: StoreBackend, C: Clock> RemoteStore<B, C> {
    pub fn with_clock(backend: B, clock: C) -> Self {
        Self {
            backend,
            clock,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic code sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store text inline for 72 hours.
    pub fn save_snippet(&mut self, content: &str, language: &str) -> Result<StoreCode, StoreError> {
        let payload = StoredPayload::Snippet {
            content: content.to_string(),
            language: language.to_string(),
        };
        self.insert_fresh(payload, Duration::hours(SNIPPET_TTL_HOURS))
    }

    /// Upload the bytes as a blob and store a reference for 24 hours.
    pub fn save_file(&mut self, file: &OutgoingFile) -> Result<StoreCode, StoreError> {
        let url = self.backend.put_blob(&file.data)?;
        debug!(%url, size = file.size(), "blob uploaded");
        let payload = StoredPayload::File {
            name: file.name.clone(),
            size: file.size(),
            mime: file.mime.clone(),
            url: url.clone(),
        };
        self.insert_fresh(payload, Duration::hours(FILE_TTL_HOURS))
            .inspect_err(|_| {
                // Nothing will ever point at the blob.
                if let Err(e) = self.backend.delete_blob(&url) {
                    warn!(%url, error = %e, "could not remove orphaned blob");
                }
            })
    }

    /// Look a code up (case-insensitive). Expired records are reported as `Expired`.
    pub fn load(&self, code: &str) -> Result<StoredItem, StoreError> {
        let code = StoreCode::normalize(code).ok_or(StoreError::NotFound)?;
        let item = self.backend.get(&code)?.ok_or(StoreError::NotFound)?;
        if item.is_expired(self.clock.now()) {
            debug!(%code, expires_at = %item.expires_at, "expired code");
            return Err(StoreError::Expired);
        }
        Ok(item)
    }

    /// Payload bytes of a loaded record: the blob for files, the text for snippets.
    pub fn download(&self, item: &StoredItem) -> Result<Vec<u8>, StoreError> {
        match &item.payload {
            StoredPayload::Snippet { content, .. } => Ok(content.clone().into_bytes()),
            StoredPayload::File { url, .. } => Ok(self.backend.get_blob(url)?),
        }
    }

    fn insert_fresh(&mut self, payload: StoredPayload, ttl: Duration) -> Result<StoreCode, StoreError> {
        let created_at = self.clock.now();
        let mut item = StoredItem {
            code: StoreCode::generate(&mut self.rng),
            payload,
            created_at,
            expires_at: created_at + ttl,
        };
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            match self.backend.insert(&item) {
                Ok(()) => {
                    info!(code = %item.code, kind = ?item.kind(), expires_at = %item.expires_at, "saved");
                    return Ok(item.code);
                }
                Err(BackendError::Conflict) => {
                    warn!(code = %item.code, attempt, "store code collision; retrying");
                    item.code = StoreCode::generate(&mut self.rng);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Unavailable(BackendError::Conflict))
    }
}
