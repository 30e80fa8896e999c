//! Payloads: outgoing chunking and incoming chunk assembly.

use std::path::PathBuf;

use rand::Rng;

use crate::protocol::{PayloadChunk, PayloadHeader, PayloadKind, CHUNK_FLAG_LAST_CHUNK};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// A unit of application data, identified by a process-unique 64-bit id.
#[derive(Debug, Clone)]
pub struct Payload {
    pub id: i64,
    pub payload_type: PayloadKind,
    pub data: Vec<u8>,
    /// Destination path for file payloads; set via register_payload_path.
    pub file_path: Option<PathBuf>,
}

impl Payload {
    /// New bytes payload with a fresh id.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            id: generate_payload_id(),
            payload_type: PayloadKind::Bytes,
            data,
            file_path: None,
        }
    }

    /// New file payload with a fresh id. Contents are supplied by the host's
    /// storage layer; the core only moves the bytes.
    pub fn from_file(data: Vec<u8>, file_path: PathBuf) -> Self {
        Self {
            id: generate_payload_id(),
            payload_type: PayloadKind::File,
            data,
            file_path: Some(file_path),
        }
    }

    pub fn header(&self) -> PayloadHeader {
        PayloadHeader {
            id: self.id,
            payload_type: self.payload_type,
            total_size: self.data.len() as i64,
        }
    }
}

/// Random non-zero payload id. Ids are generated here for outgoing payloads
/// and adopted from the header for incoming ones.
pub fn generate_payload_id() -> i64 {
    loop {
        let id: i64 = rand::thread_rng().gen();
        if id != 0 {
            return id;
        }
    }
}

/// Transfer progress surfaced to payload status listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTransferUpdate {
    pub payload_id: i64,
    pub status: PayloadStatus,
    pub total_bytes: i64,
    pub bytes_transferred: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

/// Split payload bytes into sequential chunks with monotonically increasing
/// offsets; the last chunk is flagged. An empty payload yields one flagged
/// zero-length chunk so the receiver still observes completion.
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<PayloadChunk> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    if data.is_empty() {
        return vec![PayloadChunk {
            offset: 0,
            flags: CHUNK_FLAG_LAST_CHUNK,
            body: Vec::new(),
        }];
    }
    let mut out = Vec::with_capacity(data.len().div_ceil(size));
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + size).min(data.len());
        let last = end == data.len();
        out.push(PayloadChunk {
            offset: offset as i64,
            flags: if last { CHUNK_FLAG_LAST_CHUNK } else { 0 },
            body: data[offset..end].to_vec(),
        });
        offset = end;
    }
    out
}

/// Per-payload error. Fatal to the payload only; the connection stays up.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("chunk offset out of order")]
    ChunkOutOfOrder,
    #[error("reassembled size does not match header total")]
    SizeMismatch,
}

/// Result of applying one incoming chunk.
#[derive(Debug, PartialEq)]
pub enum ChunkApplyResult {
    /// Final chunk applied; the payload is fully assembled.
    Complete,
    /// Chunk applied; more to come.
    InProgress,
}

/// Assembly state for one incoming payload. Chunks must arrive in strictly
/// sequential order starting at offset 0.
#[derive(Debug)]
pub struct IncomingAssembly {
    pub header: PayloadHeader,
    buffer: Vec<u8>,
    next_offset: i64,
}

impl IncomingAssembly {
    pub fn new(header: PayloadHeader) -> Self {
        let capacity = usize::try_from(header.total_size).unwrap_or(0);
        Self {
            header,
            buffer: Vec::with_capacity(capacity.min(DEFAULT_CHUNK_SIZE * 16)),
            next_offset: 0,
        }
    }

    pub fn bytes_received(&self) -> i64 {
        self.next_offset
    }

    /// Apply one chunk. Out-of-order or duplicate offsets are a
    /// [`PayloadError`]; the caller abandons this payload and keeps the
    /// connection.
    pub fn apply_chunk(&mut self, chunk: &PayloadChunk) -> Result<ChunkApplyResult, PayloadError> {
        if chunk.offset != self.next_offset {
            return Err(PayloadError::ChunkOutOfOrder);
        }
        self.buffer.extend_from_slice(&chunk.body);
        self.next_offset += chunk.body.len() as i64;
        if chunk.is_last() {
            if self.next_offset != self.header.total_size {
                return Err(PayloadError::SizeMismatch);
            }
            Ok(ChunkApplyResult::Complete)
        } else {
            Ok(ChunkApplyResult::InProgress)
        }
    }

    /// Assembled bytes. Meaningful once `apply_chunk` returned `Complete`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
