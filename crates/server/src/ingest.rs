//! Bounded accumulation of chunked uploads.

use bytes::{Bytes, BytesMut};
use clamgate_core::ScanError;

/// One inbound piece of a chunked upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    pub filename: Option<String>,
    pub is_last: bool,
}

/// Outcome of feeding one chunk to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// Chunk absorbed, file still incomplete.
    Pending,
    /// The chunk closed its file; the accumulator is reset for the next
    /// one.
    Complete(IngestedFile),
}

/// A file assembled from its chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFile {
    pub data: Bytes,
    /// First non-empty filename seen among the file's chunks.
    pub filename: Option<String>,
}

/// Chunk accumulator with a hard size ceiling. Reusable across files in
/// multi-file sessions.
#[derive(Debug)]
pub struct StreamAccumulator {
    buf: BytesMut,
    filename: Option<String>,
    received: u64,
    ceiling: u64,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new(ceiling: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            filename: None,
            received: 0,
            ceiling,
        }
    }

    /// Bytes absorbed for the file currently being assembled.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Feed one chunk. The ceiling check runs before the chunk is
    /// absorbed, so a crossing chunk leaves the accumulator unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::TooLarge`] when the chunk would push the
    /// current file over the ceiling.
    pub fn ingest(&mut self, chunk: Chunk) -> Result<Ingested, ScanError> {
        let incoming = chunk.data.len() as u64;
        if self.received + incoming > self.ceiling {
            return Err(ScanError::TooLarge {
                ceiling: self.ceiling,
            });
        }

        if self.filename.is_none() {
            if let Some(name) = chunk.filename.filter(|name| !name.is_empty()) {
                self.filename = Some(name);
            }
        }

        self.buf.extend_from_slice(&chunk.data);
        self.received += incoming;

        if chunk.is_last {
            let file = IngestedFile {
                data: self.buf.split().freeze(),
                filename: self.filename.take(),
            };
            self.received = 0;
            return Ok(Ingested::Complete(file));
        }
        Ok(Ingested::Pending)
    }
}
