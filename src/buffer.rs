//! Chunk buffers and the chunk accumulator.

use std::mem;

use crate::record::Record;

/// Chunk size thresholds. A chunk is sealed as soon as either threshold is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Maximum chunk size in bytes, each record counted with its separator.
    pub max_bytes: u64,
    /// Maximum number of records in a chunk.
    pub max_records: usize,
}

impl ChunkLimits {
    pub fn new(max_bytes: u64, max_records: usize) -> Self {
        ChunkLimits { max_bytes, max_records }
    }
}

/// Buffer limited both by records count and by the space records take on disk.
pub struct ChunkBuffer {
    limits: ChunkLimits,
    size: u64,
    inner: Vec<Record>,
}

impl ChunkBuffer {
    pub fn new(limits: ChunkLimits) -> Self {
        ChunkBuffer {
            limits,
            size: 0,
            inner: Vec::new(),
        }
    }

    /// Adds a new record to the buffer.
    pub fn push(&mut self, record: Record) {
        self.size += record.len() as u64 + 1;
        self.inner.push(record);
    }

    /// Returns buffer length.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the on-disk size of the buffered records.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checks if the buffer reached any of the limits.
    pub fn is_full(&self) -> bool {
        self.size >= self.limits.max_bytes || self.inner.len() >= self.limits.max_records
    }

    /// Moves the buffered records out, leaving an empty buffer ready for reuse.
    fn take(&mut self) -> Vec<Record> {
        self.size = 0;
        let capacity = self.inner.len();
        mem::replace(&mut self.inner, Vec::with_capacity(capacity))
    }
}

/// A sealed chunk owned by exactly one sorting worker.
#[derive(Debug)]
pub struct Chunk {
    id: u64,
    records: Vec<Record>,
}

impl Chunk {
    pub fn new(id: u64, records: Vec<Record>) -> Self {
        Chunk { id, records }
    }

    /// Returns chunk sequence id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorts chunk records in ascending byte-lexicographic order.
    pub fn sort(&mut self) {
        self.records.sort_unstable();
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Collects records into chunks and assigns them monotonically increasing sequence ids.
pub struct ChunkAccumulator {
    buffer: ChunkBuffer,
    next_id: u64,
}

impl ChunkAccumulator {
    pub fn new(limits: ChunkLimits) -> Self {
        ChunkAccumulator {
            buffer: ChunkBuffer::new(limits),
            next_id: 0,
        }
    }

    /// Appends a record. Returns the sealed chunk if the record made the buffer full.
    pub fn push(&mut self, record: Record) -> Option<Chunk> {
        self.buffer.push(record);
        if self.buffer.is_full() {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Seals the remaining records, if any. Called once the input is exhausted.
    pub fn finish(mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    /// Number of chunks sealed so far.
    pub fn sealed(&self) -> u64 {
        self.next_id
    }

    fn seal(&mut self) -> Chunk {
        let chunk = Chunk::new(self.next_id, self.buffer.take());
        self.next_id += 1;
        chunk
    }
}
