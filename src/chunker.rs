use tracing::warn;

use crate::domain::{Chunk, format_bytes};

/// Where an item landed, and whether getting it there crossed a chunk
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub chunk_index: u32,
    /// A new chunk was opened for this item. The caller must persist the
    /// transition before writing anything into the new chunk.
    pub opened_new_chunk: bool,
    /// The item alone exceeds the chunk capacity and is placed as an
    /// overflowing singleton.
    pub oversized: bool,
}

/// Streaming next-fit bin packing. Items arrive once, in catalog order, and
/// are never reshuffled: the output is a physical directory of files, not a
/// rearrangeable plan. Packing efficiency is traded for determinism and
/// resumability.
#[derive(Debug, Clone)]
pub struct ChunkAllocator {
    current: Chunk,
}

impl ChunkAllocator {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            current: Chunk::new(1, capacity_bytes),
        }
    }

    /// Continue from persisted progress.
    pub fn resume(capacity_bytes: u64, chunk_index: u32, occupied_bytes: u64) -> Self {
        let mut current = Chunk::new(chunk_index.max(1), capacity_bytes);
        current.occupied_bytes = occupied_bytes;
        Self { current }
    }

    pub fn current(&self) -> Chunk {
        self.current
    }

    /// Decide the chunk for an item of `size` bytes, advancing to a fresh
    /// chunk when the current one would overflow. Occupancy is NOT raised
    /// here; call [`commit`](Self::commit) once the transfer succeeds so an
    /// aborted transfer never counts against the chunk.
    ///
    /// An item larger than the capacity itself is placed alone in a chunk
    /// that overflows by exactly that item; it is never rejected or split.
    pub fn place(&mut self, size: u64) -> Placement {
        let capacity = self.current.capacity_bytes;
        let mut opened_new_chunk = false;
        if self.current.occupied_bytes > 0
            && self.current.occupied_bytes + size > capacity
        {
            self.current = Chunk::new(self.current.index + 1, capacity);
            opened_new_chunk = true;
        }

        let oversized = size > capacity;
        if oversized {
            warn!(
                chunk = self.current.index,
                size = %format_bytes(size),
                capacity = %format_bytes(capacity),
                "item exceeds chunk capacity; placing as overflowing singleton"
            );
        }

        Placement {
            chunk_index: self.current.index,
            opened_new_chunk,
            oversized,
        }
    }

    /// Raise the current chunk's occupancy after a successful transfer.
    pub fn commit(&mut self, size: u64) {
        self.current.occupied_bytes += size;
    }
}
