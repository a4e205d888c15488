//! Narrow interface to the storage layer that owns the raw bytes.
//!
//! The core only ever reads through [`Blob::read_at`] (via [`crate::Cursor`]) and
//! writes through a single [`ChunkStore::attach_chunks`] call.

use std::borrow::Cow;

use crate::chunk::Chunk;

/// Randomly addressable byte source.
pub trait Blob {
    /// Total size in bytes.
    fn len(&self) -> u64;

    /// True if the blob holds no byte.
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns `len` bytes starting at `offset`, or `None` if the range is not
    /// entirely inside the blob. Borrows when the bytes are resident.
    fn read_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>>;
}

impl Blob for [u8] {
    fn len(&self) -> u64 { <[u8]>::len(self) as u64 }

    fn read_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        self.get(start..end).map(Cow::Borrowed)
    }
}

impl Blob for Vec<u8> {
    fn len(&self) -> u64 { self.as_slice().len() as u64 }

    fn read_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> { self.as_slice().read_at(offset, len) }
}

/// Destination of emitted chunk trees.
pub trait ChunkStore {
    /// Attaches a fully built, already nested chunk tree whose root starts at `base`.
    fn attach_chunks(&mut self, base: u64, root: Chunk);
}

/// Something that is both readable and annotatable (the blob handle the parser hook receives).
pub trait BlobStore: Blob + ChunkStore {}

impl<T: Blob + ChunkStore + ?Sized> BlobStore for T {}

/// In-memory blob with its attached chunk forest.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlob {
    bytes: Vec<u8>,
    chunks: Vec<Chunk>,
}

impl MemoryBlob {
    /// Wraps raw bytes; no chunk attached yet.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self { Self { bytes: bytes.into(), chunks: Vec::new() } }

    /// Raw contents.
    pub fn bytes(&self) -> &[u8] { &self.bytes }

    /// Attached top-level chunks, sorted by start offset.
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    /// Chain of chunks covering `offset`, outermost first. Empty if nothing covers it.
    pub fn chunks_at(&self, offset: u64) -> Vec<&Chunk> {
        self.chunks
            .iter()
            .find(|c| c.contains(offset))
            .map(|c| c.find_path(offset))
            .unwrap_or_default()
    }
}

impl Blob for MemoryBlob {
    fn len(&self) -> u64 { self.bytes.len() as u64 }

    fn read_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> { self.bytes.read_at(offset, len) }
}

impl ChunkStore for MemoryBlob {
    fn attach_chunks(&mut self, base: u64, root: Chunk) {
        debug_assert_eq!(root.start, base);
        let at = self.chunks.partition_point(|c| c.start <= base);
        self.chunks.insert(at, root);
    }
}
