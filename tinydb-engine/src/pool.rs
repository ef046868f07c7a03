//! # Memory Pool
//!
//! Purpose: a slab-backed byte arena with a per-slab free list, mirroring
//! `tinydb_pool.c`'s allocator. Exposed as a standalone building block;
//! `list.rs` recycles its own typed node slots directly rather than
//! routing through this pool (see its module doc), so this arena is only
//! in use where a caller actually reaches for `MemoryPool`/`PoolHandle`.
//!
//! ## Design Principles
//!
//! 1. **Bump-then-reuse**: each slab is a fixed-size `Vec<u8>` served by a
//!    bump pointer; freed chunks go onto that slab's free list and are
//!    handed back last-freed-first before the bump pointer advances again.
//! 2. **Oversized escape hatch**: allocations larger than the slab size get
//!    a dedicated slab sized exactly to the request.
//! 3. **Single mutex**: the whole pool is behind one `parking_lot::Mutex`;
//!    contention is expected to be low since the pool only backs list
//!    payloads, not the hot hash-map path.

use parking_lot::Mutex;

const DEFAULT_BLOCK_SIZE: usize = 4096;

struct FreeChunk {
    offset: usize,
    len: usize,
}

struct Slab {
    memory: Vec<u8>,
    used: usize,
    free_list: Vec<FreeChunk>,
}

impl Slab {
    fn new(size: usize) -> Self {
        Slab {
            memory: vec![0u8; size],
            used: 0,
            free_list: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Tries to serve `size` bytes from this slab's free list, last-freed-first.
    fn take_free(&mut self, size: usize) -> Option<usize> {
        let idx = self.free_list.iter().position(|chunk| chunk.len >= size)?;
        let chunk = self.free_list.remove(idx);
        Some(chunk.offset)
    }

    fn bump(&mut self, size: usize) -> Option<usize> {
        if self.used + size > self.capacity() {
            return None;
        }
        let offset = self.used;
        self.used += size;
        Some(offset)
    }

    fn is_empty(&self) -> bool {
        self.used == 0 || self.free_list.iter().map(|c| c.len).sum::<usize>() == self.used
    }
}

/// A handle into the pool: a slab index plus an offset/len within it.
/// Callers treat this as an opaque token; `Alloc`/`Free` never hand out raw
/// pointers, which keeps the pool safe to use from ordinary Rust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle {
    slab: usize,
    offset: usize,
    len: usize,
}

pub struct MemoryPool {
    inner: Mutex<PoolInner>,
    block_size: usize,
}

struct PoolInner {
    slabs: Vec<Slab>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        MemoryPool {
            inner: Mutex::new(PoolInner { slabs: Vec::new() }),
            block_size,
        }
    }

    /// Allocates `n` bytes, rounded up to an 8-byte boundary. Returns
    /// `None` if no slab could be grown (the Rust allocator itself gave up).
    pub fn alloc(&self, n: usize) -> Option<PoolHandle> {
        let size = (n + 7) & !7;
        let mut inner = self.inner.lock();

        if size > self.block_size {
            let slab_idx = inner.slabs.len();
            let mut slab = Slab::new(size);
            slab.used = size;
            inner.slabs.push(slab);
            return Some(PoolHandle {
                slab: slab_idx,
                offset: 0,
                len: size,
            });
        }

        for (idx, slab) in inner.slabs.iter_mut().enumerate() {
            if let Some(offset) = slab.take_free(size) {
                return Some(PoolHandle { slab: idx, offset, len: size });
            }
            if let Some(offset) = slab.bump(size) {
                return Some(PoolHandle { slab: idx, offset, len: size });
            }
        }

        let slab_idx = inner.slabs.len();
        let mut slab = Slab::new(self.block_size);
        let offset = slab.bump(size)?;
        inner.slabs.push(slab);
        Some(PoolHandle { slab: slab_idx, offset, len: size })
    }

    /// Writes `data` into a freshly allocated chunk and returns its handle.
    pub fn alloc_copy(&self, data: &[u8]) -> Option<PoolHandle> {
        let handle = self.alloc(data.len())?;
        self.write(handle, data);
        Some(handle)
    }

    pub fn write(&self, handle: PoolHandle, data: &[u8]) {
        let mut inner = self.inner.lock();
        let slab = &mut inner.slabs[handle.slab];
        slab.memory[handle.offset..handle.offset + data.len()].copy_from_slice(data);
    }

    pub fn read(&self, handle: PoolHandle) -> Vec<u8> {
        let inner = self.inner.lock();
        let slab = &inner.slabs[handle.slab];
        slab.memory[handle.offset..handle.offset + handle.len].to_vec()
    }

    /// Pushes the chunk onto its owning slab's free list; retires the
    /// slab's backing memory once nothing in it is live. The slab stays
    /// in `slabs` at its index rather than being removed — removing it
    /// would shift every later slab down by one and silently invalidate
    /// every other live `PoolHandle.slab` into this pool. Idempotent for
    /// handles this pool never issued would be a logic error in the
    /// caller, not something this method can detect — callers must not
    /// double-free.
    pub fn free(&self, handle: PoolHandle) {
        let mut inner = self.inner.lock();
        if handle.slab >= inner.slabs.len() {
            return;
        }
        let slab = &mut inner.slabs[handle.slab];
        slab.free_list.push(FreeChunk {
            offset: handle.offset,
            len: handle.len,
        });

        if slab.is_empty() {
            slab.memory = Vec::new();
            slab.free_list.clear();
            slab.used = 0;
        }
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_roundtrip() {
        let pool = MemoryPool::new();
        let handle = pool.alloc_copy(b"hello").unwrap();
        assert_eq!(pool.read(handle), b"hello");
    }

    #[test]
    fn oversized_alloc_gets_dedicated_slab() {
        let pool = MemoryPool::with_block_size(16);
        let data = vec![7u8; 64];
        let handle = pool.alloc_copy(&data).unwrap();
        assert_eq!(pool.read(handle), data);
    }

    #[test]
    fn freed_chunk_is_reused() {
        let pool = MemoryPool::with_block_size(64);
        let a = pool.alloc(8).unwrap();
        pool.free(a);
        let b = pool.alloc(8).unwrap();
        assert_eq!(a.slab, b.slab);
        assert_eq!(a.offset, b.offset);
    }

    #[test]
    fn freeing_an_earlier_empty_slab_does_not_shift_later_handles() {
        let pool = MemoryPool::with_block_size(8);
        let first = pool.alloc_copy(b"aaaaaaaa").unwrap();
        let second = pool.alloc_copy(b"bbbbbbbb").unwrap();
        assert_eq!(first.slab, 0);
        assert_eq!(second.slab, 1);

        pool.free(first);

        // if `free` had removed slab 0 from the vec, `second`'s slab
        // index would now point at an empty retired slab instead.
        assert_eq!(pool.read(second), b"bbbbbbbb");
    }
}
