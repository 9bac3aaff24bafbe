// SPDX-License-Identifier: GPL-3.0-or-later

//! A first-fit free-list allocator over a single caller-supplied buffer.
//!
//! Every live block carries an 8-byte header (`size`, owning `vm_id`,
//! `free` flag) immediately before its data; free blocks thread a `next`
//! link through their own data area, exactly the classic embedded
//! "header-linked free list" shape. Blocks are never coalesced on free —
//! acceptable at this scale (tens of kilobytes, a handful of VMs) and
//! documented rather than hidden; see [`Stats::fragment`].

use core::mem::size_of;

const HEADER_SIZE: usize = size_of::<BlockHeader>();
/// Below this many spare data bytes, a split is not worth the extra
/// header; the whole remainder is handed to the allocation instead.
const MIN_SPLIT: u32 = 8;
/// Sentinel `vm_id` for `raw_alloc`/`raw_free`: never matched by
/// `free_all`, since real VM ids stay within `tinyvm_abi::config::MAX_VM_COUNT`.
pub const RAW_VM_ID: u8 = u8::MAX;

const NIL: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy)]
struct BlockHeader {
    size: u32,
    vm_id: u8,
    free: u8,
    _pad: u16,
}

/// A handle to a live allocation: the byte offset, within the pool's
/// buffer, of the first byte of user data (just past the block header).
///
/// Chosen as an offset rather than a raw pointer per the arena-index
/// design note: offsets are `Copy`, comparable, and make a stale handle
/// used after `free_all` detectable by bounds/ownership checks instead of
/// dereferencing freed memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Addr(u32);

impl Addr {
    pub const NULL: Self = Self(NIL);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NIL
    }

    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0
    }

    /// Build an `Addr` from a raw pool offset, e.g. a heap cell's base
    /// offset plus a field's byte offset within that cell.
    #[must_use]
    pub const fn from_raw(offset: u32) -> Self {
        Self(offset)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    /// Number of distinct free blocks. `1` (or `0` on a full pool) means
    /// unfragmented; higher values mean a large-enough request may fail
    /// even though `free` bytes are available in aggregate.
    pub fragment: usize,
}

pub struct Pool<'a> {
    buf: &'a mut [u8],
    free_head: u32,
}

impl<'a> Pool<'a> {
    /// Build a pool over `buf`, treating the whole buffer as one free
    /// block. `buf` must be at least `HEADER_SIZE` bytes or the pool is
    /// permanently empty (every `alloc` returns `None`).
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        let mut pool = Self {
            buf,
            free_head: NIL,
        };
        if pool.buf.len() >= HEADER_SIZE {
            let data_size = (pool.buf.len() - HEADER_SIZE) as u32;
            pool.set_header(
                0,
                BlockHeader {
                    size: data_size,
                    vm_id: 0,
                    free: 1,
                    _pad: 0,
                },
            );
            pool.set_free_next(HEADER_SIZE as u32, NIL);
            pool.free_head = 0;
        }
        pool
    }

    fn header(&self, header_off: u32) -> BlockHeader {
        let ptr = self
            .buf
            .as_ptr()
            .wrapping_add(header_off as usize)
            .cast::<BlockHeader>();
        // SAFETY: `header_off` always names a block boundary this pool
        // itself produced during `new`/split, so the read stays in bounds
        // and the bytes were written as a `BlockHeader` by `set_header`.
        unsafe { ptr.read_unaligned() }
    }

    fn set_header(&mut self, header_off: u32, h: BlockHeader) {
        let ptr = self
            .buf
            .as_mut_ptr()
            .wrapping_add(header_off as usize)
            .cast::<BlockHeader>();
        // SAFETY: see `header`.
        unsafe { ptr.write_unaligned(h) };
    }

    fn free_next(&self, data_off: u32) -> u32 {
        let ptr = self
            .buf
            .as_ptr()
            .wrapping_add(data_off as usize)
            .cast::<u32>();
        // SAFETY: only called on blocks known to be free, which reserve
        // their first 4 data bytes for the free-list link.
        unsafe { ptr.read_unaligned() }
    }

    fn set_free_next(&mut self, data_off: u32, next: u32) {
        let ptr = self
            .buf
            .as_mut_ptr()
            .wrapping_add(data_off as usize)
            .cast::<u32>();
        // SAFETY: see `free_next`.
        unsafe { ptr.write_unaligned(next) };
    }

    /// Allocate `n_bytes` tagged with `vm_id`. `None` on exhaustion.
    pub fn alloc(&mut self, vm_id: u8, n_bytes: usize) -> Option<Addr> {
        let need = align4(n_bytes);
        let mut prev = NIL;
        let mut cur = self.free_head;
        while cur != NIL {
            let h = self.header(cur);
            let data_off = cur + HEADER_SIZE as u32;
            let next = self.free_next(data_off);
            if h.size >= need {
                if prev == NIL {
                    self.free_head = next;
                } else {
                    self.set_free_next(prev + HEADER_SIZE as u32, next);
                }
                let remainder = h.size - need;
                if remainder >= HEADER_SIZE as u32 + MIN_SPLIT {
                    let new_off = cur + HEADER_SIZE as u32 + need;
                    let new_size = remainder - HEADER_SIZE as u32;
                    self.set_header(
                        new_off,
                        BlockHeader {
                            size: new_size,
                            vm_id: 0,
                            free: 1,
                            _pad: 0,
                        },
                    );
                    let new_data = new_off + HEADER_SIZE as u32;
                    self.set_free_next(new_data, self.free_head);
                    self.free_head = new_off;
                    self.set_header(
                        cur,
                        BlockHeader {
                            size: need,
                            vm_id,
                            free: 0,
                            _pad: 0,
                        },
                    );
                } else {
                    self.set_header(
                        cur,
                        BlockHeader {
                            size: h.size,
                            vm_id,
                            free: 0,
                            _pad: 0,
                        },
                    );
                }
                return Some(Addr(data_off));
            }
            prev = cur;
            cur = next;
        }
        None
    }

    /// Allocate without per-VM ownership tagging, for structures that
    /// outlive any single VM.
    pub fn raw_alloc(&mut self, n_bytes: usize) -> Option<Addr> {
        self.alloc(RAW_VM_ID, n_bytes)
    }

    /// Release a single block. Freeing an already-free block is a no-op
    /// (this is an embedded system; a double free must not crash it, even
    /// though the caller is expected to uphold the invariant that it
    /// never happens).
    pub fn free(&mut self, addr: Addr) {
        if addr.is_null() || (addr.0 as usize) < HEADER_SIZE {
            return;
        }
        let header_off = addr.0 - HEADER_SIZE as u32;
        let mut h = self.header(header_off);
        if h.free != 0 {
            return;
        }
        h.free = 1;
        h.vm_id = 0;
        self.set_header(header_off, h);
        self.set_free_next(addr.0, self.free_head);
        self.free_head = header_off;
    }

    pub fn raw_free(&mut self, addr: Addr) {
        self.free(addr);
    }

    /// Release every block currently tagged with `vm_id`.
    pub fn free_all(&mut self, vm_id: u8) {
        let mut off = 0u32;
        while (off as usize) + HEADER_SIZE <= self.buf.len() {
            let h = self.header(off);
            let stride = HEADER_SIZE as u32 + h.size;
            if h.free == 0 && h.vm_id == vm_id {
                self.free(Addr(off + HEADER_SIZE as u32));
            }
            off = off.saturating_add(stride.max(1));
        }
    }

    #[must_use]
    pub fn statistics(&self) -> Stats {
        let mut stats = Stats {
            total: self.buf.len(),
            ..Stats::default()
        };
        let mut off = 0u32;
        while (off as usize) + HEADER_SIZE <= self.buf.len() {
            let h = self.header(off);
            let block_bytes = HEADER_SIZE + h.size as usize;
            if h.free == 0 {
                stats.used += block_bytes;
            } else {
                stats.free += block_bytes;
                stats.fragment += 1;
            }
            off = off.saturating_add((HEADER_SIZE as u32 + h.size).max(1));
        }
        stats
    }

    /// Read `len` bytes at `addr` as a byte slice (for built-in heap
    /// types that store variable-length trailing data).
    #[must_use]
    pub fn slice(&self, addr: Addr, len: usize) -> &[u8] {
        &self.buf[addr.0 as usize..addr.0 as usize + len]
    }

    pub fn slice_mut(&mut self, addr: Addr, len: usize) -> &mut [u8] {
        &mut self.buf[addr.0 as usize..addr.0 as usize + len]
    }

    /// Read a `Copy` value of type `T` at `addr`.
    #[must_use]
    pub fn read<T: Copy>(&self, addr: Addr) -> T {
        let ptr = self
            .buf
            .as_ptr()
            .wrapping_add(addr.0 as usize)
            .cast::<T>();
        // SAFETY: caller guarantees `addr` was allocated with room for a
        // `T` and holds a previously written `T` (or is about to, via
        // `write`).
        unsafe { ptr.read_unaligned() }
    }

    pub fn write<T: Copy>(&mut self, addr: Addr, value: T) {
        let ptr = self
            .buf
            .as_mut_ptr()
            .wrapping_add(addr.0 as usize)
            .cast::<T>();
        // SAFETY: see `read`.
        unsafe { ptr.write_unaligned(value) };
    }

    /// Copy `len` bytes from `src` to `dst`, both within this pool. Used to
    /// duplicate heap-resident byte data (e.g. a literal-pool string body
    /// into a freshly allocated mutable cell) where a borrow-splitting
    /// `slice`+`slice_mut` pair would alias the same buffer.
    ///
    /// `src` and `dst` must not overlap; callers only ever copy between
    /// distinct allocations, never within one.
    pub fn copy_bytes(&mut self, src: Addr, dst: Addr, len: usize) {
        let src_ptr = self.buf.as_ptr().wrapping_add(src.0 as usize);
        let dst_ptr = self.buf.as_mut_ptr().wrapping_add(dst.0 as usize);
        // SAFETY: both offsets lie within `buf` for `len` bytes by caller
        // contract (each names a live allocation of at least `len` bytes),
        // and the two allocations never overlap.
        unsafe { core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, len) };
    }
}

#[inline]
const fn align4(n: usize) -> u32 {
    (((n + 3) & !3) as u32).max(4)
}

#[cfg(test)]
mod pool_test {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let mut buf = [0u8; 256];
        let mut pool = Pool::new(&mut buf);
        let a = pool.alloc(1, 16).expect("alloc");
        let b = pool.alloc(1, 16).expect("alloc");
        assert_ne!(a, b);
        let stats = pool.statistics();
        assert!(stats.used > 0);
        pool.free(a);
        pool.free(b);
        let stats = pool.statistics();
        assert_eq!(stats.used, 0);
    }

    #[test]
    fn free_all_sweeps_only_matching_vm() {
        let mut buf = [0u8; 256];
        let mut pool = Pool::new(&mut buf);
        let _a = pool.alloc(1, 16).expect("alloc");
        let _b = pool.alloc(2, 16).expect("alloc");
        pool.free_all(1);
        let stats = pool.statistics();
        // exactly one block of vm 2 remains used
        assert!(stats.used > 0);
        pool.free_all(2);
        assert_eq!(pool.statistics().used, 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut buf = [0u8; 32];
        let mut pool = Pool::new(&mut buf);
        assert!(pool.alloc(0, 1024).is_none());
    }

    #[test]
    fn double_free_is_not_a_crash() {
        let mut buf = [0u8; 64];
        let mut pool = Pool::new(&mut buf);
        let a = pool.alloc(0, 8).expect("alloc");
        pool.free(a);
        pool.free(a); // must not corrupt the free list
        let b = pool.alloc(0, 8);
        assert!(b.is_some());
    }

    #[test]
    fn copy_bytes_duplicates_without_aliasing() {
        let mut buf = [0u8; 256];
        let mut pool = Pool::new(&mut buf);
        let src = pool.alloc(1, 8).expect("alloc");
        pool.slice_mut(src, 8).copy_from_slice(b"hello123");
        let dst = pool.alloc(1, 8).expect("alloc");
        pool.copy_bytes(src, dst, 8);
        assert_eq!(pool.slice(dst, 8), b"hello123");
        pool.slice_mut(src, 8).copy_from_slice(b"changed!");
        assert_eq!(pool.slice(dst, 8), b"hello123");
    }

    #[test]
    fn raw_alloc_is_never_swept_by_free_all() {
        let mut buf = [0u8; 64];
        let mut pool = Pool::new(&mut buf);
        let r = pool.raw_alloc(8).expect("alloc");
        pool.free_all(0);
        pool.free_all(1);
        assert_eq!(pool.statistics().used, 8 + HEADER_SIZE);
        pool.raw_free(r);
    }
}
