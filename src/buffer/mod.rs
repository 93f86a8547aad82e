/*!
 * Buffer
 *
 * Ownership-carrying view over a contiguous byte region.
 *
 * A buffer tracks separate read and write cursors, a configurable byte
 * order, and a strict access discipline: reads are bounded by the write
 * cursor, writes by the capacity, and every operation on a closed or sent
 * buffer fails with `BufferClosed`. Ownership-changing operations (split,
 * send, compact, ensure-writable) require the buffer to be the sole holder
 * of its backing region.
 *
 * ## Ownership states
 *
 * - OWNED: sole handle to the region (`is_owned`)
 * - BORROWED: the region is shared with acquired views or slices
 * - INACCESSIBLE: closed, sent, or torn down for recovery
 *
 * Cross-thread transfer goes exclusively through [`SendToken`]: a buffer is
 * not `Send`, and the token can only be built from an owned buffer, after
 * the origin has been invalidated.
 */

mod accessors;
pub mod composite;
pub mod cursor;
pub mod send;

pub use composite::{CompositeBuffer, CompositeByteCursor, CompositeReverseCursor};
pub use cursor::{ByteCursor, ReverseByteCursor};
pub use send::{SendToken, Transferable};

use crate::alloc::AllocatorControl;
use crate::core::errors::BufferError;
use crate::core::limits;
use crate::core::types::{BufferResult, ByteOrder, Size};
use crate::lifecycle::{ArcDrop, TraceOp};
use crate::memory::Region;
use std::marker::PhantomData;
use std::sync::Arc;

/// A readable chunk of contiguous buffer memory, handed to component visitors
pub struct ReadableComponent<'a> {
    bytes: &'a [u8],
    native_address: usize,
}

impl<'a> ReadableComponent<'a> {
    /// The readable bytes of this component
    pub fn readable_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Native address of the first readable byte, or 0 when heap-backed
    pub fn native_address(&self) -> usize {
        self.native_address
    }
}

/// A writable chunk of contiguous buffer memory, handed to component visitors
pub struct WritableComponent<'a> {
    bytes: &'a mut [u8],
    native_address: usize,
}

impl<'a> WritableComponent<'a> {
    /// The writable bytes of this component
    pub fn writable_bytes(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Native address of the first writable byte, or 0 when heap-backed
    pub fn native_address(&self) -> usize {
        self.native_address
    }
}

/// Ownership-carrying view over a contiguous byte region.
pub struct Buffer {
    region: Region,
    roff: Size,
    woff: Size,
    order: ByteOrder,
    read_only: bool,
    accessible: bool,
    const_child: bool,
    drop: Option<ArcDrop>,
    control: Arc<dyn AllocatorControl>,
    /// Buffers never cross threads directly; transfer goes through
    /// `SendToken`. The raw-view marker keeps auto-`Send` away.
    _not_send: PhantomData<*const u8>,
}

impl Buffer {
    /// Assemble a buffer from a region view, its allocator back-pointer,
    /// and the drop that releases the backing memory.
    pub(crate) fn from_parts(
        region: Region,
        control: Arc<dyn AllocatorControl>,
        drop: ArcDrop,
    ) -> Self {
        Self {
            region,
            roff: 0,
            woff: 0,
            order: ByteOrder::native(),
            read_only: false,
            accessible: true,
            const_child: false,
            drop: Some(drop),
            control,
            _not_send: PhantomData,
        }
    }

    // ---- geometry ----------------------------------------------------

    /// Capacity in bytes; a closed buffer reports zero
    #[inline]
    pub fn capacity(&self) -> Size {
        if self.accessible {
            self.region.capacity()
        } else {
            0
        }
    }

    #[inline]
    pub fn read_offset(&self) -> Size {
        self.roff
    }

    /// Move the read cursor; fails unless `0 <= offset <= write_offset`
    pub fn set_read_offset(&mut self, offset: Size) -> BufferResult<()> {
        self.check_read(offset, 0)?;
        self.roff = offset;
        Ok(())
    }

    #[inline]
    pub fn write_offset(&self) -> Size {
        self.woff
    }

    /// Move the write cursor; fails unless `read_offset <= offset <= capacity`
    pub fn set_write_offset(&mut self, offset: Size) -> BufferResult<()> {
        self.check_write(offset, 0)?;
        self.woff = offset;
        Ok(())
    }

    /// Bytes available for reading: `write_offset - read_offset`
    #[inline]
    pub fn readable_bytes(&self) -> Size {
        self.woff - self.roff
    }

    /// Bytes available for writing: `capacity - write_offset`
    #[inline]
    pub fn writable_bytes(&self) -> Size {
        self.capacity() - self.woff
    }

    /// Rewind both cursors to zero
    pub fn reset(&mut self) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        self.roff = 0;
        self.woff = 0;
        Ok(())
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Native address of the region, or 0 for heap memory
    pub fn native_address(&self) -> usize {
        if self.accessible {
            self.region.native_address()
        } else {
            0
        }
    }

    // ---- flags and ownership -----------------------------------------

    /// Make this buffer read-only. Monotonic: there is no way back.
    pub fn make_read_only(&mut self) {
        self.read_only = true;
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Whether this view was produced by a constant-buffer supplier
    #[inline]
    pub fn is_const(&self) -> bool {
        self.const_child
    }

    #[inline]
    pub fn is_accessible(&self) -> bool {
        self.accessible
    }

    /// True when this buffer is the sole handle to its region
    pub fn is_owned(&self) -> bool {
        self.accessible && self.drop.as_ref().map(ArcDrop::is_owned).unwrap_or(false)
    }

    /// Number of additional views sharing the region
    pub fn borrow_count(&self) -> usize {
        self.drop.as_ref().map(ArcDrop::borrow_count).unwrap_or(0)
    }

    // ---- whole-buffer operations -------------------------------------

    /// Set every byte in `[0, capacity)` to `value`
    pub fn fill(&mut self, value: u8) -> BufferResult<()> {
        self.check_set(0, self.capacity())?;
        // SAFETY: bounds checked above; the region view covers capacity bytes.
        unsafe { std::ptr::write_bytes(self.region.as_ptr(), value, self.capacity()) }
        Ok(())
    }

    /// A borrowed view sharing this buffer's region and cursors.
    ///
    /// The view is read-only, so overlapping write access can never exist
    /// between the two handles. While any view is live the origin is
    /// BORROWED and ownership-requiring operations fail with `NotOwned`.
    pub fn acquire(&self) -> BufferResult<Buffer> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        let drop = self.drop.as_ref().expect("accessible buffer has a drop");
        Ok(Buffer {
            region: self.region,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: true,
            accessible: true,
            const_child: self.const_child,
            drop: Some(drop.acquire()),
            control: Arc::clone(&self.control),
            _not_send: PhantomData,
        })
    }

    /// A borrowed read-only view over `[offset, offset + len)`.
    ///
    /// The slice has its own cursors (fully readable) and must be closed by
    /// the caller; the underlying region stays alive until every view over
    /// it is gone.
    pub fn slice(&self, offset: Size, len: Size) -> BufferResult<Buffer> {
        self.check_get(offset, len)?;
        let drop = self.drop.as_ref().expect("accessible buffer has a drop");
        Ok(Buffer {
            region: self.region.slice(offset, len),
            roff: 0,
            woff: len,
            order: self.order,
            read_only: true,
            accessible: true,
            const_child: self.const_child,
            drop: Some(drop.acquire()),
            control: Arc::clone(&self.control),
            _not_send: PhantomData,
        })
    }

    /// An independently owned deep copy of `[offset, offset + len)`.
    ///
    /// The copy is fully written (`write_offset == len`) and preserves byte
    /// order and the read-only flag.
    pub fn copy(&self, offset: Size, len: Size) -> BufferResult<Buffer> {
        self.check_get(offset, len)?;
        // Allocators do not support zero-sized regions.
        let alloc_size = len.max(1);
        let untethered = self.control.allocate_untethered(alloc_size)?;
        let mut copy = Buffer::from_parts(
            untethered.region.slice(0, len),
            Arc::clone(&self.control),
            untethered.drop,
        );
        // SAFETY: source range checked above, destination freshly allocated
        // with at least `len` bytes; the two regions are distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.as_ptr().add(offset),
                copy.region.as_ptr(),
                len,
            );
        }
        copy.woff = len;
        copy.order = self.order;
        if self.read_only {
            copy.make_read_only();
        }
        Ok(copy)
    }

    /// Copy `len` bytes starting at `src_pos` into a byte slice
    pub fn copy_into(
        &self,
        src_pos: Size,
        dest: &mut [u8],
        dest_pos: Size,
        len: Size,
    ) -> BufferResult<()> {
        self.check_copy_args(src_pos, len, dest_pos, dest.len())?;
        // SAFETY: both ranges validated; `copy` tolerates overlap in case the
        // destination slice aliases this region through a raw view.
        unsafe {
            std::ptr::copy(
                self.region.as_ptr().add(src_pos),
                dest.as_mut_ptr().add(dest_pos),
                len,
            );
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `src_pos` into another buffer.
    /// Overlapping source and destination ranges are handled correctly.
    pub fn copy_into_buffer(
        &self,
        src_pos: Size,
        dest: &mut Buffer,
        dest_pos: Size,
        len: Size,
    ) -> BufferResult<()> {
        if !dest.accessible {
            return Err(BufferError::BufferClosed);
        }
        if dest.read_only {
            return Err(BufferError::ReadOnly);
        }
        self.check_copy_args(src_pos, len, dest_pos, dest.capacity())?;
        // SAFETY: ranges validated above; memmove semantics tolerate the two
        // views sharing one region (e.g. after acquire or within a split).
        unsafe {
            std::ptr::copy(
                self.region.as_ptr().add(src_pos),
                dest.region.as_ptr().add(dest_pos),
                len,
            );
        }
        Ok(())
    }

    /// Write a byte slice at the write cursor and advance it
    pub fn write_bytes(&mut self, src: &[u8]) -> BufferResult<()> {
        self.check_write(self.woff, src.len())?;
        // SAFETY: bounds checked; source is a distinct borrowed slice.
        unsafe {
            std::ptr::copy(
                src.as_ptr(),
                self.region.as_ptr().add(self.woff),
                src.len(),
            );
        }
        self.woff += src.len();
        Ok(())
    }

    /// Fill `dest` from the read cursor and advance it
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> BufferResult<()> {
        self.check_read(self.roff, dest.len())?;
        // SAFETY: bounds checked; destination is a distinct borrowed slice.
        unsafe {
            std::ptr::copy(
                self.region.as_ptr().add(self.roff),
                dest.as_mut_ptr(),
                dest.len(),
            );
        }
        self.roff += dest.len();
        Ok(())
    }

    // ---- ownership transitions ---------------------------------------

    /// Partition this buffer into two disjoint owned buffers.
    ///
    /// The returned buffer owns `[0, at)`; this buffer retains
    /// `[at, capacity)` with its cursors shifted down by `at`. Cursor
    /// positions, byte order, and the read-only flag carry over to both.
    pub fn split(&mut self, at: Size) -> BufferResult<Buffer> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if at > self.capacity() {
            return Err(BufferError::out_of_bounds(at, self.woff, self.capacity()));
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("split"));
        }
        // Both halves get a fresh owned drop layered over the shared inner
        // release; the region is freed when the last half closes.
        let inner = self.drop.take().expect("owned buffer has a drop");
        let front_inner = inner.acquire();
        self.drop = Some(ArcDrop::wrap(inner));

        let front = Buffer {
            region: self.region.slice(0, at),
            roff: self.roff.min(at),
            woff: self.woff.min(at),
            order: self.order,
            read_only: self.read_only,
            accessible: true,
            const_child: self.const_child,
            drop: Some(ArcDrop::wrap(front_inner)),
            control: Arc::clone(&self.control),
            _not_send: PhantomData,
        };

        let cap = self.region.capacity();
        self.region = self.region.slice(at, cap - at);
        self.roff = self.roff.max(at) - at;
        self.woff = self.woff.max(at) - at;
        Ok(front)
    }

    /// Move `[read_offset, write_offset)` down to the start of the buffer
    pub fn compact(&mut self) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("compact"));
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if self.roff == 0 {
            return Ok(());
        }
        // SAFETY: source and destination live in this region and may
        // overlap; `copy` has memmove semantics.
        unsafe {
            std::ptr::copy(
                self.region.as_ptr().add(self.roff),
                self.region.as_ptr(),
                self.woff - self.roff,
            );
        }
        self.woff -= self.roff;
        self.roff = 0;
        Ok(())
    }

    /// Guarantee room for `size` writable bytes, compacting when allowed
    /// and growing through the allocator otherwise.
    pub fn ensure_writable(&mut self, size: Size) -> BufferResult<()> {
        self.ensure_writable_with(size, 1, true)
    }

    /// Guarantee room for `size` writable bytes.
    ///
    /// When growth is needed, the new capacity is
    /// `capacity + max(size - writable_bytes, min_growth)`; contents,
    /// cursors, order and flags are preserved and the old region is
    /// released through its drop.
    pub fn ensure_writable_with(
        &mut self,
        size: Size,
        min_growth: Size,
        allow_compaction: bool,
    ) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("ensure writable"));
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if self.writable_bytes() >= size {
            return Ok(());
        }

        if allow_compaction && self.writable_bytes() + self.roff >= size {
            return self.compact();
        }

        let new_size =
            self.capacity() as u64 + (size - self.writable_bytes()).max(min_growth) as u64;
        limits::check_buffer_size(new_size)?;
        let untethered = self.control.allocate_untethered(new_size as Size)?;

        // SAFETY: the fresh region is at least new_size >= capacity bytes;
        // the two regions are distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.as_ptr(),
                untethered.region.as_ptr(),
                self.capacity(),
            );
        }

        // Release the old memory and install the new region; cursors and
        // order are untouched, const state does not survive reallocation.
        if let Some(old) = self.drop.take() {
            old.release();
        }
        self.region = untethered.region;
        self.drop = Some(untethered.drop);
        self.const_child = false;
        Ok(())
    }

    /// Invalidate this buffer and hand its contents to a one-shot transfer
    /// token. Requires an owned buffer; the origin is inaccessible before
    /// the token exists.
    pub fn send(&mut self) -> BufferResult<SendToken<Buffer>> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("send"));
        }
        let drop = self.drop.take().expect("owned buffer has a drop");
        drop.record(TraceOp::Send);
        let payload = Buffer {
            region: self.region,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: self.read_only,
            accessible: true,
            const_child: self.const_child,
            drop: Some(drop),
            control: Arc::clone(&self.control),
            _not_send: PhantomData,
        };
        self.make_inaccessible();
        Ok(SendToken::new(payload))
    }

    /// Release this handle's share of the region. The backing memory is
    /// freed once the last view over it is closed. Dropping the buffer
    /// without closing has the same effect.
    pub fn close(&mut self) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        self.make_inaccessible();
        Ok(())
    }

    fn make_inaccessible(&mut self) {
        self.roff = 0;
        self.woff = 0;
        self.read_only = false;
        self.accessible = false;
        if let Some(drop) = self.drop.take() {
            drop.release();
        }
    }

    // ---- component visits --------------------------------------------

    /// Visit the readable portion of this buffer. The visitor returns a
    /// continue flag; the result is the number of components visited, or
    /// its negation when the visitor stopped early.
    pub fn for_each_readable(
        &self,
        initial_index: usize,
        mut f: impl FnMut(usize, &ReadableComponent) -> bool,
    ) -> BufferResult<isize> {
        self.check_read(self.roff, self.readable_bytes().max(1))?;
        let component = ReadableComponent {
            bytes: self.readable_slice(),
            native_address: self.component_address(self.roff),
        };
        Ok(if f(initial_index, &component) { 1 } else { -1 })
    }

    /// Visit the writable portion of this buffer, same protocol as
    /// [`Buffer::for_each_readable`].
    pub fn for_each_writable(
        &mut self,
        initial_index: usize,
        mut f: impl FnMut(usize, &mut WritableComponent) -> bool,
    ) -> BufferResult<isize> {
        self.check_write(self.woff, self.writable_bytes().max(1))?;
        let native_address = self.component_address(self.woff);
        let (ptr, len) = (
            // SAFETY: woff <= capacity; the slice covers the writable tail.
            unsafe { self.region.as_ptr().add(self.woff) },
            self.capacity() - self.woff,
        );
        let mut component = WritableComponent {
            bytes: unsafe { std::slice::from_raw_parts_mut(ptr, len) },
            native_address,
        };
        Ok(if f(initial_index, &mut component) { 1 } else { -1 })
    }

    fn component_address(&self, offset: Size) -> usize {
        let base = self.region.native_address();
        if base == 0 {
            0
        } else {
            base + offset
        }
    }

    // ---- cursors ------------------------------------------------------

    /// Iterate the readable bytes
    pub fn open_cursor(&self) -> BufferResult<ByteCursor<'_>> {
        self.open_cursor_at(self.roff, self.readable_bytes())
    }

    /// Iterate `len` bytes starting at `from`
    pub fn open_cursor_at(&self, from: Size, len: Size) -> BufferResult<ByteCursor<'_>> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if from.checked_add(len).map_or(true, |end| end > self.capacity()) {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity()));
        }
        Ok(self.cursor_unchecked(from, len))
    }

    /// Iterate the readable bytes in reverse
    pub fn open_reverse_cursor(&self) -> BufferResult<ReverseByteCursor<'_>> {
        if self.readable_bytes() == 0 && self.woff == 0 {
            return self.open_reverse_cursor_at(0, 0);
        }
        self.open_reverse_cursor_at(self.woff - 1, self.readable_bytes())
    }

    /// Iterate `len` bytes in reverse, starting at `from` and walking down
    pub fn open_reverse_cursor_at(
        &self,
        from: Size,
        len: Size,
    ) -> BufferResult<ReverseByteCursor<'_>> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if len > 0 && from >= self.capacity() {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity()));
        }
        if from as i64 - (len as i64) < -1 {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity()));
        }
        Ok(self.reverse_cursor_unchecked(from, len))
    }

    pub(crate) fn cursor_unchecked(&self, from: Size, len: Size) -> ByteCursor<'_> {
        ByteCursor::new(self.region.as_ptr(), from, len)
    }

    pub(crate) fn reverse_cursor_unchecked(&self, from: Size, len: Size) -> ReverseByteCursor<'_> {
        ReverseByteCursor::new(self.region.as_ptr(), from, len)
    }

    // ---- recovery and const children ---------------------------------

    /// Independently owned read-only child sharing this read-only parent's
    /// region. Used by constant-buffer suppliers.
    pub(crate) fn const_child(&self) -> BufferResult<Buffer> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if !self.read_only {
            return Err(BufferError::Unsupported(
                "const children require a read-only parent".into(),
            ));
        }
        let drop = self.drop.as_ref().expect("accessible buffer has a drop");
        Ok(Buffer {
            region: self.region,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: true,
            accessible: true,
            const_child: true,
            drop: Some(ArcDrop::wrap(drop.acquire())),
            control: Arc::clone(&self.control),
            _not_send: PhantomData,
        })
    }

    /// Tear an owned buffer down into its region view and drop, for reuse
    pub(crate) fn into_recoverable(mut self) -> BufferResult<(Region, ArcDrop)> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("recover memory"));
        }
        let drop = self.drop.take().expect("owned buffer has a drop");
        self.accessible = false;
        Ok((self.region, drop))
    }

    // ---- raw access shared with the accessor and composite layers ----

    #[inline]
    pub(crate) fn readable_slice(&self) -> &[u8] {
        // SAFETY: roff <= woff <= capacity for an accessible buffer.
        unsafe {
            std::slice::from_raw_parts(self.region.as_ptr().add(self.roff), self.readable_bytes())
        }
    }

    #[inline]
    pub(crate) fn get_raw<const N: usize>(&self, index: Size) -> BufferResult<[u8; N]> {
        self.check_get(index, N)?;
        let mut out = [0u8; N];
        // SAFETY: bounds checked; unaligned reads are done bytewise.
        unsafe {
            std::ptr::copy_nonoverlapping(self.region.as_ptr().add(index), out.as_mut_ptr(), N)
        }
        Ok(out)
    }

    #[inline]
    pub(crate) fn set_raw<const N: usize>(&mut self, index: Size, bytes: [u8; N]) -> BufferResult<()> {
        self.check_set(index, N)?;
        // SAFETY: bounds checked.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.region.as_ptr().add(index), N) }
        Ok(())
    }

    #[inline]
    pub(crate) fn read_raw<const N: usize>(&mut self) -> BufferResult<[u8; N]> {
        self.check_read(self.roff, N)?;
        let mut out = [0u8; N];
        // SAFETY: bounds checked against the write cursor.
        unsafe {
            std::ptr::copy_nonoverlapping(self.region.as_ptr().add(self.roff), out.as_mut_ptr(), N)
        }
        self.roff += N;
        Ok(out)
    }

    #[inline]
    pub(crate) fn write_raw<const N: usize>(&mut self, bytes: [u8; N]) -> BufferResult<()> {
        self.check_write(self.woff, N)?;
        // SAFETY: bounds checked against capacity.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.region.as_ptr().add(self.woff), N)
        }
        self.woff += N;
        Ok(())
    }

    // ---- bounds discipline -------------------------------------------

    // Error precedence mirrors the access rules: a closed buffer always
    // reports BufferClosed, a read-only buffer rejects writes before any
    // bounds check, and bounds failures carry the read and write limits.

    #[inline]
    pub(crate) fn check_read(&self, index: Size, size: Size) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if index.checked_add(size).map_or(true, |end| end > self.woff) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity()));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_get(&self, index: Size, size: Size) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if index.checked_add(size).map_or(true, |end| end > self.capacity()) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity()));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_write(&self, index: Size, size: Size) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if index < self.roff
            || index.checked_add(size).map_or(true, |end| end > self.capacity())
        {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity()));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_set(&self, index: Size, size: Size) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if index.checked_add(size).map_or(true, |end| end > self.capacity()) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity()));
        }
        Ok(())
    }

    fn check_copy_args(
        &self,
        src_pos: Size,
        len: Size,
        dest_pos: Size,
        dest_len: Size,
    ) -> BufferResult<()> {
        if !self.accessible {
            return Err(BufferError::BufferClosed);
        }
        if src_pos.checked_add(len).map_or(true, |end| end > self.capacity()) {
            return Err(BufferError::out_of_bounds(src_pos, self.woff, self.capacity()));
        }
        if dest_pos.checked_add(len).map_or(true, |end| end > dest_len) {
            return Err(BufferError::out_of_bounds(dest_pos, dest_len, dest_len));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Buffer[roff:{}, woff:{}, cap:{}]",
            self.roff,
            self.woff,
            self.capacity()
        )
    }
}
